//! Operator API.
//!
//! # Routes (mounted under `/admin`, Bearer token required)
//! ```text
//! GET    /status                         gateway, registry and session overview
//! GET    /instances                      healthy and unhealthy instance lists
//! POST   /services                       register an instance
//! DELETE /services/{name}                remove a service
//! DELETE /services/{name}/instances      remove one instance (?address=)
//! PUT    /services/{name}/monitoring     pause or resume health checks
//! POST   /services/probe                 run a probe round now
//! GET    /balancer                       strategy and per-service counters
//! PUT    /balancer/strategy              switch strategy
//! GET    /rate-limit                     limiter stats and blocked clients
//! POST   /rate-limit/unblock/{client}    lift a block
//! GET    /sessions                       open WebSocket sessions
//! ```

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

/// Build the operator router. Nested by the HTTP server at `/admin`.
pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/status", get(get_status))
        .route("/instances", get(get_instances))
        .route("/services", post(register_service))
        .route("/services/probe", post(probe_services))
        .route("/services/{name}", delete(unregister_service))
        .route("/services/{name}/instances", delete(unregister_instance))
        .route("/services/{name}/monitoring", put(set_monitoring))
        .route("/balancer", get(get_balancer))
        .route("/balancer/strategy", put(set_strategy))
        .route("/rate-limit", get(get_rate_limit))
        .route("/rate-limit/unblock/{client}", post(unblock_client))
        .route("/sessions", get(get_sessions))
        .route_layer(middleware::from_fn_with_state(state, admin_auth_middleware))
}

use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::http::response::error_response;
use crate::http::server::AppState;
use crate::load_balancer::{BalancerStats, Strategy};
use crate::net::SessionSnapshot;
use crate::rate_limit::RateLimitStats;
use crate::registry::{InstanceRef, Metadata, RegistryError, RegistryStats};

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            RegistryError::InvalidAddress { .. } => (StatusCode::BAD_REQUEST, "INVALID_ADDRESS"),
            RegistryError::NotFound(_) => (StatusCode::NOT_FOUND, "SERVICE_NOT_FOUND"),
            RegistryError::InstanceNotFound { .. } => (StatusCode::NOT_FOUND, "INSTANCE_NOT_FOUND"),
        };
        error_response(status, code, &self.to_string())
    }
}

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub registry: RegistryStats,
    pub active_sessions: usize,
    pub total_sessions: u64,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
        registry: state.registry.stats(),
        active_sessions: state.sessions.active_count(),
        total_sessions: state.sessions.total_count(),
    })
}

#[derive(Serialize)]
pub struct InstanceLists {
    pub healthy: Vec<InstanceRef>,
    pub unhealthy: Vec<InstanceRef>,
}

pub async fn get_instances(State(state): State<AppState>) -> Json<InstanceLists> {
    Json(InstanceLists {
        healthy: state.registry.list_healthy(),
        unhealthy: state.registry.list_unhealthy(),
    })
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub metadata: Metadata,
}

pub async fn register_service(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Response {
    if body.name.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "INVALID_NAME", "Service name required");
    }
    match state
        .registry
        .register(&body.name, &body.address, body.metadata)
        .await
    {
        Ok(outcome) => (StatusCode::CREATED, Json(outcome)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn unregister_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, RegistryError> {
    state.registry.unregister(&name)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct InstanceQuery {
    pub address: String,
}

pub async fn unregister_instance(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<InstanceQuery>,
) -> Result<StatusCode, RegistryError> {
    state.registry.unregister_instance(&name, &query.address)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct MonitoringRequest {
    pub enabled: bool,
}

/// Pause or resume background health checks for one service.
pub async fn set_monitoring(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<MonitoringRequest>,
) -> Result<Response, RegistryError> {
    state.registry.set_monitoring(&name, body.enabled)?;
    tracing::info!(service = %name, enabled = body.enabled, "Monitoring toggled via admin API");
    Ok(Json(json!({ "service": name, "monitoring": body.enabled })).into_response())
}

pub async fn probe_services(State(state): State<AppState>) -> Json<InstanceLists> {
    state.registry.probe_all().await;
    Json(InstanceLists {
        healthy: state.registry.list_healthy(),
        unhealthy: state.registry.list_unhealthy(),
    })
}

pub async fn get_balancer(State(state): State<AppState>) -> Json<BalancerStats> {
    Json(state.balancer.stats())
}

#[derive(Debug, Deserialize)]
pub struct StrategyRequest {
    pub strategy: String,
}

pub async fn set_strategy(
    State(state): State<AppState>,
    Json(body): Json<StrategyRequest>,
) -> Response {
    match body.strategy.parse::<Strategy>() {
        Ok(strategy) => {
            state.balancer.set_strategy(strategy);
            Json(json!({ "strategy": strategy })).into_response()
        }
        Err(e) => error_response(StatusCode::BAD_REQUEST, "UNKNOWN_STRATEGY", &e.to_string()),
    }
}

#[derive(Serialize)]
pub struct RateLimitStatus {
    #[serde(flatten)]
    pub stats: RateLimitStats,
    pub blocked: Vec<String>,
}

pub async fn get_rate_limit(State(state): State<AppState>) -> Json<RateLimitStatus> {
    Json(RateLimitStatus {
        stats: state.limiter.stats(),
        blocked: state.limiter.blocked_clients(),
    })
}

pub async fn unblock_client(
    State(state): State<AppState>,
    Path(client): Path<String>,
) -> Response {
    if state.limiter.unblock(&client) {
        Json(json!({ "client": client, "unblocked": true })).into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, "CLIENT_NOT_BLOCKED", "Client is not blocked")
    }
}

pub async fn get_sessions(State(state): State<AppState>) -> Json<BTreeMap<&'static str, Vec<SessionSnapshot>>> {
    let mut by_kind: BTreeMap<&'static str, Vec<SessionSnapshot>> = BTreeMap::new();
    for session in state.sessions.list() {
        by_kind.entry(session.kind.as_str()).or_default().push(session);
    }
    Json(by_kind)
}

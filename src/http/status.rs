//! Public gateway status endpoints.

use std::collections::BTreeMap;
use std::time::SystemTime;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::http::server::AppState;
use crate::registry::instance::epoch_secs;

/// `GET /health`: gateway liveness plus per-service health.
pub async fn gateway_health(State(state): State<AppState>) -> Json<Value> {
    let services: BTreeMap<String, bool> = state
        .registry
        .services()
        .into_iter()
        .map(|s| (s.name, s.healthy))
        .collect();

    Json(json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "services": services,
        "timestamp": epoch_secs(SystemTime::now()),
    }))
}

/// `GET /services`: registered services with instance detail.
pub async fn list_services(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "services": state.registry.services() }))
}

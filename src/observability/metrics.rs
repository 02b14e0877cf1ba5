//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by route kind, method, status
//! - `gateway_request_duration_seconds` (histogram): proxied call latency
//! - `gateway_upstream_errors_total` (counter): upstream failures by service and kind
//! - `gateway_rate_limited_total` (counter): rejected requests by reason
//! - `gateway_instance_health` (gauge): 1=healthy, 0=unhealthy
//! - `gateway_probes_total` (counter): health probes by result
//! - `gateway_sessions_active` (gauge): open WebSocket sessions by kind
//! - `gateway_mux_messages_total` (counter): multiplexed messages by outcome
//! - `gateway_limiter_faults_total` (counter): limiter faults that failed open
//! - `gateway_registration_errors_total` (counter): rejected registrations by reason
//!
//! # Design Decisions
//! - Labels for service, instance, status code
//! - Histogram buckets tuned for typical web latencies

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};

const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Install the Prometheus recorder and its scrape listener.
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full("gateway_request_duration_seconds".to_string()),
            LATENCY_BUCKETS,
        )?
        .install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record a completed request.
pub fn record_request(kind: &'static str, method: &str, status: u16, service: &str, start: Instant) {
    let labels = [
        ("kind", kind.to_string()),
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("service", service.to_string()),
    ];
    counter!("gateway_requests_total", &labels).increment(1);
    histogram!("gateway_request_duration_seconds", &labels).record(start.elapsed().as_secs_f64());
}

/// Record an upstream failure (`timeout`, `unreachable`, `upstream`, `unavailable`).
pub fn record_upstream_error(service: &str, kind: &'static str) {
    counter!(
        "gateway_upstream_errors_total",
        "service" => service.to_string(),
        "kind" => kind
    )
    .increment(1);
}

/// Record a request rejected by the rate limiter.
pub fn record_rate_limited(reason: &'static str) {
    counter!("gateway_rate_limited_total", "reason" => reason).increment(1);
}

pub fn record_instance_health(service: &str, address: &str, healthy: bool) {
    gauge!(
        "gateway_instance_health",
        "service" => service.to_string(),
        "instance" => address.to_string()
    )
    .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_probe(healthy: bool) {
    let result = if healthy { "healthy" } else { "unhealthy" };
    counter!("gateway_probes_total", "result" => result).increment(1);
}

pub fn session_opened(kind: &'static str) {
    gauge!("gateway_sessions_active", "kind" => kind).increment(1.0);
}

pub fn session_closed(kind: &'static str) {
    gauge!("gateway_sessions_active", "kind" => kind).decrement(1.0);
}

/// Record one multiplexed message (`routed`, `control`, `error`).
pub fn record_mux_message(outcome: &'static str) {
    counter!("gateway_mux_messages_total", "outcome" => outcome).increment(1);
}

pub fn record_limiter_fault() {
    counter!("gateway_limiter_faults_total").increment(1);
}

pub fn record_registration_error(reason: &'static str) {
    counter!("gateway_registration_errors_total", "reason" => reason).increment(1);
}

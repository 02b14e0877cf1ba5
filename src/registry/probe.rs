//! Health probe against a single instance.
//!
//! # Protocol
//! `GET <address><health_path>` with a bounded timeout.
//! - non-200, timeout or connection error → unhealthy
//! - 200 with a JSON object body → healthy iff `status == "healthy"`
//! - 200 with any other body → healthy, unless a structured payload is required

use std::time::{Duration, Instant};

use crate::config::RegistryConfig;

/// Outcome of one probe.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub healthy: bool,
    pub latency: Duration,
    pub status: Option<u16>,
    pub error: Option<String>,
}

/// Issues health probes.
#[derive(Debug, Clone)]
pub struct HealthProbe {
    client: reqwest::Client,
    path: String,
    require_payload: bool,
}

impl HealthProbe {
    pub fn new(config: &RegistryConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.probe_timeout_secs))
            .user_agent("service-gateway-health-check")
            .no_proxy()
            .build()
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "Failed to build probe client, using defaults");
                reqwest::Client::new()
            });

        Self {
            client,
            path: config.health_path.clone(),
            require_payload: config.require_health_payload,
        }
    }

    /// Probe `address` once. Never fails; errors become an unhealthy result.
    pub async fn check(&self, address: &str) -> ProbeResult {
        let url = format!("{}{}", address, self.path);
        let start = Instant::now();

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                let kind = if e.is_timeout() { "timeout" } else { "connection error" };
                tracing::debug!(url = %url, error = %e, "Health check failed: {kind}");
                return ProbeResult {
                    healthy: false,
                    latency: start.elapsed(),
                    status: None,
                    error: Some(e.to_string()),
                };
            }
        };

        let status = response.status().as_u16();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Health check failed: body read error");
                return ProbeResult {
                    healthy: false,
                    latency: start.elapsed(),
                    status: Some(status),
                    error: Some(e.to_string()),
                };
            }
        };
        let latency = start.elapsed();

        let healthy = evaluate_health(status, &body, self.require_payload);
        if !healthy {
            tracing::debug!(url = %url, status, "Health check failed: unhealthy response");
        }

        ProbeResult {
            healthy,
            latency,
            status: Some(status),
            error: None,
        }
    }
}

/// Decide health from a probe response.
pub fn evaluate_health(status: u16, body: &[u8], require_payload: bool) -> bool {
    if status != 200 {
        return false;
    }

    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(fields)) => {
            fields.get("status").and_then(|s| s.as_str()) == Some("healthy")
        }
        _ => !require_payload,
    }
}

//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::load_balancer::Strategy;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, body limits).
    pub listener: ListenerConfig,

    /// Services registered at startup.
    pub services: Vec<ServiceConfig>,

    /// Path segment aliases mapping `/api/{segment}` to a logical service.
    pub routes: Vec<RouteConfig>,

    /// Registry and health probe settings.
    pub registry: RegistryConfig,

    /// Load balancing settings.
    pub balancer: BalancerConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Operator endpoints.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8000").
    pub bind_address: String,

    /// Maximum request body size accepted for proxied calls, in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// A backend instance registered at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Logical service name (e.g., "voice-service").
    pub name: String,

    /// Instance address, scheme optional (e.g., "voice-service:8001").
    pub address: String,

    /// Relative weight for weighted round robin (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Opaque metadata stored with the registration.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_weight() -> u32 {
    1
}

/// Maps a public path segment to a logical service name.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// First path segment after `/api/` or `/ws/` (e.g., "voice").
    pub prefix: String,

    /// Logical service the segment resolves to (e.g., "voice-service").
    pub service: String,
}

/// Registry and health probe configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Interval between probe rounds in seconds.
    pub probe_interval_secs: u64,

    /// Timeout of a single probe in seconds.
    pub probe_timeout_secs: u64,

    /// Path probed on every instance.
    pub health_path: String,

    /// Require a JSON object body with `"status": "healthy"`.
    /// When false, a 200 with any other body counts as healthy (liveness).
    pub require_health_payload: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: 30,
            probe_timeout_secs: 10,
            health_path: "/health".to_string(),
            require_health_payload: false,
        }
    }
}

/// Load balancer configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BalancerConfig {
    /// Selection strategy.
    pub strategy: Strategy,
}

/// Timeout configuration for outbound calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Time allowed for a proxied call to produce response headers, in seconds.
    pub request_secs: u64,

    /// Timeout for a multiplexed message round trip, in seconds.
    pub message_secs: u64,

    /// Time allowed for open sessions to close during shutdown, in seconds.
    pub drain_secs: u64,
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn message(&self) -> Duration {
        Duration::from_secs(self.message_secs)
    }

    pub fn drain(&self) -> Duration {
        Duration::from_secs(self.drain_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
            message_secs: 30,
            drain_secs: 10,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Requests allowed per client within one window.
    pub requests_per_minute: u32,

    /// Requests allowed per client within one burst window.
    pub burst_limit: u32,

    /// Sliding window length in seconds.
    pub window_secs: u64,

    /// Burst window length in seconds.
    pub burst_window_secs: u64,

    /// How long a client stays blocked after exhausting the window, in seconds.
    pub block_secs: u64,

    /// Interval of the expired-entry sweep in seconds.
    pub cleanup_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 100,
            burst_limit: 10,
            window_secs: 60,
            burst_window_secs: 10,
            block_secs: 300,
            cleanup_interval_secs: 60,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log filter directive used when `RUST_LOG` is unset.
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "service_gateway=info,tower_http=info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Operator endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount the `/admin` endpoints.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_uses_defaults() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8000");
        assert_eq!(config.registry.probe_interval_secs, 30);
        assert_eq!(config.rate_limit.requests_per_minute, 100);
        assert_eq!(config.balancer.strategy, Strategy::RoundRobin);
    }

    #[test]
    fn parses_services_and_strategy() {
        let raw = r#"
            [balancer]
            strategy = "weighted_round_robin"

            [[services]]
            name = "voice-service"
            address = "127.0.0.1:8001"
            weight = 3

            [services.metadata]
            zone = "a"

            [[routes]]
            prefix = "voice"
            service = "voice-service"
        "#;
        let config: GatewayConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.balancer.strategy, Strategy::WeightedRoundRobin);
        assert_eq!(config.services.len(), 1);
        assert_eq!(config.services[0].weight, 3);
        assert_eq!(config.services[0].metadata["zone"], serde_json::json!("a"));
        assert_eq!(config.routes[0].service, "voice-service");
    }
}

//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and references.
//! All problems are collected, not just the first.

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::GatewayConfig;
use crate::registry::normalize_address;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    for (i, service) in config.services.iter().enumerate() {
        if service.name.trim().is_empty() {
            errors.push(ValidationError::new(format!("services[{i}].name"), "must not be empty"));
        }
        if service.weight == 0 {
            errors.push(ValidationError::new(format!("services[{i}].weight"), "must be at least 1"));
        }
        if let Err(e) = normalize_address(&service.address) {
            errors.push(ValidationError::new(format!("services[{i}].address"), e.to_string()));
        }
    }

    let mut prefixes = HashSet::new();
    for (i, route) in config.routes.iter().enumerate() {
        if route.prefix.is_empty() || route.prefix.contains('/') {
            errors.push(ValidationError::new(
                format!("routes[{i}].prefix"),
                "must be a single non-empty path segment",
            ));
        }
        if !prefixes.insert(route.prefix.as_str()) {
            errors.push(ValidationError::new(
                format!("routes[{i}].prefix"),
                format!("duplicate prefix '{}'", route.prefix),
            ));
        }
    }

    if config.registry.probe_interval_secs == 0 {
        errors.push(ValidationError::new("registry.probe_interval_secs", "must be greater than 0"));
    }
    if config.registry.probe_timeout_secs == 0 {
        errors.push(ValidationError::new("registry.probe_timeout_secs", "must be greater than 0"));
    }
    if !config.registry.health_path.starts_with('/') {
        errors.push(ValidationError::new("registry.health_path", "must start with '/'"));
    }

    let limits = &config.rate_limit;
    if limits.requests_per_minute == 0 {
        errors.push(ValidationError::new("rate_limit.requests_per_minute", "must be greater than 0"));
    }
    if limits.burst_limit == 0 {
        errors.push(ValidationError::new("rate_limit.burst_limit", "must be greater than 0"));
    }
    if limits.window_secs == 0 {
        errors.push(ValidationError::new("rate_limit.window_secs", "must be greater than 0"));
    }
    if limits.burst_window_secs > limits.window_secs {
        errors.push(ValidationError::new(
            "rate_limit.burst_window_secs",
            "must not exceed rate_limit.window_secs",
        ));
    }

    if config.timeouts.request_secs == 0 || config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts", "connect_secs and request_secs must be greater than 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if config.admin.enabled && config.admin.api_key.is_empty() {
        errors.push(ValidationError::new("admin.api_key", "must be set when admin is enabled"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

//! Instance selection over the service registry.
//!
//! # Responsibilities
//! - Resolve a logical service to one eligible instance
//! - Keep per-service rotation state
//! - Forward health and latency feedback to the registry

use std::collections::BTreeMap;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;

use crate::load_balancer::Strategy;
use crate::registry::{InstanceGuard, ServiceRegistry};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BalancerError {
    #[error("no available instance for service '{0}'")]
    Unavailable(String),
}

/// Chooses an instance per call under the active strategy.
#[derive(Debug)]
pub struct LoadBalancer {
    registry: Arc<ServiceRegistry>,
    strategy: ArcSwap<Strategy>,
    cursors: DashMap<String, Arc<AtomicUsize>>,
}

impl LoadBalancer {
    pub fn new(registry: Arc<ServiceRegistry>, strategy: Strategy) -> Self {
        tracing::info!(strategy = %strategy, "Load balancer initialized");
        Self {
            registry,
            strategy: ArcSwap::from_pointee(strategy),
            cursors: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Select an instance of `service` and take a connection slot on it.
    ///
    /// The slot is released when the returned guard is dropped.
    pub fn resolve(&self, service: &str) -> Result<InstanceGuard, BalancerError> {
        let mut instances = self.registry.instances(service);
        if instances.is_empty() {
            instances.extend(self.registry.materialize(service));
        }

        let eligible: Vec<_> = instances.into_iter().filter(|i| i.is_eligible()).collect();
        if eligible.is_empty() {
            tracing::debug!(service = %service, "No eligible instances");
            return Err(BalancerError::Unavailable(service.to_string()));
        }

        let strategy = self.strategy();
        let cursor = self.cursor(service);
        let chosen = strategy
            .selector()
            .select(&eligible, &cursor)
            .ok_or_else(|| BalancerError::Unavailable(service.to_string()))?;

        tracing::debug!(
            service = %service,
            address = %chosen.address(),
            strategy = %strategy,
            candidates = eligible.len(),
            "Instance selected"
        );
        Ok(chosen.acquire())
    }

    /// Mark an instance healthy or unhealthy from outside the probe loop.
    pub fn report_health(&self, service: &str, address: &str, healthy: bool) {
        if !self.registry.report_health(service, address, healthy) {
            tracing::debug!(service = %service, address = %address, "Health report for unknown instance ignored");
        }
    }

    /// Record an observed response time for an instance.
    pub fn report_latency(&self, service: &str, address: &str, latency: Duration) {
        if !self.registry.report_latency(service, address, latency) {
            tracing::debug!(service = %service, address = %address, "Latency report for unknown instance ignored");
        }
    }

    pub fn strategy(&self) -> Strategy {
        **self.strategy.load()
    }

    pub fn set_strategy(&self, strategy: Strategy) {
        let previous = self.strategy.swap(Arc::new(strategy));
        if *previous != strategy {
            tracing::info!(from = %previous, to = %strategy, "Load balancing strategy changed");
        }
    }

    pub fn stats(&self) -> BalancerStats {
        let mut services = BTreeMap::new();
        for name in self.registry.service_names() {
            let instances = self.registry.instances(&name);
            let latencies: Vec<f64> = instances
                .iter()
                .filter_map(|i| i.latency())
                .map(|l| l.as_secs_f64())
                .collect();
            let average_latency_secs = if latencies.is_empty() {
                0.0
            } else {
                latencies.iter().sum::<f64>() / latencies.len() as f64
            };

            services.insert(
                name,
                ServiceBalance {
                    instances: instances.len(),
                    healthy_instances: instances.iter().filter(|i| i.is_healthy()).count(),
                    active_connections: instances.iter().map(|i| i.active_connections()).sum(),
                    average_latency_secs,
                },
            );
        }

        BalancerStats {
            strategy: self.strategy(),
            total_services: services.len(),
            total_instances: services.values().map(|s| s.instances).sum(),
            healthy_instances: services.values().map(|s| s.healthy_instances).sum(),
            active_connections: services.values().map(|s| s.active_connections).sum(),
            services,
        }
    }

    fn cursor(&self, service: &str) -> Arc<AtomicUsize> {
        if let Some(cursor) = self.cursors.get(service) {
            return Arc::clone(cursor.value());
        }
        Arc::clone(
            self.cursors
                .entry(service.to_string())
                .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
                .value(),
        )
    }
}

/// Balancer view for operator endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct BalancerStats {
    pub strategy: Strategy,
    pub total_services: usize,
    pub total_instances: usize,
    pub healthy_instances: usize,
    pub active_connections: usize,
    pub services: BTreeMap<String, ServiceBalance>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceBalance {
    pub instances: usize,
    pub healthy_instances: usize,
    pub active_connections: usize,
    pub average_latency_secs: f64,
}

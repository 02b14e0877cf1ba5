//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every monitored instance, concurrently
//! - Apply each result to its instance as soon as the probe completes
//! - Exit on shutdown or when the registry is dropped

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::observability::metrics;
use crate::registry::instance::HealthState;
use crate::registry::probe::HealthProbe;
use crate::registry::ServiceRegistry;

pub struct HealthMonitor {
    registry: Weak<ServiceRegistry>,
    probe: HealthProbe,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(registry: Weak<ServiceRegistry>, probe: HealthProbe, interval: Duration) -> Self {
        Self {
            registry,
            probe,
            interval,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Health monitor starting");

        // Registration already probed synchronously; first round waits one period.
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(registry) = self.registry.upgrade() else {
                        tracing::debug!("Registry dropped, health monitor exiting");
                        break;
                    };
                    tokio::select! {
                        _ = self.check_all(&registry) => {}
                        _ = shutdown.recv() => {
                            tracing::info!("Health monitor received shutdown signal mid-round, exiting loop");
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe all monitored instances once.
    pub async fn check_all(&self, registry: &Arc<ServiceRegistry>) {
        let targets = registry.monitored_instances();
        if targets.is_empty() {
            return;
        }

        let probes = targets.into_iter().map(|(record, instance)| {
            let probe = &self.probe;
            async move {
                let result = probe.check(instance.address()).await;
                let previous = instance.apply_probe(result.healthy, result.latency);
                record.mark_probed();

                let service = record.name();
                let address = instance.address();
                metrics::record_probe(result.healthy);
                metrics::record_instance_health(service, address, result.healthy);

                match (previous, result.healthy) {
                    (HealthState::Healthy, false) | (HealthState::Unknown, false) => {
                        tracing::warn!(
                            service = %service,
                            address = %address,
                            status = ?result.status,
                            error = ?result.error,
                            "Instance marked unhealthy"
                        );
                    }
                    (HealthState::Unhealthy, true) | (HealthState::Unknown, true) => {
                        tracing::info!(service = %service, address = %address, "Instance marked healthy");
                    }
                    _ => {
                        tracing::trace!(
                            service = %service,
                            address = %address,
                            healthy = result.healthy,
                            latency_ms = result.latency.as_millis() as u64,
                            "Probe complete"
                        );
                    }
                }
            }
        });

        join_all(probes).await;
    }
}

//! The service registry.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::RegistryConfig;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::registry::instance::ServiceInstance;
use crate::registry::monitor::HealthMonitor;
use crate::registry::probe::HealthProbe;
use crate::registry::record::{ServiceRecord, ServiceSummary};
use crate::registry::store::{MemoryRegistrationStore, Registration, RegistrationStore};
use crate::registry::{normalize_address, Metadata, RegistryError};

/// Result of a registration.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationOutcome {
    pub service: String,
    pub address: String,
    pub healthy: bool,
    /// False when an existing instance was updated in place.
    pub created: bool,
}

/// One instance identified by service and address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct InstanceRef {
    pub service: String,
    pub address: String,
}

/// Aggregate registry statistics.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total_services: usize,
    pub total_instances: usize,
    pub healthy_instances: usize,
    pub unhealthy_instances: usize,
    pub health_percentage: f64,
    pub average_latency_secs: f64,
    pub monitoring_active: bool,
    /// Registrations held by the store, including ones not yet materialized.
    pub stored_registrations: usize,
}

struct MonitorHandle {
    shutdown: Shutdown,
    task: JoinHandle<()>,
}

/// Owns logical services, their instances and the probe loop.
pub struct ServiceRegistry {
    records: DashMap<String, Arc<ServiceRecord>>,
    store: Arc<dyn RegistrationStore>,
    probe: HealthProbe,
    config: RegistryConfig,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.records.len())
            .field("monitoring", &self.monitoring_active())
            .finish()
    }
}

impl ServiceRegistry {
    /// Create a registry backed by the in-memory store.
    pub fn new(config: RegistryConfig) -> Arc<Self> {
        Self::with_store(config, Arc::new(MemoryRegistrationStore::new()))
    }

    /// Create a registry backed by the given store.
    ///
    /// Registrations already present in the store are not probed up front;
    /// they become live instances on the first balancer lookup.
    pub fn with_store(config: RegistryConfig, store: Arc<dyn RegistrationStore>) -> Arc<Self> {
        tracing::info!(
            probe_interval_secs = config.probe_interval_secs,
            probe_timeout_secs = config.probe_timeout_secs,
            "Service registry initialized"
        );
        Arc::new(Self {
            records: DashMap::new(),
            store,
            probe: HealthProbe::new(&config),
            config,
            monitor: Mutex::new(None),
        })
    }

    /// Register an instance of `name` at `address`.
    ///
    /// The instance is probed once before it is stored; a failed probe stores
    /// it as unhealthy rather than rejecting it. `metadata["weight"]` sets the
    /// instance weight (default 1).
    pub async fn register(
        self: &Arc<Self>,
        name: &str,
        address: &str,
        metadata: Metadata,
    ) -> Result<RegistrationOutcome, RegistryError> {
        let address = normalize_address(address).inspect_err(|_| {
            metrics::record_registration_error("invalid_address");
        })?;
        let weight = weight_from_metadata(&metadata);

        let result = self.probe.check(&address).await;

        // The shard lock is held until the instance and its stored
        // registration are in place, so a concurrent unregister either
        // sees both or neither.
        let created = {
            let record = self
                .records
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(ServiceRecord::new(name, metadata.clone())));
            record.set_metadata(metadata.clone());
            let (instance, created) = record.upsert(&address, weight);
            instance.apply_probe(result.healthy, result.latency);
            record.mark_probed();
            self.store.save(Registration {
                name: name.to_string(),
                address: address.clone(),
                weight,
                metadata,
            });
            created
        };
        metrics::record_instance_health(name, &address, result.healthy);

        tracing::info!(
            service = %name,
            address = %address,
            healthy = result.healthy,
            created,
            "Service registered"
        );

        self.ensure_monitoring();

        Ok(RegistrationOutcome {
            service: name.to_string(),
            address,
            healthy: result.healthy,
            created,
        })
    }

    /// Remove a service and all of its instances.
    pub fn unregister(&self, name: &str) -> Result<(), RegistryError> {
        match self.records.entry(name.to_string()) {
            Entry::Occupied(entry) => {
                self.store.remove_service(name);
                entry.remove();
                tracing::info!(service = %name, "Service unregistered");
                Ok(())
            }
            Entry::Vacant(_) => {
                tracing::warn!(service = %name, "Service not found for unregistration");
                Err(RegistryError::NotFound(name.to_string()))
            }
        }
    }

    /// Remove one instance. The service is dropped with its last instance.
    pub fn unregister_instance(&self, name: &str, address: &str) -> Result<(), RegistryError> {
        let address = normalize_address(address)?;
        let Entry::Occupied(entry) = self.records.entry(name.to_string()) else {
            return Err(RegistryError::NotFound(name.to_string()));
        };

        if !entry.get().remove(&address) {
            return Err(RegistryError::InstanceNotFound {
                service: name.to_string(),
                address,
            });
        }
        self.store.remove_instance(name, &address);
        if entry.get().is_empty() {
            entry.remove();
        }

        tracing::info!(service = %name, address = %address, "Instance unregistered");
        Ok(())
    }

    /// Address of a healthy instance of `name`, if any.
    pub fn lookup(&self, name: &str) -> Option<String> {
        let record = self.record(name)?;
        let instances = record.instances();
        instances
            .iter()
            .find(|i| i.is_healthy())
            .map(|i| i.address().to_string())
    }

    /// Address of any known instance of `name`, regardless of health.
    /// Falls back to the registration store.
    pub fn lookup_raw(&self, name: &str) -> Option<String> {
        if let Some(address) = self
            .record(name)
            .and_then(|r| r.instances().first().map(|i| i.address().to_string()))
        {
            return Some(address);
        }
        self.store.find(name).into_iter().next().map(|r| r.address)
    }

    /// Instance snapshot for `name`; empty when the service is unknown.
    pub fn instances(&self, name: &str) -> Vec<Arc<ServiceInstance>> {
        self.record(name)
            .map(|r| r.instances().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Find one instance by service and address.
    pub fn instance(&self, name: &str, address: &str) -> Option<Arc<ServiceInstance>> {
        self.record(name)?.find(address)
    }

    /// Create a live instance for `name` from the registration store.
    ///
    /// Used on a balancer miss. The instance starts in the `Unknown` state and
    /// is probed on the next monitor round.
    pub fn materialize(self: &Arc<Self>, name: &str) -> Option<Arc<ServiceInstance>> {
        let address = self.lookup_raw(name)?;
        let stored = self.store.find(name);
        let registration = stored.iter().find(|r| r.address == address);
        let weight = registration.map_or(1, |r| r.weight);
        let metadata = registration.map(|r| r.metadata.clone()).unwrap_or_default();

        let (instance, created) = self
            .records
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ServiceRecord::new(name, metadata)))
            .upsert(&address, weight);
        if created {
            tracing::info!(service = %name, address = %address, "Instance created from stored registration");
        }

        self.ensure_monitoring();
        Some(instance)
    }

    /// Enable or disable probing for one service.
    pub fn set_monitoring(&self, name: &str, enabled: bool) -> Result<(), RegistryError> {
        let record = self
            .record(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        record.set_monitoring(enabled);
        Ok(())
    }

    /// Overwrite an instance's health flag. Returns false if it is unknown.
    pub fn report_health(&self, name: &str, address: &str, healthy: bool) -> bool {
        match self.instance(name, address) {
            Some(instance) => {
                instance.set_health(healthy);
                metrics::record_instance_health(name, address, healthy);
                true
            }
            None => false,
        }
    }

    /// Record an observed latency. Returns false if the instance is unknown.
    pub fn report_latency(&self, name: &str, address: &str, latency: Duration) -> bool {
        match self.instance(name, address) {
            Some(instance) => {
                instance.record_latency(latency);
                true
            }
            None => false,
        }
    }

    /// Names of every registered service.
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.records.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// Instances whose last probe succeeded.
    pub fn list_healthy(&self) -> Vec<InstanceRef> {
        self.partition().0
    }

    /// Instances that failed their last probe or were never probed.
    pub fn list_unhealthy(&self) -> Vec<InstanceRef> {
        self.partition().1
    }

    /// Services with at least one healthy instance.
    pub fn healthy_services(&self) -> Vec<String> {
        self.services()
            .into_iter()
            .filter(|s| s.healthy)
            .map(|s| s.name)
            .collect()
    }

    /// Services without a healthy instance.
    pub fn unhealthy_services(&self) -> Vec<String> {
        self.services()
            .into_iter()
            .filter(|s| !s.healthy)
            .map(|s| s.name)
            .collect()
    }

    fn partition(&self) -> (Vec<InstanceRef>, Vec<InstanceRef>) {
        let mut healthy = Vec::new();
        let mut unhealthy = Vec::new();
        for entry in self.records.iter() {
            for instance in entry.value().instances().iter() {
                let item = InstanceRef {
                    service: entry.key().clone(),
                    address: instance.address().to_string(),
                };
                if instance.is_healthy() {
                    healthy.push(item);
                } else {
                    unhealthy.push(item);
                }
            }
        }
        healthy.sort();
        unhealthy.sort();
        (healthy, unhealthy)
    }

    /// Operator view of every service, sorted by name.
    pub fn services(&self) -> Vec<ServiceSummary> {
        let mut summaries: Vec<_> = self.records.iter().map(|r| r.value().summary()).collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Operator view of one service.
    pub fn summary(&self, name: &str) -> Option<ServiceSummary> {
        self.record(name).map(|r| r.summary())
    }

    pub fn stats(&self) -> RegistryStats {
        let mut total_instances = 0;
        let mut healthy_instances = 0;
        let mut latencies = Vec::new();

        for entry in self.records.iter() {
            for instance in entry.value().instances().iter() {
                total_instances += 1;
                if instance.is_healthy() {
                    healthy_instances += 1;
                }
                if let Some(latency) = instance.latency() {
                    latencies.push(latency.as_secs_f64());
                }
            }
        }

        let average_latency_secs = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        };
        let health_percentage = if total_instances > 0 {
            healthy_instances as f64 / total_instances as f64 * 100.0
        } else {
            0.0
        };

        RegistryStats {
            total_services: self.records.len(),
            total_instances,
            healthy_instances,
            unhealthy_instances: total_instances - healthy_instances,
            health_percentage,
            average_latency_secs,
            monitoring_active: self.monitoring_active(),
            stored_registrations: self.store.all().len(),
        }
    }

    /// Probe every monitored instance once, outside the loop schedule.
    pub async fn probe_all(self: &Arc<Self>) {
        let monitor = HealthMonitor::new(Arc::downgrade(self), self.probe.clone(), self.interval());
        monitor.check_all(self).await;
    }

    pub fn monitoring_active(&self) -> bool {
        self.monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|m| !m.task.is_finished())
    }

    /// Cancel the probe loop and wait for it to exit.
    pub async fn stop_monitoring(&self) {
        let handle = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            handle.shutdown.trigger();
            if let Err(e) = handle.task.await {
                tracing::error!(error = %e, "Health monitor task failed");
            }
            tracing::info!("Health monitoring stopped");
        }
    }

    pub(crate) fn monitored_instances(&self) -> Vec<(Arc<ServiceRecord>, Arc<ServiceInstance>)> {
        self.records
            .iter()
            .filter(|r| r.value().monitoring_enabled())
            .flat_map(|r| {
                let record = Arc::clone(r.value());
                let instances = record.instances();
                instances
                    .iter()
                    .map(|i| (Arc::clone(&record), Arc::clone(i)))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn record(&self, name: &str) -> Option<Arc<ServiceRecord>> {
        self.records.get(name).map(|r| Arc::clone(r.value()))
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.config.probe_interval_secs)
    }

    fn ensure_monitoring(self: &Arc<Self>) {
        let mut slot = self.monitor.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|m| !m.task.is_finished()) {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime available, health monitoring not started");
            return;
        };

        let shutdown = Shutdown::new();
        let monitor = HealthMonitor::new(Arc::downgrade(self), self.probe.clone(), self.interval());
        let task = runtime.spawn(monitor.run(shutdown.subscribe()));
        *slot = Some(MonitorHandle { shutdown, task });
        tracing::info!("Health monitoring started");
    }
}

fn weight_from_metadata(metadata: &Metadata) -> u32 {
    metadata
        .get("weight")
        .and_then(|w| w.as_u64())
        .map(|w| w.clamp(1, u32::MAX as u64) as u32)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Json, Router};
    use std::net::SocketAddr;

    fn test_config() -> RegistryConfig {
        RegistryConfig {
            probe_interval_secs: 3600,
            probe_timeout_secs: 1,
            ..RegistryConfig::default()
        }
    }

    async fn healthy_backend() -> SocketAddr {
        let app = Router::new().route(
            "/health",
            get(|| async { Json(serde_json::json!({ "status": "healthy" })) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        addr
    }

    async fn dead_address() -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr
    }

    #[tokio::test]
    async fn register_probes_and_starts_monitoring() {
        let registry = ServiceRegistry::new(test_config());
        let addr = healthy_backend().await;

        let outcome = registry
            .register("voice-service", &addr.to_string(), Metadata::new())
            .await
            .unwrap();
        assert!(outcome.healthy);
        assert!(outcome.created);
        assert_eq!(registry.lookup("voice-service"), Some(format!("http://{addr}")));
        assert!(registry.monitoring_active());

        registry.stop_monitoring().await;
        assert!(!registry.monitoring_active());
    }

    #[tokio::test]
    async fn failed_probe_stores_unhealthy_instance() {
        let registry = ServiceRegistry::new(test_config());
        let addr = dead_address().await;

        let outcome = registry
            .register("task-service", &addr.to_string(), Metadata::new())
            .await
            .unwrap();
        assert!(!outcome.healthy);
        assert_eq!(registry.lookup("task-service"), None);
        assert_eq!(registry.lookup_raw("task-service"), Some(format!("http://{addr}")));
        assert_eq!(registry.unhealthy_services(), vec!["task-service".to_string()]);
        registry.stop_monitoring().await;
    }

    #[tokio::test]
    async fn malformed_address_is_rejected() {
        let registry = ServiceRegistry::new(test_config());
        let err = registry
            .register("code-service", "ftp://code:21", Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidAddress { .. }));
        assert!(registry.service_names().is_empty());
        assert!(!registry.monitoring_active());
    }

    #[tokio::test]
    async fn reregistering_updates_in_place() {
        let registry = ServiceRegistry::new(test_config());
        let addr = healthy_backend().await;

        registry
            .register("voice-service", &addr.to_string(), Metadata::new())
            .await
            .unwrap();
        let mut metadata = Metadata::new();
        metadata.insert("weight".into(), serde_json::json!(3));
        let outcome = registry
            .register("voice-service", &format!("http://{addr}/"), metadata)
            .await
            .unwrap();

        assert!(!outcome.created);
        let instances = registry.instances("voice-service");
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].weight(), 3);
        registry.stop_monitoring().await;
    }

    #[tokio::test]
    async fn unregister_unknown_service_leaves_state() {
        let registry = ServiceRegistry::new(test_config());
        let addr = healthy_backend().await;
        registry
            .register("voice-service", &addr.to_string(), Metadata::new())
            .await
            .unwrap();

        assert_eq!(
            registry.unregister("missing-service"),
            Err(RegistryError::NotFound("missing-service".into()))
        );
        assert_eq!(registry.service_names(), vec!["voice-service".to_string()]);

        registry.unregister("voice-service").unwrap();
        assert!(registry.service_names().is_empty());
        assert_eq!(registry.lookup_raw("voice-service"), None);
        registry.stop_monitoring().await;
    }

    #[tokio::test]
    async fn healthy_and_unhealthy_partition_instances() {
        let registry = ServiceRegistry::new(test_config());
        let good_a = healthy_backend().await;
        let good_b = healthy_backend().await;
        let bad = dead_address().await;

        for addr in [good_a, bad, good_b] {
            registry
                .register("brain-service", &addr.to_string(), Metadata::new())
                .await
                .unwrap();
        }
        registry.probe_all().await;

        let healthy = registry.list_healthy();
        let unhealthy = registry.list_unhealthy();
        assert_eq!(healthy.len() + unhealthy.len(), 3);
        assert_eq!(healthy.len(), 2);
        assert!(unhealthy.iter().all(|r| r.address == format!("http://{bad}")));
        for item in &healthy {
            assert!(!unhealthy.contains(item));
        }

        let stats = registry.stats();
        assert_eq!(stats.total_services, 1);
        assert_eq!(stats.total_instances, 3);
        assert_eq!(stats.healthy_instances, 2);
        registry.stop_monitoring().await;
    }

    #[tokio::test]
    async fn materializes_from_store_on_miss() {
        let store = Arc::new(MemoryRegistrationStore::new());
        store.save(Registration {
            name: "learning-service".into(),
            address: "http://127.0.0.1:8005".into(),
            weight: 2,
            metadata: Metadata::new(),
        });
        let registry = ServiceRegistry::with_store(test_config(), store);

        assert!(registry.instances("learning-service").is_empty());
        let stats = registry.stats();
        assert_eq!(stats.total_instances, 0);
        assert_eq!(stats.stored_registrations, 1);
        let instance = registry.materialize("learning-service").unwrap();
        assert_eq!(instance.address(), "http://127.0.0.1:8005");
        assert_eq!(instance.weight(), 2);
        assert!(instance.is_eligible());
        assert_eq!(registry.instances("learning-service").len(), 1);
        registry.stop_monitoring().await;
    }

    #[test]
    fn feedback_on_unknown_instance_is_ignored() {
        let registry = ServiceRegistry::new(test_config());
        assert!(!registry.report_health("voice-service", "http://a:1", false));
        assert!(!registry.report_latency("voice-service", "http://a:1", Duration::from_millis(5)));
    }

    #[tokio::test]
    async fn reregistration_after_last_instance_removed() {
        let registry = ServiceRegistry::new(test_config());
        let addr = healthy_backend().await;

        registry
            .register("memory-service", &addr.to_string(), Metadata::new())
            .await
            .unwrap();
        registry
            .unregister_instance("memory-service", &addr.to_string())
            .unwrap();
        assert!(registry.instances("memory-service").is_empty());

        let outcome = registry
            .register("memory-service", &addr.to_string(), Metadata::new())
            .await
            .unwrap();
        assert!(outcome.created);
        assert_eq!(registry.lookup("memory-service"), Some(format!("http://{addr}")));
        registry.stop_monitoring().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_register_and_unregister_stay_consistent() {
        let store = Arc::new(MemoryRegistrationStore::new());
        let registry = ServiceRegistry::with_store(test_config(), store.clone());
        let addr = healthy_backend().await.to_string();

        for _ in 0..50 {
            let (registered, _) = tokio::join!(
                registry.register("vision-service", &addr, Metadata::new()),
                async {
                    tokio::task::yield_now().await;
                    registry.unregister("vision-service")
                }
            );
            registered.unwrap();
            assert_eq!(
                registry.instances("vision-service").is_empty(),
                store.find("vision-service").is_empty()
            );
        }
        registry.stop_monitoring().await;
    }

    #[test]
    fn invalid_address_is_counted() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let registry = ServiceRegistry::new(test_config());

        let result = ::metrics::with_local_recorder(&recorder, || {
            runtime.block_on(registry.register("bad-service", "ftp://host:21", Metadata::new()))
        });

        assert!(matches!(result, Err(RegistryError::InvalidAddress { .. })));
        assert!(registry.instances("bad-service").is_empty());
        assert!(handle
            .render()
            .contains("gateway_registration_errors_total{reason=\"invalid_address\"} 1"));
    }

    #[tokio::test]
    async fn stop_monitoring_interrupts_a_slow_round() {
        // Accepts connections and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let store = Arc::new(MemoryRegistrationStore::new());
        store.save(Registration {
            name: "silent-service".into(),
            address: format!("http://{addr}"),
            weight: 1,
            metadata: Metadata::new(),
        });
        let config = RegistryConfig {
            probe_interval_secs: 1,
            probe_timeout_secs: 30,
            ..RegistryConfig::default()
        };
        let registry = ServiceRegistry::with_store(config, store);
        registry.materialize("silent-service").unwrap();
        assert!(registry.monitoring_active());

        // First round starts after one second and hangs on the silent backend.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        tokio::time::timeout(Duration::from_secs(2), registry.stop_monitoring())
            .await
            .expect("monitor kept running after shutdown");
        assert!(!registry.monitoring_active());
    }
}

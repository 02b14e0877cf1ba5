//! Logical service records.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use serde::Serialize;

use crate::registry::instance::{epoch_secs, InstanceSnapshot, ServiceInstance};
use crate::registry::Metadata;

/// One logical service and its instances.
///
/// The instance list is an immutable snapshot replaced on every change, so
/// readers never observe a partially updated list.
#[derive(Debug)]
pub struct ServiceRecord {
    name: String,
    registered_at: SystemTime,
    /// Milliseconds since the epoch, 0 when never probed.
    last_probe_ms: AtomicU64,
    monitoring: AtomicBool,
    metadata: ArcSwap<Metadata>,
    instances: ArcSwap<Vec<Arc<ServiceInstance>>>,
    /// Serializes writers of `instances`.
    write_lock: Mutex<()>,
}

impl ServiceRecord {
    pub fn new(name: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            name: name.into(),
            registered_at: SystemTime::now(),
            last_probe_ms: AtomicU64::new(0),
            monitoring: AtomicBool::new(true),
            metadata: ArcSwap::from_pointee(metadata),
            instances: ArcSwap::from_pointee(Vec::new()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registered_at(&self) -> SystemTime {
        self.registered_at
    }

    /// Current instance snapshot.
    pub fn instances(&self) -> Arc<Vec<Arc<ServiceInstance>>> {
        self.instances.load_full()
    }

    pub fn find(&self, address: &str) -> Option<Arc<ServiceInstance>> {
        self.instances
            .load()
            .iter()
            .find(|i| i.address() == address)
            .cloned()
    }

    /// Insert an instance, or update the weight of the one with the same address.
    /// Returns the instance and whether it was newly created.
    pub fn upsert(&self, address: &str, weight: u32) -> (Arc<ServiceInstance>, bool) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.instances.load_full();
        if let Some(existing) = current.iter().find(|i| i.address() == address) {
            existing.set_weight(weight);
            return (Arc::clone(existing), false);
        }

        let instance = Arc::new(ServiceInstance::new(address, weight));
        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(Arc::clone(&instance));
        self.instances.store(Arc::new(next));
        (instance, true)
    }

    /// Remove the instance with the given address. Returns false if absent.
    pub fn remove(&self, address: &str) -> bool {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.instances.load_full();
        if !current.iter().any(|i| i.address() == address) {
            return false;
        }
        let next: Vec<_> = current
            .iter()
            .filter(|i| i.address() != address)
            .cloned()
            .collect();
        self.instances.store(Arc::new(next));
        true
    }

    pub fn is_empty(&self) -> bool {
        self.instances.load().is_empty()
    }

    pub fn metadata(&self) -> Arc<Metadata> {
        self.metadata.load_full()
    }

    pub fn set_metadata(&self, metadata: Metadata) {
        self.metadata.store(Arc::new(metadata));
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.load(Ordering::Relaxed)
    }

    pub fn set_monitoring(&self, enabled: bool) {
        self.monitoring.store(enabled, Ordering::Relaxed);
    }

    pub fn mark_probed(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.last_probe_ms.store(now, Ordering::Relaxed);
    }

    pub fn last_probe(&self) -> Option<SystemTime> {
        match self.last_probe_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(UNIX_EPOCH + Duration::from_millis(ms)),
        }
    }

    /// Serializable view for operator endpoints.
    pub fn summary(&self) -> ServiceSummary {
        let instances: Vec<_> = self.instances().iter().map(|i| i.snapshot()).collect();
        ServiceSummary {
            name: self.name.clone(),
            healthy: instances.iter().any(|i| i.healthy),
            registered_at: epoch_secs(self.registered_at),
            last_probe: self.last_probe().map(epoch_secs),
            monitoring: self.monitoring_enabled(),
            metadata: (*self.metadata()).clone(),
            instances,
        }
    }
}

/// Operator view of one service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceSummary {
    pub name: String,
    pub healthy: bool,
    pub registered_at: u64,
    pub last_probe: Option<u64>,
    pub monitoring: bool,
    pub metadata: Metadata,
    pub instances: Vec<InstanceSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_is_unique_by_address() {
        let record = ServiceRecord::new("voice-service", Metadata::new());
        let (a, created_a) = record.upsert("http://10.0.0.1:8001", 1);
        let (b, created_b) = record.upsert("http://10.0.0.1:8001", 4);

        assert!(created_a);
        assert!(!created_b);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(record.instances().len(), 1);
        assert_eq!(a.weight(), 4);
    }

    #[test]
    fn remove_keeps_other_instances() {
        let record = ServiceRecord::new("voice-service", Metadata::new());
        record.upsert("http://10.0.0.1:8001", 1);
        record.upsert("http://10.0.0.2:8001", 1);

        let before = record.instances();
        assert!(record.remove("http://10.0.0.1:8001"));
        assert!(!record.remove("http://10.0.0.1:8001"));

        // Earlier snapshots are unaffected.
        assert_eq!(before.len(), 2);
        let after = record.instances();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].address(), "http://10.0.0.2:8001");
    }
}

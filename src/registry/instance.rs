//! Backend instance abstraction.
//!
//! # Responsibilities
//! - Represent a single running instance of a logical service
//! - Track active connections (for Least Connections)
//! - Hold the latest health report as one atomically swapped snapshot
//! - Provide a guard that releases the connection slot on drop

use std::ops::Deref;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use serde::Serialize;

/// Health state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Never probed.
    Unknown,
    Healthy,
    Unhealthy,
}

/// Result of the most recent health observation.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    pub state: HealthState,
    /// Last observed response latency.
    pub latency: Option<Duration>,
    /// When the state was last written.
    pub checked_at: Option<SystemTime>,
}

impl HealthReport {
    fn unknown() -> Self {
        Self {
            state: HealthState::Unknown,
            latency: None,
            checked_at: None,
        }
    }
}

/// One backend process serving a logical service.
#[derive(Debug)]
pub struct ServiceInstance {
    address: String,
    weight: AtomicU32,
    active_connections: AtomicUsize,
    health: ArcSwap<HealthReport>,
    /// Milliseconds since the epoch, 0 when never selected.
    last_used_ms: AtomicU64,
}

impl ServiceInstance {
    /// Create an instance in the `Unknown` state. Weight is clamped to at least 1.
    pub fn new(address: impl Into<String>, weight: u32) -> Self {
        Self {
            address: address.into(),
            weight: AtomicU32::new(weight.max(1)),
            active_connections: AtomicUsize::new(0),
            health: ArcSwap::from_pointee(HealthReport::unknown()),
            last_used_ms: AtomicU64::new(0),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn weight(&self) -> u32 {
        self.weight.load(Ordering::Relaxed)
    }

    pub fn set_weight(&self, weight: u32) {
        self.weight.store(weight.max(1), Ordering::Relaxed);
    }

    /// Get the current number of active connections.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Increment active connection count.
    pub fn inc_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement active connection count, never below zero.
    pub fn dec_connections(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Latest health snapshot.
    pub fn health(&self) -> Arc<HealthReport> {
        self.health.load_full()
    }

    pub fn state(&self) -> HealthState {
        self.health.load().state
    }

    /// True only after a successful probe.
    pub fn is_healthy(&self) -> bool {
        self.state() == HealthState::Healthy
    }

    /// True unless the instance is known to be unhealthy.
    /// A never-probed instance is eligible for selection.
    pub fn is_eligible(&self) -> bool {
        self.state() != HealthState::Unhealthy
    }

    pub fn latency(&self) -> Option<Duration> {
        self.health.load().latency
    }

    /// Apply a probe outcome. Latency is kept only for healthy probes.
    /// Returns the previous state.
    pub fn apply_probe(&self, healthy: bool, latency: Duration) -> HealthState {
        let report = HealthReport {
            state: if healthy {
                HealthState::Healthy
            } else {
                HealthState::Unhealthy
            },
            latency: healthy.then_some(latency),
            checked_at: Some(SystemTime::now()),
        };
        self.health.swap(Arc::new(report)).state
    }

    /// Overwrite the health flag, keeping the recorded latency.
    pub fn set_health(&self, healthy: bool) {
        let state = if healthy {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        };
        self.health.rcu(|current| HealthReport {
            state,
            latency: current.latency,
            checked_at: Some(SystemTime::now()),
        });
    }

    /// Record an observed latency, keeping the health state.
    pub fn record_latency(&self, latency: Duration) {
        self.health.rcu(|current| HealthReport {
            state: current.state,
            latency: Some(latency),
            checked_at: current.checked_at,
        });
    }

    /// Stamp the last-used time.
    pub fn touch(&self) {
        self.last_used_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn last_used(&self) -> Option<SystemTime> {
        match self.last_used_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(UNIX_EPOCH + Duration::from_millis(ms)),
        }
    }

    /// Take a connection slot on this instance.
    pub fn acquire(self: &Arc<Self>) -> InstanceGuard {
        self.inc_connections();
        self.touch();
        InstanceGuard {
            instance: Arc::clone(self),
        }
    }

    /// Serializable view for operator endpoints.
    pub fn snapshot(&self) -> InstanceSnapshot {
        let health = self.health();
        InstanceSnapshot {
            address: self.address.clone(),
            weight: self.weight(),
            active_connections: self.active_connections(),
            state: health.state,
            healthy: health.state == HealthState::Healthy,
            latency_secs: health.latency.map(|d| d.as_secs_f64()),
            last_check: health.checked_at.map(epoch_secs),
            last_used: self.last_used().map(epoch_secs),
        }
    }
}

/// Operator view of one instance.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSnapshot {
    pub address: String,
    pub weight: u32,
    pub active_connections: usize,
    pub state: HealthState,
    pub healthy: bool,
    pub latency_secs: Option<f64>,
    pub last_check: Option<u64>,
    pub last_used: Option<u64>,
}

/// A RAII guard holding one active connection on an instance.
#[derive(Debug)]
pub struct InstanceGuard {
    instance: Arc<ServiceInstance>,
}

impl InstanceGuard {
    pub fn instance(&self) -> &Arc<ServiceInstance> {
        &self.instance
    }
}

impl Deref for InstanceGuard {
    type Target = ServiceInstance;
    fn deref(&self) -> &Self::Target {
        &self.instance
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        self.instance.dec_connections();
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Seconds since the epoch.
pub fn epoch_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route resolved → logical service name
//!     → balancer.rs (registry snapshot, lazy fallback to the registration store)
//!     → Drop instances in the Unhealthy state
//!     → Apply the active strategy:
//!         - round_robin.rs (rotate through instances)
//!         - random.rs (uniform pick)
//!         - least_conn.rs (fewest active connections)
//!         - weighted.rs (rotate through the weight expansion)
//!         - least_time.rs (lowest observed latency)
//!     → InstanceGuard (connection accounted until dropped)
//! ```
//!
//! # Design Decisions
//! - Strategies are a closed set; switching is a single atomic swap
//! - Rotation counters are per service and shared by rotating strategies
//! - Instances that were never probed stay eligible
//! - Selectors are stateless; the balancer owns all mutable state

pub mod balancer;
pub mod least_conn;
pub mod least_time;
pub mod random;
pub mod round_robin;
pub mod strategy;
pub mod weighted;

use std::fmt::Debug;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use crate::registry::ServiceInstance;

pub use balancer::{BalancerError, BalancerStats, LoadBalancer, ServiceBalance};
pub use strategy::Strategy;

/// Picks one instance out of a non-empty candidate list.
///
/// `cursor` is the per-service rotation counter; selectors that do not rotate ignore it.
pub trait Selector: Send + Sync + Debug {
    fn select(
        &self,
        candidates: &[Arc<ServiceInstance>],
        cursor: &AtomicUsize,
    ) -> Option<Arc<ServiceInstance>>;
}

#[cfg(test)]
pub(crate) fn test_instances(weights: &[u32]) -> Vec<Arc<ServiceInstance>> {
    weights
        .iter()
        .enumerate()
        .map(|(i, w)| Arc::new(ServiceInstance::new(format!("http://10.0.0.{}:8000", i + 1), *w)))
        .collect()
}

//! Least Connections load balancing strategy.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use crate::load_balancer::Selector;
use crate::registry::ServiceInstance;

/// Least connections selector.
/// Selects the instance with the minimum number of active connections.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl Selector for LeastConnections {
    fn select(
        &self,
        candidates: &[Arc<ServiceInstance>],
        _cursor: &AtomicUsize,
    ) -> Option<Arc<ServiceInstance>> {
        // Ties go to the earliest instance in list order
        candidates
            .iter()
            .min_by_key(|i| i.active_connections())
            .cloned()
    }
}

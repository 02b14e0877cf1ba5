//! Least response time load balancing strategy.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use crate::load_balancer::Selector;
use crate::registry::ServiceInstance;

/// Picks the instance with the smallest observed latency.
/// Instances without a measurement are skipped; with no measurements at all
/// the first candidate is used.
#[derive(Debug, Default)]
pub struct LeastResponseTime;

impl Selector for LeastResponseTime {
    fn select(
        &self,
        candidates: &[Arc<ServiceInstance>],
        _cursor: &AtomicUsize,
    ) -> Option<Arc<ServiceInstance>> {
        candidates
            .iter()
            .filter_map(|i| i.latency().filter(|l| *l > Duration::ZERO).map(|l| (l, i)))
            .min_by_key(|(latency, _)| *latency)
            .map(|(_, i)| Arc::clone(i))
            .or_else(|| candidates.first().cloned())
    }
}

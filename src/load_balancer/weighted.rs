//! Weighted round-robin load balancing strategy.
//!
//! Each instance occupies `weight` consecutive slots in a virtual expansion of
//! the candidate list; the rotation counter walks that expansion. Slots are
//! located by cumulative weight, so the expansion is never materialized.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use crate::load_balancer::round_robin::advance;
use crate::load_balancer::Selector;
use crate::registry::ServiceInstance;

#[derive(Debug, Default)]
pub struct WeightedRoundRobin;

impl Selector for WeightedRoundRobin {
    fn select(
        &self,
        candidates: &[Arc<ServiceInstance>],
        cursor: &AtomicUsize,
    ) -> Option<Arc<ServiceInstance>> {
        // Weights can change concurrently; read each one once.
        let weights: Vec<usize> = candidates.iter().map(|i| i.weight() as usize).collect();
        let total: usize = weights.iter().sum();
        if total == 0 {
            return None;
        }

        let mut slot = advance(cursor, total);
        for (instance, &weight) in candidates.iter().zip(&weights) {
            if slot < weight {
                return Some(Arc::clone(instance));
            }
            slot -= weight;
        }
        None
    }
}

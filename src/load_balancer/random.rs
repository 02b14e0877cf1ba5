//! Uniform random load balancing strategy.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use rand::seq::SliceRandom;

use crate::load_balancer::Selector;
use crate::registry::ServiceInstance;

#[derive(Debug, Default)]
pub struct Random;

impl Selector for Random {
    fn select(
        &self,
        candidates: &[Arc<ServiceInstance>],
        _cursor: &AtomicUsize,
    ) -> Option<Arc<ServiceInstance>> {
        candidates.choose(&mut rand::thread_rng()).cloned()
    }
}

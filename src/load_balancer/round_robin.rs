//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::Selector;
use crate::registry::ServiceInstance;

/// Round-robin selector.
/// Rotates through the candidates using the service's counter.
#[derive(Debug, Default)]
pub struct RoundRobin;

impl Selector for RoundRobin {
    fn select(
        &self,
        candidates: &[Arc<ServiceInstance>],
        cursor: &AtomicUsize,
    ) -> Option<Arc<ServiceInstance>> {
        if candidates.is_empty() {
            return None;
        }
        let index = advance(cursor, candidates.len());
        candidates.get(index).cloned()
    }
}

/// Advance `cursor` modulo `len` and return the slot to use.
///
/// The stored value always stays below `len`, so a shrinking candidate list
/// never produces an out-of-range index.
pub(crate) fn advance(cursor: &AtomicUsize, len: usize) -> usize {
    let previous = cursor
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| Some((c % len + 1) % len))
        .unwrap_or_else(|c| c);
    previous % len
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::test_instances;

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin;
        let cursor = AtomicUsize::new(0);
        let backends = test_instances(&[1, 1]);

        let s1 = lb.select(&backends, &cursor).unwrap();
        assert_eq!(s1.address(), backends[0].address());

        let s2 = lb.select(&backends, &cursor).unwrap();
        assert_eq!(s2.address(), backends[1].address());

        let s3 = lb.select(&backends, &cursor).unwrap();
        assert_eq!(s3.address(), backends[0].address());
    }

    #[test]
    fn spreads_calls_evenly() {
        let lb = RoundRobin;
        let cursor = AtomicUsize::new(0);
        let backends = test_instances(&[1, 1, 1]);
        let mut counts = [0usize; 3];

        for _ in 0..10 {
            let chosen = lb.select(&backends, &cursor).unwrap();
            let i = backends.iter().position(|b| Arc::ptr_eq(b, &chosen)).unwrap();
            counts[i] += 1;
        }
        assert_eq!(counts, [4, 3, 3]);
    }

    #[test]
    fn survives_shrinking_candidate_list() {
        let cursor = AtomicUsize::new(0);
        for _ in 0..4 {
            advance(&cursor, 5);
        }
        assert_eq!(advance(&cursor, 2), 0);
        assert!(cursor.load(Ordering::Relaxed) < 2);
    }

    #[test]
    fn empty_candidates_select_nothing() {
        assert!(RoundRobin.select(&[], &AtomicUsize::new(0)).is_none());
    }
}

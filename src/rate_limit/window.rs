//! Sliding request window for one client.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Request history and block state of a single client.
#[derive(Debug, Default)]
pub struct RateWindow {
    hits: VecDeque<Instant>,
    blocked_until: Option<Instant>,
}

impl RateWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time left on an active block. An expired block is cleared.
    pub fn block_remaining(&mut self, now: Instant) -> Option<Duration> {
        match self.blocked_until {
            Some(until) if now < until => Some(until - now),
            Some(_) => {
                self.blocked_until = None;
                None
            }
            None => None,
        }
    }

    pub fn block(&mut self, now: Instant, duration: Duration) {
        self.blocked_until = Some(now + duration);
    }

    /// Remove a block. Returns whether one was active.
    pub fn unblock(&mut self, now: Instant) -> bool {
        let active = self.blocked_until.is_some_and(|until| now < until);
        self.blocked_until = None;
        active
    }

    /// Drop entries older than `window`.
    pub fn evict(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.hits.front() {
            if now.saturating_duration_since(*oldest) > window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    /// Entries younger than `burst_window`.
    pub fn recent(&self, now: Instant, burst_window: Duration) -> usize {
        self.hits
            .iter()
            .rev()
            .take_while(|t| now.saturating_duration_since(**t) < burst_window)
            .count()
    }

    pub fn record(&mut self, now: Instant) {
        self.hits.push_back(now);
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn oldest(&self) -> Option<Instant> {
        self.hits.front().copied()
    }

    pub fn clear(&mut self) -> bool {
        let had_hits = !self.hits.is_empty();
        self.hits.clear();
        had_hits
    }

    /// True when the window holds nothing worth keeping.
    pub fn is_idle(&mut self, now: Instant) -> bool {
        self.hits.is_empty() && self.block_remaining(now).is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_only_entries_past_the_window() {
        let start = Instant::now();
        let mut window = RateWindow::new();
        window.record(start);
        window.record(start + Duration::from_secs(30));

        window.evict(start + Duration::from_secs(60), Duration::from_secs(60));
        assert_eq!(window.len(), 2);

        window.evict(start + Duration::from_secs(61), Duration::from_secs(60));
        assert_eq!(window.len(), 1);
        assert_eq!(window.oldest(), Some(start + Duration::from_secs(30)));
    }

    #[test]
    fn counts_recent_entries() {
        let start = Instant::now();
        let mut window = RateWindow::new();
        for s in [0, 6, 9, 12] {
            window.record(start + Duration::from_secs(s));
        }
        let now = start + Duration::from_secs(15);
        assert_eq!(window.recent(now, Duration::from_secs(10)), 3);
    }

    #[test]
    fn expired_block_is_cleared() {
        let start = Instant::now();
        let mut window = RateWindow::new();
        window.block(start, Duration::from_secs(300));

        assert_eq!(
            window.block_remaining(start + Duration::from_secs(100)),
            Some(Duration::from_secs(200))
        );
        assert_eq!(window.block_remaining(start + Duration::from_secs(300)), None);
        assert!(window.is_idle(start + Duration::from_secs(300)));
    }
}

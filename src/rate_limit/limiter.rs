//! Sliding-window rate limiter with burst guard and punitive block.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::config::RateLimitConfig;
use crate::observability::metrics;
use crate::rate_limit::window::RateWindow;

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    /// The client exhausted its window and is blocked.
    Blocked { retry_after: Duration },
    /// Too many requests in the burst window. No block is placed.
    Throttled,
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed)
    }
}

/// Limiter statistics for operator endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStats {
    pub enabled: bool,
    pub active_clients: usize,
    pub blocked_clients: usize,
    pub total_requests: usize,
    pub requests_per_minute: u32,
    pub burst_limit: u32,
    pub window_secs: u64,
    pub burst_window_secs: u64,
    pub block_secs: u64,
}

/// Per-client rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<String, Arc<Mutex<RateWindow>>>,
    config: ArcSwap<RateLimitConfig>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        tracing::info!(
            enabled = config.enabled,
            requests_per_minute = config.requests_per_minute,
            burst_limit = config.burst_limit,
            "Rate limiter initialized"
        );
        Self {
            windows: DashMap::new(),
            config: ArcSwap::from_pointee(config),
        }
    }

    pub fn config(&self) -> Arc<RateLimitConfig> {
        self.config.load_full()
    }

    /// Check and record one request from `client`.
    pub fn check(&self, client: &str) -> RateDecision {
        self.check_at(client, Instant::now())
    }

    /// True when the request from `client` may proceed.
    pub fn allow(&self, client: &str) -> bool {
        self.check(client).is_allowed()
    }

    pub fn check_at(&self, client: &str, now: Instant) -> RateDecision {
        let config = self.config.load();
        if !config.enabled {
            return RateDecision::Allowed;
        }

        let entry = self.window(client);
        let Some(mut window) = lock(&entry, client) else {
            return RateDecision::Allowed;
        };

        if let Some(retry_after) = window.block_remaining(now) {
            tracing::warn!(client = %client, "Blocked client attempted request");
            return RateDecision::Blocked { retry_after };
        }

        window.evict(now, secs(config.window_secs));

        if window.len() >= config.requests_per_minute as usize {
            let block = secs(config.block_secs);
            window.block(now, block);
            tracing::warn!(
                client = %client,
                block_secs = config.block_secs,
                "Rate limit exceeded, client blocked"
            );
            return RateDecision::Blocked { retry_after: block };
        }

        if window.recent(now, secs(config.burst_window_secs)) >= config.burst_limit as usize {
            tracing::warn!(client = %client, "Burst limit exceeded");
            return RateDecision::Throttled;
        }

        window.record(now);
        RateDecision::Allowed
    }

    /// Requests left in the current window.
    pub fn remaining_requests(&self, client: &str) -> u32 {
        self.remaining_requests_at(client, Instant::now())
    }

    pub fn remaining_requests_at(&self, client: &str, now: Instant) -> u32 {
        let config = self.config.load();
        let used = self
            .existing(client)
            .and_then(|entry| {
                let mut window = lock(&entry, client)?;
                window.evict(now, secs(config.window_secs));
                Some(window.len())
            })
            .unwrap_or(0);
        (config.requests_per_minute as usize).saturating_sub(used) as u32
    }

    /// Time until the client's block ends or its oldest entry leaves the window.
    pub fn reset_in(&self, client: &str) -> Option<Duration> {
        self.reset_in_at(client, Instant::now())
    }

    pub fn reset_in_at(&self, client: &str, now: Instant) -> Option<Duration> {
        let config = self.config.load();
        let entry = self.existing(client)?;
        let mut window = lock(&entry, client)?;
        if let Some(remaining) = window.block_remaining(now) {
            return Some(remaining);
        }
        let oldest = window.oldest()?;
        Some((oldest + secs(config.window_secs)).saturating_duration_since(now))
    }

    pub fn is_blocked(&self, client: &str) -> bool {
        self.is_blocked_at(client, Instant::now())
    }

    pub fn is_blocked_at(&self, client: &str, now: Instant) -> bool {
        self.existing(client)
            .and_then(|entry| lock(&entry, client).map(|mut w| w.block_remaining(now).is_some()))
            .unwrap_or(false)
    }

    /// Lift a block early. Returns whether the client was blocked.
    pub fn unblock(&self, client: &str) -> bool {
        let unblocked = self
            .existing(client)
            .and_then(|entry| lock(&entry, client).map(|mut w| w.unblock(Instant::now())))
            .unwrap_or(false);
        if unblocked {
            tracing::info!(client = %client, "Client unblocked");
        }
        unblocked
    }

    /// Forget a client's request history. A block, if any, stays in place.
    pub fn clear_history(&self, client: &str) -> bool {
        let cleared = self
            .existing(client)
            .and_then(|entry| lock(&entry, client).map(|mut w| w.clear()))
            .unwrap_or(false);
        if cleared {
            tracing::info!(client = %client, "Request history cleared");
        }
        cleared
    }

    /// Drop expired blocks and idle clients. Returns how many clients were removed.
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Instant::now())
    }

    pub fn cleanup_expired_at(&self, now: Instant) -> usize {
        let window_len = secs(self.config.load().window_secs);
        let before = self.windows.len();
        self.windows.retain(|_, entry| match entry.lock() {
            Ok(mut window) => {
                window.evict(now, window_len);
                !window.is_idle(now)
            }
            Err(_) => false,
        });
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            tracing::debug!(removed, remaining = self.windows.len(), "Rate limiter cleanup");
        }
        removed
    }

    /// Clients currently under a block.
    pub fn blocked_clients(&self) -> Vec<String> {
        let now = Instant::now();
        let mut blocked: Vec<_> = self
            .windows
            .iter()
            .filter(|e| {
                lock(e.value(), e.key()).is_some_and(|mut w| w.block_remaining(now).is_some())
            })
            .map(|e| e.key().clone())
            .collect();
        blocked.sort();
        blocked
    }

    pub fn stats(&self) -> RateLimitStats {
        let config = self.config.load();
        let now = Instant::now();
        let mut active_clients = 0;
        let mut blocked_clients = 0;
        let mut total_requests = 0;

        for entry in self.windows.iter() {
            let Some(mut window) = lock(entry.value(), entry.key()) else {
                continue;
            };
            window.evict(now, secs(config.window_secs));
            if window.len() > 0 {
                active_clients += 1;
                total_requests += window.len();
            }
            if window.block_remaining(now).is_some() {
                blocked_clients += 1;
            }
        }

        RateLimitStats {
            enabled: config.enabled,
            active_clients,
            blocked_clients,
            total_requests,
            requests_per_minute: config.requests_per_minute,
            burst_limit: config.burst_limit,
            window_secs: config.window_secs,
            burst_window_secs: config.burst_window_secs,
            block_secs: config.block_secs,
        }
    }

    /// Replace the limits. Existing histories and blocks are kept.
    pub fn update_config(&self, config: RateLimitConfig) {
        tracing::info!(
            enabled = config.enabled,
            requests_per_minute = config.requests_per_minute,
            burst_limit = config.burst_limit,
            window_secs = config.window_secs,
            "Rate limiter config updated"
        );
        self.config.store(Arc::new(config));
    }

    /// Forget every client.
    pub fn reset_all(&self) {
        self.windows.clear();
        tracing::info!("Rate limiter data reset");
    }

    /// Run the periodic sweep until shutdown.
    pub async fn run_cleanup(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let period = secs(self.config.load().cleanup_interval_secs.max(1));
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.cleanup_expired();
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Rate limiter cleanup exiting");
                    break;
                }
            }
        }
    }

    fn window(&self, client: &str) -> Arc<Mutex<RateWindow>> {
        if let Some(entry) = self.windows.get(client) {
            return Arc::clone(entry.value());
        }
        Arc::clone(
            self.windows
                .entry(client.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(RateWindow::new())))
                .value(),
        )
    }

    fn existing(&self, client: &str) -> Option<Arc<Mutex<RateWindow>>> {
        self.windows.get(client).map(|e| Arc::clone(e.value()))
    }
}

/// Lock a client window. A poisoned lock is reported and cleared, and the
/// caller treats the client as unrestricted for this call.
fn lock<'a>(entry: &'a Mutex<RateWindow>, client: &str) -> Option<MutexGuard<'a, RateWindow>> {
    match entry.lock() {
        Ok(guard) => Some(guard),
        Err(_) => {
            tracing::error!(client = %client, "Rate limiter window poisoned, allowing request");
            metrics::record_limiter_fault();
            entry.clear_poison();
            None
        }
    }
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

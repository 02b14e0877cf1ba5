//! Per-client rate limiting.
//!
//! # Data Flow
//! ```text
//! Inbound request:
//!     → middleware.rs (client key = peer IP)
//!     → limiter.rs (lock the client's window)
//!         - Active block?            → Blocked
//!         - Evict entries older than the window
//!         - Window full?             → place block → Blocked
//!         - Burst window full?       → Throttled (no block)
//!         - Record the request       → Allowed
//!     → 429 or pass to routing
//! ```
//!
//! # Design Decisions
//! - One mutex per client; unrelated clients never contend
//! - Eviction is lazy, plus a periodic sweep of idle entries
//! - Internal faults fail open
//! - Time is injected so window logic is testable without sleeping

pub mod limiter;
pub mod middleware;
pub mod window;

pub use limiter::{RateDecision, RateLimitStats, RateLimiter};
pub use middleware::rate_limit_middleware;

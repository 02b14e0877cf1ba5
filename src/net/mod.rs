//! Network session subsystem.
//!
//! # Data Flow
//! ```text
//! WebSocket upgrade accepted
//!     → session.rs (assign session ID, register in tracker)
//!     → Hand off to duplex or multiplexed handler
//!     → Guard dropped on close (unregister, update gauge)
//!
//! Session States:
//!     Active → Closed
//! ```
//!
//! # Design Decisions
//! - Each session tracked for graceful shutdown
//! - Drain waits on a watch channel instead of polling

pub mod session;

pub use session::{SessionGuard, SessionId, SessionKind, SessionSnapshot, SessionTracker};

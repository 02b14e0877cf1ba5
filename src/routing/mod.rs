//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming path (/api/{segment}/..., /ws/{segment})
//!     → router.rs (alias lookup)
//!     → Return: logical service name
//!
//! Route Compilation (at startup):
//!     RouteConfig[]
//!     → Exact map from segment to service
//!     → Freeze as immutable ServiceRouter
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - Exact segment match only, no prefixes or patterns
//! - An unmapped segment is used as the service name itself

pub mod router;

pub use router::ServiceRouter;

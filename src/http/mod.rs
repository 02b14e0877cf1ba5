//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing, body limit, rate limit)
//!     → path dispatch:
//!         /api/{service}/...  → proxy.rs (unary forwarding)
//!         /ws/{service}       → websocket.rs (duplex frame forwarding)
//!         /ws                 → multiplex.rs (per-message routing)
//!         /health, /services  → status.rs
//!         /admin/...          → admin (operator API)
//!     → request.rs (forwarded headers, target URL)
//!     → load balancer picks an instance
//!     → response.rs (relay or JSON error)
//!     → Send to client
//! ```

pub mod multiplex;
pub mod proxy;
pub mod request;
pub mod response;
pub mod server;
pub mod status;
pub mod websocket;

pub use request::X_REQUEST_ID;
pub use response::ProxyError;
pub use server::{AppState, HttpServer};

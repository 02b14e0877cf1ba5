//! Service gateway library.
//!
//! Registry with health probing, load balancing, per-client rate limiting
//! and HTTP/WebSocket proxying for a fleet of backend services.

pub mod admin;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod rate_limit;
pub mod registry;
pub mod routing;

pub use config::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;

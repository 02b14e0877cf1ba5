//! Service registry subsystem.
//!
//! # Data Flow
//! ```text
//! register(name, address, metadata)
//!     → normalize address
//!     → probe.rs (one synchronous probe)
//!     → record.rs (upsert instance by address)
//!     → store.rs (write-through)
//!     → monitor.rs started on first registration
//!
//! monitor.rs (every probe interval):
//!     probe all monitored instances concurrently
//!     → instance.rs (atomic health snapshot swap)
//! ```
//!
//! # Design Decisions
//! - Records live in a concurrent map; instance lists are copy-on-write snapshots
//! - Probe failures never remove instances; only unregistration does
//! - Lookups never wait for probes in flight

pub mod instance;
pub mod monitor;
pub mod probe;
pub mod record;
pub mod services;
pub mod store;

use thiserror::Error;
use url::Url;

pub use instance::{HealthState, InstanceGuard, InstanceSnapshot, ServiceInstance};
pub use record::{ServiceRecord, ServiceSummary};
pub use services::{InstanceRef, RegistrationOutcome, RegistryStats, ServiceRegistry};
pub use store::{MemoryRegistrationStore, Registration, RegistrationStore};

/// Opaque registration metadata.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Errors returned by registry operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("service not found: {0}")]
    NotFound(String),

    #[error("instance {address} not found for service {service}")]
    InstanceNotFound { service: String, address: String },
}

/// Normalize an instance address into `scheme://host[:port][/path]` form.
///
/// The scheme defaults to `http://`; only `http` and `https` are accepted.
/// The result is the parsed URL's canonical form: scheme and host are
/// lowercased, a default port is dropped and trailing slashes are removed.
/// Spellings of the same endpoint therefore map to one instance.
pub fn normalize_address(raw: &str) -> Result<String, RegistryError> {
    let invalid = |reason: &str| RegistryError::InvalidAddress {
        address: raw.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(invalid("address is empty"));
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };

    let url = Url::parse(&candidate).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("host is missing"));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("query and fragment are not allowed"));
    }

    Ok(url.as_str().trim_end_matches('/').to_string())
}

//! Service name resolution.
//!
//! # Responsibilities
//! - Store compiled segment aliases
//! - Map the first path segment to a logical service name
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(1) lookup via HashMap
//! - Identity fallback rather than a no-match error; unknown services
//!   surface later as unavailable

use std::collections::HashMap;

use crate::config::RouteConfig;

#[derive(Debug, Clone, Default)]
pub struct ServiceRouter {
    aliases: HashMap<String, String>,
}

impl ServiceRouter {
    pub fn from_config(routes: &[RouteConfig]) -> Self {
        let aliases = routes
            .iter()
            .map(|r| (r.prefix.trim_matches('/').to_string(), r.service.clone()))
            .collect();
        Self { aliases }
    }

    /// Logical service for a path segment.
    pub fn resolve<'a>(&'a self, segment: &'a str) -> &'a str {
        self.aliases
            .get(segment)
            .map(String::as_str)
            .unwrap_or(segment)
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

//! Registration storage.
//!
//! The registry keeps its live state in memory; registrations are also
//! written through a [`RegistrationStore`] so a durable backend can be
//! plugged in without touching the registry contract. Only the in-memory
//! store ships.

use std::fmt;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::registry::Metadata;

/// A stored registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub name: String,
    pub address: String,
    pub weight: u32,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Backing store for registrations.
pub trait RegistrationStore: Send + Sync + fmt::Debug {
    /// Insert or replace the registration with the same name and address.
    fn save(&self, registration: Registration);

    /// Drop every registration for a service.
    fn remove_service(&self, name: &str);

    /// Drop one instance registration.
    fn remove_instance(&self, name: &str, address: &str);

    /// Registrations for one service, in insertion order.
    fn find(&self, name: &str) -> Vec<Registration>;

    /// Every stored registration.
    fn all(&self) -> Vec<Registration>;
}

/// Process-local store; contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryRegistrationStore {
    entries: DashMap<String, Vec<Registration>>,
}

impl MemoryRegistrationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RegistrationStore for MemoryRegistrationStore {
    fn save(&self, registration: Registration) {
        let mut entry = self.entries.entry(registration.name.clone()).or_default();
        match entry.iter_mut().find(|r| r.address == registration.address) {
            Some(existing) => *existing = registration,
            None => entry.push(registration),
        }
    }

    fn remove_service(&self, name: &str) {
        self.entries.remove(name);
    }

    fn remove_instance(&self, name: &str, address: &str) {
        let now_empty = match self.entries.get_mut(name) {
            Some(mut entry) => {
                entry.retain(|r| r.address != address);
                entry.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.entries.remove_if(name, |_, v| v.is_empty());
        }
    }

    fn find(&self, name: &str) -> Vec<Registration> {
        self.entries
            .get(name)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    fn all(&self) -> Vec<Registration> {
        self.entries
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect()
    }
}

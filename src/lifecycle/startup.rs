//! Startup orchestration.
//!
//! # Responsibilities
//! - Register the services listed in configuration
//!
//! # Design Decisions
//! - An unreachable service is registered anyway (as unhealthy)
//! - An invalid address is logged and skipped; validation normally catches it first

use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::registry::{Metadata, ServiceRegistry};

/// Register every configured service. Returns how many were registered.
pub async fn bootstrap_services(registry: &Arc<ServiceRegistry>, services: &[ServiceConfig]) -> usize {
    let mut registered = 0;
    for service in services {
        let mut metadata: Metadata = service
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        metadata.insert("weight".to_string(), service.weight.into());

        match registry
            .register(&service.name, &service.address, metadata)
            .await
        {
            Ok(outcome) => {
                registered += 1;
                tracing::info!(
                    service = %outcome.service,
                    address = %outcome.address,
                    healthy = outcome.healthy,
                    "Configured service registered"
                );
            }
            Err(e) => {
                tracing::error!(service = %service.name, error = %e, "Failed to register configured service");
            }
        }
    }
    registered
}

//! Registry backends and the HTTP documentation source.

pub mod consul;
pub mod docs;

use std::sync::Arc;

use apigw_core::{DynRegistry, StaticRegistry};

use crate::config::{RegistryBackend, RegistryConfig};

pub use consul::ConsulRegistry;
pub use docs::HttpDocsSource;

/// Builds the registry client selected by `registry.backend`.
pub fn registry_from_config(config: &RegistryConfig) -> Result<DynRegistry, String> {
    match config.backend {
        RegistryBackend::Static => Ok(Arc::new(StaticRegistry::from_instances(
            config.instances.iter().cloned(),
        ))),
        RegistryBackend::Consul => {
            let consul = config
                .consul
                .as_ref()
                .ok_or_else(|| "registry.backend=consul requires [registry.consul]".to_string())?;
            let registry = ConsulRegistry::new(consul)
                .map_err(|e| format!("failed to build Consul client: {e}"))?;
            tracing::info!(address = %consul.address, "Using Consul service registry");
            Ok(Arc::new(registry))
        }
    }
}

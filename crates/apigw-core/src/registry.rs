//! Service registry boundary.
//!
//! The gateway only ever reads instance snapshots: [`RegistryClient::lookup`]
//! returns an owned copy, so a request keeps a stable view even if the
//! registry changes underneath it.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::RegistryError;

/// A network address of one running copy of a backend service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceInstance {
    #[serde(alias = "service")]
    pub service_name: String,
    pub host: String,
    pub port: u16,
    #[serde(default = "default_healthy")]
    pub healthy: bool,
    /// Speak HTTPS to this instance.
    #[serde(default)]
    pub secure: bool,
}

fn default_healthy() -> bool {
    true
}

impl ServiceInstance {
    pub fn new(service_name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            service_name: service_name.into(),
            host: host.into(),
            port,
            healthy: true,
            secure: false,
        }
    }

    pub fn with_healthy(mut self, healthy: bool) -> Self {
        self.healthy = healthy;
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// `host:port`, with IPv6 hosts in brackets.
    pub fn authority(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn base_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}", self.authority())
    }
}

/// Directory mapping a service name to its live instances.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Instances currently known for `service_name`, in registry order.
    /// An unknown service yields an empty list, not an error.
    async fn lookup(&self, service_name: &str) -> Result<Vec<ServiceInstance>, RegistryError>;
}

pub type DynRegistry = Arc<dyn RegistryClient>;

/// In-memory registry fed from configuration.
///
/// Instances can be added, removed or have their health flipped at runtime.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    services: RwLock<IndexMap<String, Vec<ServiceInstance>>>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_instances(instances: impl IntoIterator<Item = ServiceInstance>) -> Self {
        let registry = Self::new();
        for instance in instances {
            registry.register(instance);
        }
        info!(
            services = registry.services.read().len(),
            "Static registry initialized"
        );
        registry
    }

    /// Adds an instance, replacing any existing entry with the same address.
    pub fn register(&self, instance: ServiceInstance) {
        let mut services = self.services.write();
        let list = services.entry(instance.service_name.clone()).or_default();
        match list
            .iter()
            .position(|i| i.host == instance.host && i.port == instance.port)
        {
            Some(pos) => list[pos] = instance,
            None => {
                debug!(service = %instance.service_name, addr = %instance.authority(), "Registered instance");
                list.push(instance);
            }
        }
    }

    /// Returns `true` if an instance was removed.
    pub fn deregister(&self, service_name: &str, host: &str, port: u16) -> bool {
        let mut services = self.services.write();
        let Some(list) = services.get_mut(service_name) else {
            return false;
        };
        let before = list.len();
        list.retain(|i| !(i.host == host && i.port == port));
        before != list.len()
    }

    /// Returns `true` if the instance exists.
    pub fn set_healthy(&self, service_name: &str, host: &str, port: u16, healthy: bool) -> bool {
        let mut services = self.services.write();
        let instance = services
            .get_mut(service_name)
            .and_then(|list| list.iter_mut().find(|i| i.host == host && i.port == port));
        match instance {
            Some(instance) => {
                instance.healthy = healthy;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl RegistryClient for StaticRegistry {
    async fn lookup(&self, service_name: &str) -> Result<Vec<ServiceInstance>, RegistryError> {
        Ok(self
            .services
            .read()
            .get(service_name)
            .cloned()
            .unwrap_or_default())
    }
}

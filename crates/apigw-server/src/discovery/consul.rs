//! Consul service discovery backend.

use std::time::Duration;

use apigw_core::{RegistryClient, RegistryError, ServiceInstance};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::config::ConsulConfig;

/// Looks instances up through Consul's health API
/// (`GET /v1/health/service/<name>`).
///
/// An instance counts as healthy when every one of its checks is `passing`.
pub struct ConsulRegistry {
    http_client: HttpClient,
    base_url: String,
    token: Option<String>,
    datacenter: Option<String>,
    passing_only: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthEntry {
    node: NodeEntry,
    service: ServiceEntry,
    #[serde(default)]
    checks: Vec<CheckEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NodeEntry {
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceEntry {
    service: String,
    #[serde(default)]
    address: String,
    port: u16,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CheckEntry {
    status: String,
}

impl ConsulRegistry {
    pub fn new(config: &ConsulConfig) -> Result<Self, reqwest::Error> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            http_client,
            base_url: base_url(&config.address),
            token: config.token.clone(),
            datacenter: config.datacenter.clone(),
            passing_only: config.passing_only,
        })
    }

    fn to_instance(entry: HealthEntry) -> ServiceInstance {
        let host = if entry.service.address.is_empty() {
            entry.node.address
        } else {
            entry.service.address
        };
        let healthy = entry.checks.iter().all(|c| c.status == "passing");
        let secure = entry.service.tags.iter().any(|t| t == "https");
        ServiceInstance::new(entry.service.service, host, entry.service.port)
            .with_healthy(healthy)
            .with_secure(secure)
    }
}

/// Ensure the endpoint has a scheme and no trailing slash.
fn base_url(address: &str) -> String {
    let address = address.trim().trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{address}")
    }
}

#[async_trait]
impl RegistryClient for ConsulRegistry {
    #[instrument(skip(self))]
    async fn lookup(&self, service_name: &str) -> Result<Vec<ServiceInstance>, RegistryError> {
        let url = format!("{}/v1/health/service/{}", self.base_url, service_name);

        let mut request = self.http_client.get(&url);
        if let Some(ref token) = self.token {
            request = request.header("X-Consul-Token", token);
        }
        if let Some(ref dc) = self.datacenter {
            request = request.query(&[("dc", dc.as_str())]);
        }
        if self.passing_only {
            request = request.query(&[("passing", "true")]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RegistryError::Unreachable(format!("Consul request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::Unreachable(format!(
                "Consul returned status {status}"
            )));
        }

        let entries: Vec<HealthEntry> = response
            .json()
            .await
            .map_err(|e| RegistryError::InvalidResponse(e.to_string()))?;

        let instances: Vec<ServiceInstance> = entries.into_iter().map(Self::to_instance).collect();
        debug!(
            service = service_name,
            instances = instances.len(),
            healthy = instances.iter().filter(|i| i.healthy).count(),
            "Consul lookup completed"
        );
        Ok(instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(address: String) -> ConsulConfig {
        ConsulConfig {
            address,
            token: None,
            datacenter: None,
            passing_only: false,
            timeout_ms: 1_000,
        }
    }

    fn health_entry(node: &str, address: &str, port: u16, checks: &[&str]) -> serde_json::Value {
        json!({
            "Node": { "Node": "node-1", "Address": node },
            "Service": { "ID": format!("order-{port}"), "Service": "order-service", "Address": address, "Port": port, "Tags": [] },
            "Checks": checks.iter().map(|s| json!({ "Status": s })).collect::<Vec<_>>()
        })
    }

    #[test]
    fn test_base_url() {
        assert_eq!(base_url("127.0.0.1:8500"), "http://127.0.0.1:8500");
        assert_eq!(base_url("https://consul.local/"), "https://consul.local");
    }

    #[tokio::test]
    async fn test_lookup_maps_health_entries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/health/service/order-service"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                health_entry("10.0.0.1", "", 8083, &["passing", "passing"]),
                health_entry("10.0.0.2", "172.16.0.2", 8083, &["passing", "critical"]),
            ])))
            .mount(&server)
            .await;

        let registry = ConsulRegistry::new(&config(server.uri())).unwrap();
        let instances = registry.lookup("order-service").await.unwrap();

        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].host, "10.0.0.1");
        assert!(instances[0].healthy);
        assert_eq!(instances[1].host, "172.16.0.2");
        assert!(!instances[1].healthy);
        assert_eq!(instances[1].service_name, "order-service");
    }

    #[tokio::test]
    async fn test_lookup_sends_token_and_filters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/health/service/order-service"))
            .and(header("X-Consul-Token", "secret"))
            .and(query_param("dc", "dc1"))
            .and(query_param("passing", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let mut cfg = config(server.uri());
        cfg.token = Some("secret".into());
        cfg.datacenter = Some("dc1".into());
        cfg.passing_only = true;

        let registry = ConsulRegistry::new(&cfg).unwrap();
        assert!(registry.lookup("order-service").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/health/service/broken"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/health/service/down"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let registry = ConsulRegistry::new(&config(server.uri())).unwrap();
        assert!(matches!(
            registry.lookup("broken").await,
            Err(RegistryError::InvalidResponse(_))
        ));
        assert!(matches!(
            registry.lookup("down").await,
            Err(RegistryError::Unreachable(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_agent() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let registry = ConsulRegistry::new(&config(addr.to_string())).unwrap();
        assert!(matches!(
            registry.lookup("order-service").await,
            Err(RegistryError::Unreachable(_))
        ));
    }
}

//! Fetches OpenAPI documents from backend instances over HTTP.

use apigw_core::{DocsFetchError, DocsSource, DynRegistry, parse_document};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

/// [`DocsSource`] that asks the registry for a healthy instance and reads
/// its documentation endpoint.
///
/// Documentation traffic does not go through the round-robin balancer, so
/// refreshes never shift the rotation seen by API clients. The first healthy
/// instance in registry order is used.
pub struct HttpDocsSource {
    client: reqwest::Client,
    registry: DynRegistry,
}

impl HttpDocsSource {
    pub fn new(client: reqwest::Client, registry: DynRegistry) -> Self {
        Self { client, registry }
    }
}

#[async_trait]
impl DocsSource for HttpDocsSource {
    #[instrument(skip(self))]
    async fn fetch(&self, service_name: &str, docs_path: &str) -> Result<Value, DocsFetchError> {
        let instances = self.registry.lookup(service_name).await?;
        let instance = instances
            .iter()
            .find(|i| i.healthy)
            .ok_or_else(|| DocsFetchError::NoInstance(service_name.to_string()))?;

        let url = format!("{}{}", instance.base_url(), docs_path);
        debug!(url = %url, "Fetching API documentation");

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| DocsFetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DocsFetchError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| DocsFetchError::Transport(e.to_string()))?;
        parse_document(&body)
    }
}

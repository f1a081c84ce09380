//! Request forwarder: proxies an inbound request to one backend instance.

use std::time::{Duration, Instant};

use apigw_core::{ForwardError, ServiceInstance, has_dot_segment};
use axum::{
    body::{Body, HttpBody},
    http::{HeaderMap, HeaderName, Request, Uri, header},
    response::Response,
};
use tracing::{debug, info, instrument};
use url::Url;

/// Streams requests to backend instances and their responses back.
///
/// Bodies are never buffered in full. The whole exchange, up to the last
/// response byte, is bounded by the forward timeout. Failed calls are not
/// retried. Dropping the returned future, as axum does when the caller goes
/// away, aborts the backend call.
#[derive(Debug, Clone)]
pub struct RequestForwarder {
    client: reqwest::Client,
    timeout: Duration,
}

impl RequestForwarder {
    pub fn new(timeout: Duration, connect_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            // Redirects belong to the caller, not the gateway.
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self::with_client(client, timeout))
    }

    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Forwards `request` to `instance`, keeping method, path, query, headers
    /// and body. Hop-by-hop headers are dropped in both directions.
    #[instrument(
        skip(self, request),
        fields(service = %instance.service_name, upstream = %instance.authority())
    )]
    pub async fn forward(
        &self,
        request: Request<Body>,
        instance: &ServiceInstance,
    ) -> Result<Response, ForwardError> {
        let (parts, body) = request.into_parts();
        let target = target_url(instance, &parts.uri)?;
        let headers = filter_headers(&parts.headers);

        debug!(method = %parts.method, target = %target, "Forwarding request");

        let mut outbound = self
            .client
            .request(parts.method, target)
            .headers(headers)
            .timeout(self.timeout);
        if !body.is_end_stream() {
            outbound = outbound.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let started = Instant::now();
        let upstream = outbound
            .send()
            .await
            .map_err(|e| classify(e, self.timeout))?;

        let status = upstream.status();
        info!(
            status = %status,
            elapsed_ms = %started.elapsed().as_millis(),
            "Upstream responded"
        );

        let mut response = Response::builder().status(status);
        if let Some(response_headers) = response.headers_mut() {
            *response_headers = filter_headers(upstream.headers());
        }

        response
            .body(Body::from_stream(upstream.bytes_stream()))
            .map_err(|e| ForwardError::unknown(format!("Failed to build response: {e}")))
    }
}

/// Backend URL for `uri`. Refuses dot segments, which parsing would resolve
/// into a different path than the one that was routed.
fn target_url(instance: &ServiceInstance, uri: &Uri) -> Result<Url, ForwardError> {
    if has_dot_segment(uri.path()) {
        return Err(ForwardError::unknown(format!(
            "Refusing to forward path with dot segments: {}",
            uri.path()
        )));
    }
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let raw = format!("{}{}", instance.base_url(), path_and_query);
    Url::parse(&raw).map_err(|e| ForwardError::unknown(format!("Invalid target URL {raw}: {e}")))
}

fn classify(err: reqwest::Error, timeout: Duration) -> ForwardError {
    if err.is_timeout() {
        ForwardError::timeout(format!("No complete response within {timeout:?}"))
    } else if err.is_connect() {
        ForwardError::connection_refused(format!("Failed to connect to target: {err}"))
    } else {
        ForwardError::unknown(format!("Proxy request failed: {err}"))
    }
}

/// Copies `headers` without hop-by-hop headers, including any named in
/// the `Connection` header itself.
fn filter_headers(headers: &HeaderMap) -> HeaderMap {
    let connection_listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::try_from(name.trim()).ok())
        .collect();

    let mut filtered = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop_header(name.as_str()) || connection_listed.contains(name) {
            continue;
        }
        filtered.append(name.clone(), value.clone());
    }
    filtered
}

/// Checks if a header is a hop-by-hop header that should not be forwarded.
///
/// Hop-by-hop headers are defined in RFC 7230 Section 6.1.
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
            | "host" // Host should be set to target, not forwarded
    )
}

use std::{net::SocketAddr, sync::Arc, time::Duration};

use apigw_core::{
    DocsAggregator, DocsSource, DynRegistry, RoundRobinBalancer, RouteError, RouteTable,
};
use axum::{Router, middleware, routing::get};
use thiserror::Error;
use tower_http::trace::TraceLayer;

use crate::{
    config::AppConfig,
    discovery::{self, HttpDocsSource},
    gateway::{RequestForwarder, gateway_fallback_handler},
    handlers,
    middleware::{self as app_middleware, RequestId},
};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    /// Immutable after startup
    pub routes: Arc<RouteTable>,
    pub registry: DynRegistry,
    pub balancer: Arc<RoundRobinBalancer>,
    pub forwarder: RequestForwarder,
    pub docs: Arc<DocsAggregator>,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid routes: {0}")]
    Routes(#[from] RouteError),

    #[error("registry setup failed: {0}")]
    Registry(String),

    #[error("HTTP client setup failed: {0}")]
    HttpClient(#[from] reqwest::Error),
}

pub fn build_app(state: AppState) -> Router {
    let body_limit = state.config.server.body_limit_bytes;

    let mut router = Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/healthz", get(handlers::healthz));

    if state.config.docs.enabled {
        router = router
            .route("/docs/aggregate", get(handlers::docs_aggregate))
            .route("/docs/aggregate/status", get(handlers::docs_status))
            .route("/docs/resources", get(handlers::docs_resources))
            .route("/docs/services/{service}", get(handlers::service_docs))
            .route("/docs/openapi.json", get(handlers::docs_openapi));
    }

    router
        // Everything else goes through the route table
        .fallback(gateway_fallback_handler)
        // Middleware stack (outermost last: request id -> trace -> body limit)
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .extensions()
                        .get::<RequestId>()
                        .map(|id| id.as_str().to_string())
                        .unwrap_or_default();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(middleware::from_fn(app_middleware::request_id))
        .with_state(state)
}

pub struct ServerBuilder {
    config: AppConfig,
    registry: Option<DynRegistry>,
    docs_source: Option<Arc<dyn DocsSource>>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
            registry: None,
            docs_source: None,
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    /// Use this registry instead of the one described by `registry` config.
    pub fn with_registry(mut self, registry: DynRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Use this documentation source instead of fetching over HTTP.
    pub fn with_docs_source(mut self, source: Arc<dyn DocsSource>) -> Self {
        self.docs_source = Some(source);
        self
    }

    pub fn build_state(self) -> Result<AppState, ServerError> {
        let config = self.config;
        let routes = Arc::new(config.route_table()?);

        let registry = match self.registry {
            Some(registry) => registry,
            None => discovery::registry_from_config(&config.registry)
                .map_err(ServerError::Registry)?,
        };

        let forwarder = RequestForwarder::new(config.forward_timeout(), config.connect_timeout())?;

        let docs_source = match self.docs_source {
            Some(source) => source,
            None => {
                let client = reqwest::Client::builder()
                    .connect_timeout(config.connect_timeout())
                    .build()?;
                Arc::new(HttpDocsSource::new(client, registry.clone())) as Arc<dyn DocsSource>
            }
        };
        let docs = Arc::new(DocsAggregator::new(
            routes.clone(),
            docs_source,
            config.docs.settings(),
        ));

        tracing::info!(
            routes = routes.len(),
            services = routes.services().len(),
            registry = %config.registry.backend,
            "Gateway state initialized"
        );

        Ok(AppState {
            config: Arc::new(config),
            routes,
            registry,
            balancer: Arc::new(RoundRobinBalancer::new()),
            forwarder,
            docs,
        })
    }

    pub fn build(self) -> Result<ApiGatewayServer, ServerError> {
        let state = self.build_state()?;
        let addr = state.config.addr();
        let refresh_interval = if state.config.docs.enabled {
            state.config.docs.refresh_interval()
        } else {
            None
        };
        let docs = state.docs.clone();

        Ok(ApiGatewayServer {
            addr,
            app: build_app(state),
            docs,
            refresh_interval,
        })
    }
}

pub struct ApiGatewayServer {
    addr: SocketAddr,
    app: Router,
    docs: Arc<DocsAggregator>,
    refresh_interval: Option<Duration>,
}

impl ApiGatewayServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let refresher = self.refresh_interval.map(|interval| {
            tracing::info!(interval_secs = interval.as_secs(), "API docs refresh enabled");
            self.docs.clone().spawn_refresh_loop(interval)
        });

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        let served = axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        if let Some(handle) = refresher {
            handle.abort();
        }
        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use apigw_core::{DocsFetchError, RouteRule, ServiceInstance, StaticRegistry};
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;

    struct StaticDocs;

    #[async_trait]
    impl DocsSource for StaticDocs {
        async fn fetch(&self, service_name: &str, _docs_path: &str) -> Result<Value, DocsFetchError> {
            if service_name == "user-service" {
                Ok(json!({ "openapi": "3.0.1", "paths": { "/api/usuarios": {} } }))
            } else {
                Err(DocsFetchError::Status(503))
            }
        }
    }

    fn test_state() -> AppState {
        let mut config = AppConfig::default();
        config.routes = vec![
            RouteRule::new("users", "/api/usuarios/**", "user-service").unwrap(),
            RouteRule::new("orders", "/api/pedidos/**", "order-service")
                .unwrap()
                .with_docs_path("/orders/api-docs"),
        ];
        let registry = StaticRegistry::from_instances([
            ServiceInstance::new("order-service", "127.0.0.1", 9).with_healthy(false),
        ]);
        ServerBuilder::new()
            .with_config(config)
            .with_registry(Arc::new(registry))
            .with_docs_source(Arc::new(StaticDocs))
            .build_state()
            .unwrap()
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let (status, body) = get_json(build_app(test_state()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "UP");
        assert_eq!(body["service"], "api-gateway");

        let (status, body) = get_json(build_app(test_state()), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_unmapped_path_is_not_found_with_request_id() {
        let response = build_app(test_state())
            .oneshot(
                Request::builder()
                    .uri("/api/desconocido")
                    .header("x-request-id", "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers().get("x-request-id").unwrap(), "req-42");

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "route-not-found");
    }

    #[tokio::test]
    async fn test_unknown_or_unhealthy_service_is_unavailable() {
        let (status, body) = get_json(build_app(test_state()), "/api/usuarios/1").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "no-healthy-instance");

        let (status, _) = get_json(build_app(test_state()), "/api/pedidos").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_docs_aggregate_refreshes_on_first_request() {
        let state = test_state();
        assert_eq!(state.docs.current_catalog().generation(), 0);

        let (status, body) = get_json(build_app(state.clone()), "/docs/aggregate").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user-service"]["openapi"], "3.0.1");
        assert!(body["order-service"]["error"].is_string());
        assert_eq!(state.docs.current_catalog().generation(), 1);

        // Served from the published catalog
        get_json(build_app(state.clone()), "/docs/aggregate").await;
        assert_eq!(state.docs.current_catalog().generation(), 1);

        get_json(build_app(state.clone()), "/docs/aggregate?refresh=true").await;
        assert_eq!(state.docs.current_catalog().generation(), 2);
    }

    #[tokio::test]
    async fn test_docs_resources_and_landing_page() {
        let (status, body) = get_json(build_app(test_state()), "/docs/resources").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!([
                { "name": "user-service", "location": "/docs/services/user-service", "swaggerVersion": "3.0" },
                { "name": "order-service", "location": "/docs/services/order-service", "swaggerVersion": "3.0" },
            ])
        );

        let (status, body) = get_json(build_app(test_state()), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["services"][0]["name"], "user-service");
        assert_eq!(body["services"][0]["route"], "/api/usuarios/**");
        assert_eq!(body["services"][1]["docs"], "/docs/services/order-service");
    }

    #[tokio::test]
    async fn test_resource_locations_are_served_by_the_gateway() {
        let state = test_state();
        let (_, resources) = get_json(build_app(state.clone()), "/docs/resources").await;

        let location = resources[0]["location"].as_str().unwrap();
        let (status, body) = get_json(build_app(state.clone()), location).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["openapi"], "3.0.1");

        let location = resources[1]["location"].as_str().unwrap();
        let (status, body) = get_json(build_app(state.clone()), location).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["error"].as_str().unwrap().contains("503"));

        let (status, body) = get_json(build_app(state), "/docs/services/billing-service").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "unknown-service");
    }

    #[tokio::test]
    async fn test_dot_segments_are_rejected_before_routing() {
        let (status, body) =
            get_json(build_app(test_state()), "/api/usuarios/../../actuator/env").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "bad-request");
    }

    #[tokio::test]
    async fn test_docs_routes_disabled() {
        let mut state = test_state();
        let mut config = (*state.config).clone();
        config.docs.enabled = false;
        state.config = Arc::new(config);

        // Falls through to the route table
        let (status, body) = get_json(build_app(state), "/docs/aggregate").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "route-not-found");
    }
}

#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc};

use apigw_core::{DynRegistry, RouteRule, ServiceInstance, StaticRegistry};
use apigw_server::{AppConfig, AppState, ServerBuilder, build_app};
use tokio::task::JoinHandle;
use wiremock::MockServer;

pub struct TestGateway {
    pub base: String,
    pub addr: SocketAddr,
    pub state: AppState,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TestGateway {
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

pub fn config_with_routes(routes: &[(&str, &str, &str)]) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.routes = routes
        .iter()
        .map(|(name, pattern, service)| RouteRule::new(*name, pattern, *service).expect("route"))
        .collect();
    cfg
}

pub fn instance_for(service: &str, server: &MockServer) -> ServiceInstance {
    let addr = server.address();
    ServiceInstance::new(service, addr.ip().to_string(), addr.port())
}

/// A localhost port with nothing listening on it.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);
    port
}

/// Sends `path` verbatim in a raw HTTP/1.1 request and returns the whole
/// response text. No client-side URL normalization is applied.
pub async fn raw_get(addr: SocketAddr, path: &str) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut stream = tokio::net::TcpStream::connect(addr).await.expect("connect");
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.expect("write");
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.expect("read");
    String::from_utf8_lossy(&response).into_owned()
}

pub async fn start_gateway(cfg: AppConfig, instances: Vec<ServiceInstance>) -> TestGateway {
    start_gateway_with_registry(cfg, Arc::new(StaticRegistry::from_instances(instances))).await
}

pub async fn start_gateway_with_registry(cfg: AppConfig, registry: DynRegistry) -> TestGateway {
    let state = ServerBuilder::new()
        .with_config(cfg)
        .with_registry(registry)
        .build_state()
        .expect("build state");
    let app = build_app(state.clone());

    // Bind to an ephemeral port
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    TestGateway {
        base: format!("http://{addr}"),
        addr,
        state,
        shutdown: Some(tx),
        handle: Some(handle),
    }
}

pub mod config;
pub mod discovery;
pub mod gateway;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod server;

pub use config::{AppConfig, ConsulConfig, DocsConfig, GatewayConfig, RegistryConfig, ServerConfig};
pub use discovery::{ConsulRegistry, HttpDocsSource};
pub use gateway::{GatewayError, RequestForwarder};
pub use observability::init_tracing;
pub use server::{ApiGatewayServer, AppState, ServerBuilder, ServerError, build_app};

use apigw_core::{DocsSettings, MergeInfo, RouteRule, RouteTable, ServiceInstance};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Request forwarding
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// API documentation aggregation
    #[serde(default)]
    pub docs: DocsConfig,
    /// Where backend instances are looked up
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Route rules, evaluated in the order they appear
    #[serde(default)]
    pub routes: Vec<RouteRule>,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        // Gateway validations
        if self.gateway.forward_timeout_ms == 0 || self.gateway.connect_timeout_ms == 0 {
            return Err("gateway timeouts must be > 0".into());
        }
        // Docs validations
        if self.docs.fetch_timeout_ms == 0 {
            return Err("docs.fetch_timeout_ms must be > 0".into());
        }
        if !self.docs.default_docs_path.starts_with('/') {
            return Err("docs.default_docs_path must start with '/'".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Registry validation
        if self.registry.backend == RegistryBackend::Consul {
            match &self.registry.consul {
                Some(consul) if !consul.address.trim().is_empty() => {}
                _ => return Err("registry.backend=consul requires registry.consul.address".into()),
            }
        }
        // Route validation
        for route in &self.routes {
            if let Some(docs_path) = &route.docs_path {
                if !docs_path.starts_with('/') {
                    return Err(format!("routes.{}.docs_path must start with '/'", route.name));
                }
            }
        }
        self.route_table()
            .map_err(|e| format!("routes config error: {e}"))?;
        Ok(())
    }

    pub fn route_table(&self) -> Result<RouteTable, apigw_core::RouteError> {
        RouteTable::new(self.routes.clone())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway.forward_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound for request bodies of the gateway's own endpoints.
    /// Proxied bodies are streamed and not limited here.
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Whole-exchange bound for one proxied request
    #[serde(default = "default_forward_timeout_ms")]
    pub forward_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_forward_timeout_ms() -> u64 {
    30_000
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            forward_timeout_ms: default_forward_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocsConfig {
    #[serde(default = "default_docs_enabled")]
    pub enabled: bool,
    /// 0 disables the periodic refresh; docs are then only fetched on demand
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_docs_path")]
    pub default_docs_path: String,
    /// `info.title` of the merged document
    #[serde(default = "default_docs_title")]
    pub title: String,
    /// `info.version` of the merged document
    #[serde(default = "default_docs_version")]
    pub version: String,
}

fn default_docs_enabled() -> bool {
    true
}
fn default_refresh_interval_secs() -> u64 {
    60
}
fn default_fetch_timeout_ms() -> u64 {
    5_000
}
fn default_docs_path() -> String {
    "/v3/api-docs".into()
}
fn default_docs_title() -> String {
    "API Gateway".into()
}
fn default_docs_version() -> String {
    env!("CARGO_PKG_VERSION").into()
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            enabled: default_docs_enabled(),
            refresh_interval_secs: default_refresh_interval_secs(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            default_docs_path: default_docs_path(),
            title: default_docs_title(),
            version: default_docs_version(),
        }
    }
}

impl DocsConfig {
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_secs > 0).then(|| Duration::from_secs(self.refresh_interval_secs))
    }

    pub fn settings(&self) -> DocsSettings {
        DocsSettings {
            fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
            default_docs_path: self.default_docs_path.clone(),
        }
    }

    pub fn merge_info(&self) -> MergeInfo {
        MergeInfo {
            title: self.title.clone(),
            version: self.version.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    /// Instances listed in `registry.instances`
    #[default]
    Static,
    /// Consul health API
    Consul,
}

impl std::fmt::Display for RegistryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryBackend::Static => write!(f, "static"),
            RegistryBackend::Consul => write!(f, "consul"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegistryConfig {
    #[serde(default)]
    pub backend: RegistryBackend,
    /// Instances for the static backend
    #[serde(default)]
    pub instances: Vec<ServiceInstance>,
    #[serde(default)]
    pub consul: Option<ConsulConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsulConfig {
    /// Consul agent address, e.g. `http://127.0.0.1:8500`
    pub address: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub datacenter: Option<String>,
    /// Ask Consul to return passing instances only
    #[serde(default)]
    pub passing_only: bool,
    #[serde(default = "default_consul_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_consul_timeout_ms() -> u64 {
    2_000
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_FILE: &str = "apigw.toml";

    /// Loads `path`, or `apigw.toml` when present if no path is given, then
    /// applies `APIGW__` environment overrides and validates the result.
    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                // An explicitly named file must exist
                let pathbuf = PathBuf::from(p);
                if !pathbuf.is_file() {
                    return Err(format!("config file not found: {p}"));
                }
                builder = builder.add_source(File::from(pathbuf));
            }
            None => {
                // Try default root-level file
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., APIGW__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("APIGW")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        // Validate
        merged.validate()?;
        Ok(merged)
    }
}

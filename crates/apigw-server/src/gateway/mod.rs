//! API Gateway request path: match, pick an instance, proxy.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │   Request   │
//! └──────┬──────┘
//!        │
//!        ▼
//! ┌─────────────────┐
//! │   RouteTable    │  (path -> target service, first match wins)
//! └──────┬──────────┘
//!        ▼
//! ┌─────────────────┐
//! │ RegistryClient  │  (service -> instance snapshot)
//! └──────┬──────────┘
//!        ▼
//! ┌─────────────────┐
//! │ RoundRobin LB   │  (healthy instance, per-service cursor)
//! └──────┬──────────┘
//!        ▼
//! ┌─────────────────┐
//! │ RequestForwarder│  (stream request/response, timeout)
//! └─────────────────┘
//! ```

pub mod error;
pub mod proxy;
pub mod router;

pub use error::GatewayError;
pub use proxy::RequestForwarder;
pub use router::gateway_fallback_handler;

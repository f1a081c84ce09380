//! Routing core of the apigw API gateway.
//!
//! ```text
//! request path ─▶ RouteTable ─▶ RegistryClient ─▶ RoundRobinBalancer ─▶ instance
//!
//! RouteTable::services() ─▶ DocsAggregator ─▶ DocsSource (per service) ─▶ AggregatedCatalog
//! ```
//!
//! Nothing here speaks HTTP; the server crate supplies the transport-backed
//! [`RegistryClient`] and [`DocsSource`] implementations and the forwarder.

pub mod balancer;
pub mod docs;
pub mod error;
pub mod registry;
pub mod route;

pub use balancer::RoundRobinBalancer;
pub use docs::{
    AggregatedCatalog, DocEntry, DocsAggregator, DocsSettings, DocsSource, MergeInfo,
    MergedDocument, merge_documents, parse_document,
};
pub use error::{DocsFetchError, ForwardError, ForwardErrorKind, RegistryError, RouteError};
pub use registry::{DynRegistry, RegistryClient, ServiceInstance, StaticRegistry};
pub use route::{PathPattern, RouteRule, RouteTable, has_dot_segment};

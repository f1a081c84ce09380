//! Gateway-specific error types.

use apigw_core::{ForwardError, ForwardErrorKind, RegistryError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Failures of the routing pipeline, mapped to HTTP status classes at the
/// gateway boundary. None of them is retried.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No route rule matches the request path.
    #[error("No route found for {method} {path}")]
    RouteNotFound { method: String, path: String },

    /// The target service resolved but has no healthy instance.
    #[error("No healthy instance of service {service}")]
    NoHealthyInstance { service: String },

    /// The service directory could not be queried.
    #[error("Registry lookup for {service} failed: {source}")]
    Registry {
        service: String,
        #[source]
        source: RegistryError,
    },

    /// The backend call failed.
    #[error("Forwarding to {service} failed: {source}")]
    Forward {
        service: String,
        #[source]
        source: ForwardError,
    },

    /// Documentation was requested for a service no route targets.
    #[error("Unknown service {0}")]
    UnknownService(String),

    /// Bad request (400).
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::RouteNotFound { .. } | Self::UnknownService(_) => StatusCode::NOT_FOUND,
            Self::NoHealthyInstance { .. } | Self::Registry { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Forward { source, .. } => match source.kind {
                ForwardErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
                ForwardErrorKind::ConnectionRefused | ForwardErrorKind::Unknown => {
                    StatusCode::BAD_GATEWAY
                }
            },
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::RouteNotFound { .. } => "route-not-found",
            Self::UnknownService(_) => "unknown-service",
            Self::NoHealthyInstance { .. } => "no-healthy-instance",
            Self::Registry { .. } => "registry-unavailable",
            Self::Forward { source, .. } => match source.kind {
                ForwardErrorKind::Timeout => "upstream-timeout",
                ForwardErrorKind::ConnectionRefused => "upstream-connection-refused",
                ForwardErrorKind::Unknown => "upstream-error",
            },
            Self::BadRequest(_) => "bad-request",
            Self::InternalError(_) => "internal",
        }
    }

    fn log(&self) {
        match self {
            // Typos and unmapped paths are expected traffic.
            Self::RouteNotFound { method, path } => {
                debug!(method = %method, path = %path, "No route matched")
            }
            Self::NoHealthyInstance { service } => {
                warn!(service = %service, "No healthy instance available")
            }
            // Gateway-level infrastructure trouble, not one backend's health.
            Self::Registry { service, source } => {
                error!(service = %service, error = %source, "Service registry unavailable")
            }
            Self::Forward { service, source } => {
                warn!(service = %service, kind = %source.kind, error = %source.message, "Forward failed")
            }
            Self::UnknownService(service) => debug!(service = %service, "Unknown service"),
            Self::BadRequest(msg) => debug!(error = %msg, "Bad request"),
            Self::InternalError(msg) => error!(error = %msg, "Internal gateway error"),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        self.log();
        let body = json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}

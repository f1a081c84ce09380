use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Errors raised while building the route table from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("Route pattern must start with '/': {0}")]
    MissingLeadingSlash(String),

    #[error("'**' is only allowed as the last segment of a pattern: {0}")]
    MisplacedMultiWildcard(String),

    #[error("Invalid segment '{segment}' in pattern {pattern}")]
    InvalidSegment { pattern: String, segment: String },

    #[error("Duplicate route name: {0}")]
    DuplicateName(String),

    #[error("Route {0} has an empty target service")]
    EmptyTarget(String),
}

/// The service directory could not answer a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Registry unreachable: {0}")]
    Unreachable(String),

    #[error("Invalid registry response: {0}")]
    InvalidResponse(String),
}

/// Failure classes of a single backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ForwardErrorKind {
    Timeout,
    ConnectionRefused,
    Unknown,
}

impl fmt::Display for ForwardErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::ConnectionRefused => write!(f, "connection refused"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A proxied call to a backend instance failed. Never retried by the gateway.
#[derive(Debug, Clone, Error)]
#[error("Forward failed ({kind}): {message}")]
pub struct ForwardError {
    pub kind: ForwardErrorKind,
    pub message: String,
}

impl ForwardError {
    pub fn new(kind: ForwardErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ForwardErrorKind::Timeout, message)
    }

    pub fn connection_refused(message: impl Into<String>) -> Self {
        Self::new(ForwardErrorKind::ConnectionRefused, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ForwardErrorKind::Unknown, message)
    }
}

/// Fetching one service's OpenAPI document failed.
///
/// Absorbed into that service's [`crate::docs::DocEntry`]; it never fails
/// the aggregation as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocsFetchError {
    #[error("No healthy instance of {0}")]
    NoInstance(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unexpected status {0}")]
    Status(u16),

    #[error("Malformed document: {0}")]
    Malformed(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

//! Gateway dispatch for proxied paths.

use apigw_core::has_dot_segment;
use axum::{
    body::Body,
    extract::State,
    http::Request,
    response::Response,
};
use tracing::debug;

use super::error::GatewayError;
use crate::server::AppState;

/// Gateway fallback handler for every path without an explicit route.
///
/// Resolution happens in a fixed order: route table match, registry
/// lookup, instance selection, then the forward itself. Paths with `.` or
/// `..` segments are rejected before matching.
///
/// **Important**: install with `.fallback()` so the gateway's own endpoints
/// are matched first.
pub async fn gateway_fallback_handler(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Result<Response, GatewayError> {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    // The forwarded URL would collapse these, escaping the matched route.
    if has_dot_segment(&path) {
        return Err(GatewayError::BadRequest(format!(
            "Dot segments are not allowed in proxied paths: {path}"
        )));
    }

    let rule = state
        .routes
        .resolve(&path)
        .ok_or_else(|| GatewayError::RouteNotFound {
            method: method.to_string(),
            path: path.clone(),
        })?;
    let service = rule.target_service.clone();

    debug!(
        method = %method,
        path = %path,
        route = %rule.name,
        service = %service,
        "Route matched"
    );

    let instances = state
        .registry
        .lookup(&service)
        .await
        .map_err(|source| GatewayError::Registry {
            service: service.clone(),
            source,
        })?;

    let instance = state
        .balancer
        .select(&service, &instances)
        .ok_or_else(|| GatewayError::NoHealthyInstance {
            service: service.clone(),
        })?;

    state
        .forwarder
        .forward(request, &instance)
        .await
        .map_err(|source| GatewayError::Forward { service, source })
}

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::{gateway::GatewayError, server::AppState};

/// Gateway path serving one service's OpenAPI document.
pub fn service_docs_location(service: &str) -> String {
    format!("/docs/services/{service}")
}

#[derive(Serialize)]
pub struct HealthResponse<'a> {
    status: &'a str,
}

/// Landing page listing the services reachable through the gateway.
pub async fn root(State(state): State<AppState>) -> impl IntoResponse {
    let services: Vec<Value> = state
        .routes
        .services()
        .into_iter()
        .map(|service| {
            let pattern = state
                .routes
                .rules_for(service)
                .next()
                .map(|rule| rule.pattern.as_str().to_string());
            json!({
                "name": service,
                "route": pattern,
                "docs": service_docs_location(service),
            })
        })
        .collect();

    let body = json!({
        "service": "API Gateway",
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "services": services,
        "documentation": {
            "aggregate": "/docs/aggregate",
            "openapi": "/docs/openapi.json",
            "resources": "/docs/resources",
        },
    });
    (StatusCode::OK, Json(body))
}

pub async fn health() -> impl IntoResponse {
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    let body = json!({
        "status": "UP",
        "service": "api-gateway",
        "timestamp": timestamp,
    });
    (StatusCode::OK, Json(body))
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

#[derive(Debug, Default, Deserialize)]
pub struct AggregateQuery {
    #[serde(default)]
    pub refresh: bool,
}

/// Documentation index keyed by service name.
///
/// Each value is the service's OpenAPI document or `{"error": ...}`. A
/// refresh runs first when asked for, or when no cycle has completed yet.
pub async fn docs_aggregate(
    State(state): State<AppState>,
    Query(query): Query<AggregateQuery>,
) -> impl IntoResponse {
    let mut catalog = state.docs.current_catalog();
    if query.refresh {
        catalog = state.docs.refresh().await;
    } else if catalog.generation() == 0 {
        catalog = state.docs.refresh_newer_than(0).await;
    }
    (StatusCode::OK, Json(catalog.index()))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EntryStatus<'a> {
    service_name: &'a str,
    has_document: bool,
    stale: bool,
    last_fetch_error: Option<&'a str>,
    #[serde(with = "time::serde::rfc3339::option")]
    fetched_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    last_success_at: Option<OffsetDateTime>,
}

/// Fetch bookkeeping of the current catalog, without the documents.
pub async fn docs_status(State(state): State<AppState>) -> impl IntoResponse {
    let catalog = state.docs.current_catalog();
    let services: Vec<EntryStatus<'_>> = catalog
        .entries()
        .map(|entry| EntryStatus {
            service_name: &entry.service_name,
            has_document: entry.document.is_some(),
            stale: entry.is_stale(),
            last_fetch_error: entry.last_fetch_error.as_deref(),
            fetched_at: entry.fetched_at,
            last_success_at: entry.last_success_at,
        })
        .collect();
    let refreshed_at = catalog
        .refreshed_at()
        .and_then(|at| at.format(&Rfc3339).ok());

    let body = json!({
        "generation": catalog.generation(),
        "refreshedAt": refreshed_at,
        "services": services,
    });
    (StatusCode::OK, Json(body))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SwaggerResource {
    name: String,
    location: String,
    swagger_version: &'static str,
}

/// Swagger UI resource list, one entry per service. Each location is served
/// by the gateway itself.
pub async fn docs_resources(State(state): State<AppState>) -> impl IntoResponse {
    let resources: Vec<SwaggerResource> = state
        .routes
        .services()
        .into_iter()
        .map(|service| SwaggerResource {
            name: service.to_string(),
            location: service_docs_location(service),
            swagger_version: "3.0",
        })
        .collect();
    (StatusCode::OK, Json(resources))
}

/// Single OpenAPI document built from every service's last good document.
pub async fn docs_openapi(State(state): State<AppState>) -> impl IntoResponse {
    let mut catalog = state.docs.current_catalog();
    if catalog.generation() == 0 {
        catalog = state.docs.refresh_newer_than(0).await;
    }
    let merged = apigw_core::merge_documents(&catalog, &state.config.docs.merge_info());
    (StatusCode::OK, Json(merged.document))
}

/// One service's entry from the documentation index.
pub async fn service_docs(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    let mut catalog = state.docs.current_catalog();
    if catalog.get(&service).is_none() {
        return Err(GatewayError::UnknownService(service));
    }
    if catalog.generation() == 0 {
        catalog = state.docs.refresh_newer_than(0).await;
    }
    catalog
        .get(&service)
        .map(|entry| Json(entry.index_value()))
        .ok_or(GatewayError::UnknownService(service))
}

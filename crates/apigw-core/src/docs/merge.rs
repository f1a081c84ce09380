//! Merge of per-service OpenAPI documents into one document.
//!
//! Only `paths` and `components` are merged, and `info` is replaced by the
//! gateway's own. Every other top-level key stays with its service document
//! in the catalog. When two services declare the same path or the same
//! component, the one registered first keeps it.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::warn;

use super::AggregatedCatalog;

const DEFAULT_OPENAPI_VERSION: &str = "3.0.1";

/// `info` block of the merged document.
#[derive(Debug, Clone)]
pub struct MergeInfo {
    pub title: String,
    pub version: String,
}

/// A path or component declared by more than one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeConflict {
    /// `paths` or `components.<kind>`
    pub section: String,
    pub key: String,
    pub kept_from: String,
    pub dropped_from: String,
}

#[derive(Debug, Clone)]
pub struct MergedDocument {
    pub document: Value,
    pub conflicts: Vec<MergeConflict>,
}

pub fn merge_documents(catalog: &AggregatedCatalog, info: &MergeInfo) -> MergedDocument {
    let mut openapi: Option<String> = None;
    let mut paths = Map::new();
    let mut path_owner: HashMap<String, &str> = HashMap::new();
    let mut components: Map<String, Value> = Map::new();
    let mut component_owner: HashMap<String, &str> = HashMap::new();
    let mut tags = Vec::new();
    let mut conflicts = Vec::new();

    for entry in catalog.entries() {
        let Some(document) = entry.document.as_ref().and_then(Value::as_object) else {
            continue;
        };
        let service = entry.service_name.as_str();
        tags.push(json!({ "name": service }));

        if openapi.is_none() {
            openapi = document
                .get("openapi")
                .and_then(Value::as_str)
                .map(str::to_string);
        }

        if let Some(service_paths) = document.get("paths").and_then(Value::as_object) {
            for (path, item) in service_paths {
                if let Some(owner) = path_owner.get(path) {
                    conflicts.push(conflict("paths", path, owner, service));
                    continue;
                }
                path_owner.insert(path.clone(), service);
                paths.insert(path.clone(), item.clone());
            }
        }

        if let Some(service_components) = document.get("components").and_then(Value::as_object) {
            for (kind, members) in service_components {
                let Some(members) = members.as_object() else {
                    continue;
                };
                let merged = components
                    .entry(kind.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                let Some(merged) = merged.as_object_mut() else {
                    continue;
                };
                for (name, component) in members {
                    let owner_key = format!("{kind}/{name}");
                    if let Some(owner) = component_owner.get(&owner_key) {
                        conflicts.push(conflict(&format!("components.{kind}"), name, owner, service));
                        continue;
                    }
                    component_owner.insert(owner_key, service);
                    merged.insert(name.clone(), component.clone());
                }
            }
        }
    }

    for c in &conflicts {
        warn!(
            section = %c.section,
            key = %c.key,
            kept_from = %c.kept_from,
            dropped_from = %c.dropped_from,
            "Conflicting OpenAPI declaration dropped from merged document"
        );
    }

    let document = json!({
        "openapi": openapi.unwrap_or_else(|| DEFAULT_OPENAPI_VERSION.to_string()),
        "info": { "title": info.title, "version": info.version },
        "tags": tags,
        "paths": paths,
        "components": components,
    });

    MergedDocument {
        document,
        conflicts,
    }
}

fn conflict(section: &str, key: &str, owner: &str, service: &str) -> MergeConflict {
    MergeConflict {
        section: section.to_string(),
        key: key.to_string(),
        kept_from: owner.to_string(),
        dropped_from: service.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docs::DocEntry;
    use indexmap::IndexMap;
    use time::OffsetDateTime;

    fn catalog(docs: Vec<(&str, Option<Value>)>) -> AggregatedCatalog {
        let now = OffsetDateTime::now_utc();
        let entries: IndexMap<String, DocEntry> = docs
            .into_iter()
            .map(|(name, doc)| {
                let outcome = doc.ok_or(crate::error::DocsFetchError::Status(503));
                (name.to_string(), DocEntry::pending(name).with_outcome(outcome, now))
            })
            .collect();
        AggregatedCatalog {
            entries,
            refreshed_at: Some(now),
            generation: 1,
        }
    }

    fn info() -> MergeInfo {
        MergeInfo {
            title: "API Gateway".into(),
            version: "1.0.0".into(),
        }
    }

    #[test]
    fn test_merges_paths_and_components() {
        let users = json!({
            "openapi": "3.0.1",
            "info": { "title": "Usuario Service", "version": "1.0" },
            "paths": { "/api/usuarios": { "get": {} } },
            "components": { "schemas": { "UsuarioDTO": { "type": "object" } } },
            "servers": [{ "url": "http://usuario-service:8081" }]
        });
        let orders = json!({
            "openapi": "3.0.1",
            "info": { "title": "Order Service", "version": "1.0" },
            "paths": { "/api/pedidos": { "post": {} } },
            "components": {
                "schemas": { "OrderDTO": { "type": "object" } },
                "securitySchemes": { "bearer": { "type": "http" } }
            }
        });

        let merged = merge_documents(
            &catalog(vec![("usuario-service", Some(users)), ("order-service", Some(orders))]),
            &info(),
        );

        let doc = &merged.document;
        assert!(merged.conflicts.is_empty());
        assert_eq!(doc["openapi"], "3.0.1");
        assert_eq!(doc["info"]["title"], "API Gateway");
        assert!(doc["paths"].get("/api/usuarios").is_some());
        assert!(doc["paths"].get("/api/pedidos").is_some());
        assert!(doc["components"]["schemas"].get("UsuarioDTO").is_some());
        assert!(doc["components"]["schemas"].get("OrderDTO").is_some());
        assert!(doc["components"]["securitySchemes"].get("bearer").is_some());
        assert!(doc.get("servers").is_none());
        assert_eq!(
            doc["tags"],
            json!([{ "name": "usuario-service" }, { "name": "order-service" }])
        );
    }

    #[test]
    fn test_first_registered_service_keeps_conflicting_entries() {
        let first = json!({
            "paths": { "/api/shared": { "get": { "summary": "first" } } },
            "components": { "schemas": { "Error": { "title": "first" } } }
        });
        let second = json!({
            "paths": { "/api/shared": { "get": { "summary": "second" } } },
            "components": { "schemas": { "Error": { "title": "second" } } }
        });

        let merged = merge_documents(
            &catalog(vec![("a", Some(first)), ("b", Some(second))]),
            &info(),
        );

        assert_eq!(merged.document["paths"]["/api/shared"]["get"]["summary"], "first");
        assert_eq!(merged.document["components"]["schemas"]["Error"]["title"], "first");
        assert_eq!(
            merged.conflicts,
            vec![
                MergeConflict {
                    section: "paths".into(),
                    key: "/api/shared".into(),
                    kept_from: "a".into(),
                    dropped_from: "b".into(),
                },
                MergeConflict {
                    section: "components.schemas".into(),
                    key: "Error".into(),
                    kept_from: "a".into(),
                    dropped_from: "b".into(),
                },
            ]
        );
    }

    #[test]
    fn test_services_without_documents_are_skipped() {
        let merged = merge_documents(
            &catalog(vec![
                ("down", None),
                ("up", Some(json!({ "paths": { "/x": {} } }))),
            ]),
            &info(),
        );

        assert_eq!(merged.document["openapi"], DEFAULT_OPENAPI_VERSION);
        assert_eq!(merged.document["tags"], json!([{ "name": "up" }]));
        assert!(merged.document["paths"].get("/x").is_some());
    }
}

//! OpenAPI documentation aggregation.
//!
//! The [`DocsAggregator`] asks every service referenced by the route table for
//! its OpenAPI document, concurrently and each under its own timeout, and
//! publishes the results as one [`AggregatedCatalog`]. The catalog is rebuilt
//! from scratch on every cycle and swapped in atomically: readers always see
//! a complete snapshot.
//!
//! A failed fetch only touches that service's [`DocEntry`]. A document that
//! was fetched before is kept and served stale next to the new error.

mod merge;

pub use merge::{MergeConflict, MergeInfo, MergedDocument, merge_documents};

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use futures_util::future::join_all;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Value, json};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::DocsFetchError;
use crate::route::RouteTable;

/// Cached OpenAPI document of one service plus the outcome of its last fetch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocEntry {
    pub service_name: String,
    pub document: Option<Value>,
    pub last_fetch_error: Option<String>,
    /// Time of the last fetch attempt.
    #[serde(with = "time::serde::rfc3339::option")]
    pub fetched_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_success_at: Option<OffsetDateTime>,
}

impl DocEntry {
    pub fn pending(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            document: None,
            last_fetch_error: None,
            fetched_at: None,
            last_success_at: None,
        }
    }

    /// Next state of this entry after a fetch finished at `at`.
    pub fn with_outcome(mut self, outcome: Result<Value, DocsFetchError>, at: OffsetDateTime) -> Self {
        self.fetched_at = Some(at);
        match outcome {
            Ok(document) => {
                self.document = Some(document);
                self.last_fetch_error = None;
                self.last_success_at = Some(at);
            }
            Err(err) => {
                self.last_fetch_error = Some(err.to_string());
            }
        }
        self
    }

    /// Holds a document from an earlier cycle while the latest fetch failed.
    pub fn is_stale(&self) -> bool {
        self.document.is_some() && self.last_fetch_error.is_some()
    }

    /// The value exposed by the aggregate docs index: the document when one is
    /// available, otherwise `{ "error": ... }`.
    pub fn index_value(&self) -> Value {
        match (&self.document, &self.last_fetch_error) {
            (Some(document), _) => document.clone(),
            (None, Some(error)) => json!({ "error": error }),
            (None, None) => json!({ "error": "documentation not fetched yet" }),
        }
    }
}

/// All services' doc entries, in route table registration order.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedCatalog {
    entries: IndexMap<String, DocEntry>,
    #[serde(with = "time::serde::rfc3339::option")]
    refreshed_at: Option<OffsetDateTime>,
    generation: u64,
}

impl AggregatedCatalog {
    pub fn get(&self, service_name: &str) -> Option<&DocEntry> {
        self.entries.get(service_name)
    }

    pub fn entries(&self) -> impl Iterator<Item = &DocEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of completed refresh cycles. Zero until the first one finishes.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn refreshed_at(&self) -> Option<OffsetDateTime> {
        self.refreshed_at
    }

    /// Service name to document (or error object), in registration order.
    pub fn index(&self) -> IndexMap<String, Value> {
        self.entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.index_value()))
            .collect()
    }
}

/// Where per-service OpenAPI documents come from.
#[async_trait]
pub trait DocsSource: Send + Sync {
    async fn fetch(&self, service_name: &str, docs_path: &str) -> Result<Value, DocsFetchError>;
}

/// Parses a fetched body into an OpenAPI document.
///
/// The body must be a JSON object; anything else is reported as malformed.
pub fn parse_document(body: &[u8]) -> Result<Value, DocsFetchError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| DocsFetchError::Malformed(e.to_string()))?;
    if !value.is_object() {
        return Err(DocsFetchError::Malformed(
            "document is not a JSON object".to_string(),
        ));
    }
    Ok(value)
}

#[derive(Debug, Clone)]
pub struct DocsSettings {
    /// Upper bound for each individual service fetch.
    pub fetch_timeout: Duration,
    /// Used for services whose routes do not name a docs path.
    pub default_docs_path: String,
}

impl Default for DocsSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(5),
            default_docs_path: "/v3/api-docs".to_string(),
        }
    }
}

pub struct DocsAggregator {
    routes: Arc<RouteTable>,
    source: Arc<dyn DocsSource>,
    settings: DocsSettings,
    catalog: ArcSwap<AggregatedCatalog>,
    /// Serializes refresh cycles so one never overwrites a newer one.
    refresh_lock: Mutex<()>,
}

impl DocsAggregator {
    pub fn new(routes: Arc<RouteTable>, source: Arc<dyn DocsSource>, settings: DocsSettings) -> Self {
        let initial = AggregatedCatalog {
            entries: routes
                .services()
                .into_iter()
                .map(|service| (service.to_string(), DocEntry::pending(service)))
                .collect(),
            refreshed_at: None,
            generation: 0,
        };
        Self {
            routes,
            source,
            settings,
            catalog: ArcSwap::from_pointee(initial),
            refresh_lock: Mutex::new(()),
        }
    }

    /// The last published catalog. Never blocks on a running refresh.
    pub fn current_catalog(&self) -> Arc<AggregatedCatalog> {
        self.catalog.load_full()
    }

    pub fn docs_path_for(&self, service_name: &str) -> String {
        self.routes
            .docs_path(service_name)
            .unwrap_or(&self.settings.default_docs_path)
            .to_string()
    }

    /// Fetches every service's document and publishes a new catalog.
    ///
    /// Completes once every fetch has returned or hit its timeout.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Arc<AggregatedCatalog> {
        let _guard = self.refresh_lock.lock().await;
        self.run_cycle().await
    }

    /// Like [`refresh`](Self::refresh), unless a catalog newer than
    /// `seen_generation` was published while waiting for the running cycle.
    /// Concurrent callers that saw the same generation share one cycle.
    #[instrument(skip(self))]
    pub async fn refresh_newer_than(&self, seen_generation: u64) -> Arc<AggregatedCatalog> {
        let _guard = self.refresh_lock.lock().await;
        let current = self.catalog.load_full();
        if current.generation > seen_generation {
            debug!(generation = current.generation, "Catalog already refreshed");
            return current;
        }
        self.run_cycle().await
    }

    /// One refresh cycle. Callers hold `refresh_lock`.
    async fn run_cycle(&self) -> Arc<AggregatedCatalog> {
        let previous = self.catalog.load_full();
        let timeout = self.settings.fetch_timeout;

        let fetches = self.routes.services().into_iter().map(|service| {
            let docs_path = self.docs_path_for(service);
            async move {
                let outcome =
                    match tokio::time::timeout(timeout, self.source.fetch(service, &docs_path)).await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(DocsFetchError::Timeout(timeout)),
                    };
                (service, docs_path, outcome)
            }
        });
        let results = join_all(fetches).await;

        let now = OffsetDateTime::now_utc();
        let mut entries = IndexMap::with_capacity(results.len());
        let mut failed = 0usize;
        for (service, docs_path, outcome) in results {
            match &outcome {
                Ok(_) => debug!(service, docs_path = %docs_path, "Fetched API docs"),
                Err(err) => {
                    failed += 1;
                    warn!(service, docs_path = %docs_path, error = %err, "API docs fetch failed");
                }
            }
            let entry = previous
                .get(service)
                .cloned()
                .unwrap_or_else(|| DocEntry::pending(service))
                .with_outcome(outcome, now);
            entries.insert(service.to_string(), entry);
        }

        let catalog = Arc::new(AggregatedCatalog {
            entries,
            refreshed_at: Some(now),
            generation: previous.generation + 1,
        });
        self.catalog.store(Arc::clone(&catalog));

        info!(
            services = catalog.len(),
            failed,
            generation = catalog.generation,
            "API docs catalog refreshed"
        );
        catalog
    }

    /// Refreshes immediately and then every `interval` until the task is aborted.
    pub fn spawn_refresh_loop(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.refresh().await;
            }
        })
    }
}

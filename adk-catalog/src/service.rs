//! The catalog service context.
//!
//! [`CatalogService`] is created once at startup from a [`CatalogConfig`]. It
//! owns the backend adapter, the registry and every engine component, and
//! exposes the operations served over HTTP. Each operation is bounded by the
//! configured request timeout.
//!
//! # Example
//!
//! ```rust,ignore
//! use adk_catalog::{CatalogConfig, CatalogService};
//!
//! let service = CatalogService::from_config(CatalogConfig::load()?)?;
//! service.reconcile_startup(None).await;
//! let hits = service.search("unspsc_categories", "laptop", 5).await?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::adapter::VectorBackend;
use crate::chroma::ChromaVectorStore;
use crate::config::{BackendConfig, BackendKind, CatalogConfig, EmbeddingConfig};
use crate::document::{CatalogItem, Collection, CollectionKind, ManualInfoEntry, SearchResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{CatalogError, Result};
use crate::inmemory::InMemoryVectorStore;
use crate::ingest::{IngestReport, IngestionPipeline};
use crate::manual::{ManualInfoManager, ManualInfoPage};
use crate::milvus::MilvusVectorStore;
use crate::openai::OpenAIEmbeddingProvider;
use crate::reconcile::{ReconcileOutcome, Reconciler};
use crate::registry::CollectionRegistry;
use crate::search::{SearchAllResults, SearchOrchestrator};
use crate::source::CatalogSource;
use crate::vectorstore::VectorStore;

/// Longest accepted collection name.
const MAX_COLLECTION_NAME_LEN: usize = 63;

/// Whether the catalog can be trusted to be complete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Readiness {
    /// Startup reconciliation has not finished.
    Initializing,
    Ready,
    /// Startup finished with problems; the catalog may be incomplete.
    Degraded { reasons: Vec<String> },
}

/// Snapshot reported by the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceStatus {
    pub backend: String,
    pub backend_connected: bool,
    pub readiness: Readiness,
    /// Empty when the backend is unreachable.
    pub collections: Vec<Collection>,
}

/// Build the vector store client for the configured backend.
pub fn vector_store_for(config: &BackendConfig) -> Arc<dyn VectorStore> {
    match config.kind {
        BackendKind::Chromadb => Arc::new(ChromaVectorStore::new(config.base_url())),
        BackendKind::Milvus => {
            let store = MilvusVectorStore::new(config.base_url());
            match &config.token {
                Some(token) => Arc::new(store.with_token(token.as_str())),
                None => Arc::new(store),
            }
        }
        BackendKind::Memory => Arc::new(InMemoryVectorStore::new()),
    }
}

/// Build the embedding provider for the configured endpoint.
pub fn embedding_provider_for(config: &EmbeddingConfig) -> Arc<dyn EmbeddingProvider> {
    let provider = OpenAIEmbeddingProvider::new(config.base_url.as_str()).with_model(config.model.as_str());
    let provider = if config.truncate_dimensions {
        provider.with_dimensions(config.dimensions)
    } else {
        provider.with_native_dimensions(config.dimensions)
    };
    match &config.api_key {
        Some(key) => Arc::new(provider.with_api_key(key.as_str())),
        None => Arc::new(provider),
    }
}

fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_COLLECTION_NAME_LEN {
        return Err(CatalogError::Validation(format!(
            "collection name must be 1..={MAX_COLLECTION_NAME_LEN} characters"
        )));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')) {
        return Err(CatalogError::Validation(format!(
            "collection name '{name}' may only contain letters, digits, '_', '-' and '.'"
        )));
    }
    Ok(())
}

/// Owns every catalog component for the lifetime of the process.
pub struct CatalogService {
    config: CatalogConfig,
    backend: Arc<VectorBackend>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    registry: Arc<CollectionRegistry>,
    pipeline: Arc<IngestionPipeline>,
    orchestrator: SearchOrchestrator,
    manual: ManualInfoManager,
    reconciler: Reconciler,
    readiness: RwLock<Readiness>,
    /// Last reconciliation outcome per collection in this process.
    reconciled: Mutex<HashMap<String, ReconcileOutcome>>,
    closed: AtomicBool,
}

impl CatalogService {
    /// Build the service with the backend and embedding endpoint named in `config`.
    pub fn from_config(config: CatalogConfig) -> Result<Self> {
        let store = vector_store_for(&config.backend);
        let embedding_provider = embedding_provider_for(&config.embedding);
        Self::new(config, store, embedding_provider)
    }

    /// Build the service around explicit components.
    pub fn new(
        config: CatalogConfig,
        store: Arc<dyn VectorStore>,
        embedding_provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        config.validate()?;

        let backend = Arc::new(
            VectorBackend::new(store, config.retry.clone())
                .with_call_timeout(Duration::from_secs(config.backend.call_timeout_secs.max(1))),
        );
        let registry = Arc::new(CollectionRegistry::new(config.collections.manual.as_str()));
        let pipeline = Arc::new(
            IngestionPipeline::builder()
                .backend(backend.clone())
                .embedding_provider(embedding_provider.clone())
                .batch_size(config.ingest.batch_size)
                .batch_retry_limit(config.ingest.batch_retry_limit)
                .build()?,
        );
        let orchestrator = SearchOrchestrator::new(
            backend.clone(),
            embedding_provider.clone(),
            registry.clone(),
            config.search.concurrency,
        );
        let manual = ManualInfoManager::new(
            backend.clone(),
            embedding_provider.clone(),
            config.collections.manual.as_str(),
        );
        let reconciler = Reconciler::new(backend.clone(), pipeline.clone(), embedding_provider.dimensions())
            .with_item_type(config.source.item_type.as_str())
            .with_system_code(config.source.system_code.as_str());

        info!(
            backend = backend.backend_name(),
            embedding = embedding_provider.name(),
            dimensions = embedding_provider.dimensions(),
            "catalog service created"
        );

        Ok(Self {
            config,
            backend,
            embedding_provider,
            registry,
            pipeline,
            orchestrator,
            manual,
            reconciler,
            readiness: RwLock::new(Readiness::Initializing),
            reconciled: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<VectorBackend> {
        &self.backend
    }

    /// Run `fut` under the request timeout, refusing work after shutdown.
    async fn timed<T>(&self, operation: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CatalogError::unavailable(self.backend.backend_name(), "service is shut down"));
        }
        match self.config.request_timeout() {
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                warn!(operation, timeout_secs = limit.as_secs(), "operation timed out");
                CatalogError::Timeout { operation: operation.to_string(), elapsed: limit }
            })?,
            None => fut.await,
        }
    }

    // ── Collections ────────────────────────────────────────────────

    /// Create a catalog collection sized for the embedding provider.
    pub async fn create_collection(&self, name: &str) -> Result<Collection> {
        validate_collection_name(name)?;
        self.timed("create_collection", async {
            self.backend.create_collection(name, self.embedding_provider.dimensions()).await?;
            self.registry.register(name, CollectionKind::Catalog).await;
            info!(collection = name, "created collection");
            self.registry.describe(&self.backend, name).await
        })
        .await
    }

    /// Delete a collection and everything in it.
    pub async fn delete_collection(&self, name: &str) -> Result<()> {
        self.timed("delete_collection", async {
            self.backend.delete_collection(name).await?;
            self.registry.remove(name).await;
            info!(collection = name, "deleted collection");
            Ok(())
        })
        .await
    }

    /// Every collection with a fresh item count.
    pub async fn list_collections(&self) -> Result<Vec<Collection>> {
        self.timed("list_collections", self.registry.list(&self.backend, self.config.search.concurrency))
            .await
    }

    // ── Ingestion and search ───────────────────────────────────────

    /// Ingest catalog items; see [`IngestionPipeline::ingest`].
    pub async fn ingest_batch(&self, collection: &str, items: Vec<CatalogItem>) -> Result<IngestReport> {
        self.timed("ingest_batch", self.pipeline.ingest(collection, items)).await
    }

    /// Top `limit` results of one collection.
    pub async fn search(&self, collection: &str, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        self.timed("search", self.orchestrator.search(collection, query, limit)).await
    }

    /// Search every non-manual collection.
    pub async fn search_all(
        &self,
        query: &str,
        limit_per_collection: usize,
        min_score: f32,
    ) -> Result<SearchAllResults> {
        self.timed("search_all", self.orchestrator.search_all(query, limit_per_collection, min_score)).await
    }

    /// Search the named collections, manual ones included if named.
    pub async fn search_collections(
        &self,
        query: &str,
        collections: &[String],
        limit_per_collection: usize,
        min_score: f32,
    ) -> Result<SearchAllResults> {
        self.timed(
            "search_collections",
            self.orchestrator.search_collections(query, collections, limit_per_collection, min_score),
        )
        .await
    }

    // ── Manual info ────────────────────────────────────────────────

    pub async fn rag_info_create(&self, key: &str, description: &str) -> Result<ManualInfoEntry> {
        self.timed("rag_info_create", self.manual.create(key, description)).await
    }

    pub async fn rag_info_get(&self, key: &str) -> Result<ManualInfoEntry> {
        self.timed("rag_info_get", self.manual.get(key)).await
    }

    pub async fn rag_info_update(&self, key: &str, description: &str) -> Result<ManualInfoEntry> {
        self.timed("rag_info_update", self.manual.update(key, description)).await
    }

    pub async fn rag_info_delete(&self, key: &str) -> Result<()> {
        self.timed("rag_info_delete", self.manual.delete(key)).await
    }

    pub async fn rag_info_list(
        &self,
        page: usize,
        limit: usize,
        search: Option<&str>,
    ) -> Result<ManualInfoPage> {
        self.timed("rag_info_list", self.manual.list(page, limit, search)).await
    }

    // ── Startup and lifecycle ──────────────────────────────────────

    /// Prepare the configured collections and reconcile the catalog collection.
    ///
    /// Creates the manual and common collections when absent, repairs manual
    /// entry metadata, then reconciles the catalog collection against `source`
    /// unless that already happened in this process. With `source = None` the
    /// catalog collection is only created. Never fails; problems are logged and
    /// reported through [`Readiness::Degraded`]. A collection left incomplete
    /// by an earlier run stays degraded even though a rerun finds it non-empty.
    pub async fn reconcile_startup(&self, source: Option<&dyn CatalogSource>) -> Vec<ReconcileOutcome> {
        *self.readiness.write().await = Readiness::Initializing;
        let mut reasons = Vec::new();
        let collections = &self.config.collections;

        if let Err(e) = self.manual.ensure_collection().await {
            reasons.push(format!("manual collection '{}': {e}", collections.manual));
        } else {
            match self.manual.repair_metadata().await {
                Ok(0) => {}
                Ok(repaired) => info!(repaired, "repaired manual info entries"),
                Err(e) => warn!(error = %e, "manual info metadata repair failed"),
            }
        }

        let mut catalog = vec![collections.catalog.clone()];
        if collections.common != collections.catalog {
            catalog.push(collections.common.clone());
        }
        for name in &catalog {
            self.registry.register(name, CollectionKind::Catalog).await;
        }
        if let Err(e) = self.ensure_catalog_collection(&collections.common).await {
            reasons.push(format!("collection '{}': {e}", collections.common));
        }

        let mut outcomes = Vec::new();
        match source {
            Some(source) => {
                let mut reconciled = self.reconciled.lock().await;
                let previous = reconciled.get(&collections.catalog).cloned();
                if previous.as_ref().is_some_and(ReconcileOutcome::is_healthy) {
                    info!(collection = %collections.catalog, "already reconciled in this process");
                } else {
                    let outcome = self.reconciler.reconcile(&collections.catalog, source).await;
                    match previous {
                        // The non-empty collection is what the incomplete run left behind.
                        Some(earlier)
                            if earlier.left_partial_data()
                                && matches!(outcome, ReconcileOutcome::AlreadyPopulated { .. }) =>
                        {
                            warn!(
                                collection = %collections.catalog,
                                "collection still holds an incomplete reconciliation"
                            );
                            reasons.push(describe_unhealthy(&collections.catalog, &earlier));
                        }
                        _ => {
                            if !outcome.is_healthy() {
                                reasons.push(describe_unhealthy(&collections.catalog, &outcome));
                            }
                            reconciled.insert(collections.catalog.clone(), outcome.clone());
                        }
                    }
                    outcomes.push(outcome);
                }
            }
            None => {
                if let Err(e) = self.ensure_catalog_collection(&collections.catalog).await {
                    reasons.push(format!("collection '{}': {e}", collections.catalog));
                }
            }
        }

        let readiness = if reasons.is_empty() {
            Readiness::Ready
        } else {
            warn!(reasons = ?reasons, "catalog service degraded");
            Readiness::Degraded { reasons }
        };
        info!(readiness = ?readiness, "startup reconciliation finished");
        *self.readiness.write().await = readiness;
        outcomes
    }

    async fn ensure_catalog_collection(&self, name: &str) -> Result<()> {
        if self.backend.exists(name).await? {
            return Ok(());
        }
        match self.backend.create_collection(name, self.embedding_provider.dimensions()).await {
            Ok(_) | Err(CatalogError::DuplicateCollection(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Record a startup problem found outside [`reconcile_startup`](Self::reconcile_startup).
    pub async fn mark_degraded(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(reason = %reason, "catalog service degraded");
        let mut readiness = self.readiness.write().await;
        match &mut *readiness {
            Readiness::Degraded { reasons } => reasons.push(reason),
            other => *other = Readiness::Degraded { reasons: vec![reason] },
        }
    }

    /// Current readiness.
    pub async fn readiness(&self) -> Readiness {
        self.readiness.read().await.clone()
    }

    /// Backend connectivity, readiness and collections.
    pub async fn status(&self) -> ServiceStatus {
        let backend_connected = self.backend.heartbeat().await.is_ok();
        let collections = if backend_connected {
            self.list_collections().await.unwrap_or_else(|e| {
                warn!(error = %e, "failed to list collections for status");
                Vec::new()
            })
        } else {
            Vec::new()
        };
        ServiceStatus {
            backend: self.backend.backend_name().to_string(),
            backend_connected,
            readiness: self.readiness().await,
            collections,
        }
    }

    /// Refuse further operations. In-flight operations finish normally.
    pub async fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("catalog service shut down");
        }
    }

    /// Whether [`shutdown`](Self::shutdown) was called.
    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

fn describe_unhealthy(collection: &str, outcome: &ReconcileOutcome) -> String {
    match outcome {
        ReconcileOutcome::Failed { state, error } => {
            format!("reconciliation of '{collection}' failed in {state:?}: {error}")
        }
        ReconcileOutcome::Populated { report } => format!(
            "reconciliation of '{collection}' stored {} items, {} failed",
            report.succeeded.len(),
            report.failed_count()
        ),
        other => format!("reconciliation of '{collection}': {other:?}"),
    }
}

//! The uniform vector backend contract.
//!
//! [`VectorBackend`] wraps one [`VectorStore`] client and applies the parts
//! of the contract every backend shares: per-call timeouts, bounded retries
//! of transient failures, and normalization of native distances into
//! `[0, 1]` similarity scores with a deterministic order.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::document::{Collection, CollectionKind, Payload, SearchResult, VectorRecord};
use crate::error::{CatalogError, Result};
use crate::retry::{RetryConfig, retry_with_backoff};
use crate::vectorstore::VectorStore;

/// Default per-call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Extra hits requested from the backend so score ties at the `k`-th
/// position are broken by id here rather than by the backend.
const QUERY_OVERFETCH: usize = 8;

/// A [`VectorStore`] behind retries, timeouts and score normalization.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use adk_catalog::{InMemoryVectorStore, RetryConfig, VectorBackend};
///
/// let backend = VectorBackend::new(Arc::new(InMemoryVectorStore::new()), RetryConfig::default());
/// backend.create_collection("unspsc_categories", 384).await?;
/// let hits = backend.query("unspsc_categories", &query_vector, 5).await?;
/// assert!(hits.iter().all(|h| (0.0..=1.0).contains(&h.score)));
/// ```
pub struct VectorBackend {
    store: Arc<dyn VectorStore>,
    retry: RetryConfig,
    call_timeout: Duration,
}

impl VectorBackend {
    /// Wrap a store with the given retry policy and the default call timeout.
    pub fn new(store: Arc<dyn VectorStore>, retry: RetryConfig) -> Self {
        Self { store, retry, call_timeout: DEFAULT_CALL_TIMEOUT }
    }

    /// Set the per-call timeout. An elapsed call counts as a transient failure.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Backend name of the wrapped store.
    pub fn backend_name(&self) -> &str {
        self.store.backend_name()
    }

    /// The retry policy applied to every call.
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    async fn call<T, F, Fut>(&self, operation: &str, retry: &RetryConfig, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let backend = self.store.backend_name();
        let timeout = self.call_timeout;
        retry_with_backoff(operation, retry, CatalogError::is_transient, || {
            let fut = f();
            async move {
                match tokio::time::timeout(timeout, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(CatalogError::unavailable(
                        backend,
                        format!("{operation} timed out after {timeout:?}"),
                    )),
                }
            }
        })
        .await
    }

    /// Check the backend is reachable.
    pub async fn heartbeat(&self) -> Result<()> {
        self.call("heartbeat", &self.retry, || self.store.heartbeat()).await
    }

    /// Create a collection. Fails with `DuplicateCollection` if the name is taken.
    pub async fn create_collection(&self, name: &str, dimensions: usize) -> Result<Collection> {
        self.call("create_collection", &self.retry, || self.store.create_collection(name, dimensions))
            .await?;
        debug!(collection = name, dimensions, backend = self.backend_name(), "created collection");
        Ok(Collection { name: name.to_string(), kind: CollectionKind::Catalog, item_count: 0 })
    }

    /// Delete a collection. Fails with `CollectionNotFound` if absent.
    pub async fn delete_collection(&self, name: &str) -> Result<()> {
        self.call("delete_collection", &self.retry, || self.store.delete_collection(name)).await?;
        debug!(collection = name, backend = self.backend_name(), "deleted collection");
        Ok(())
    }

    /// Names of every collection, sorted.
    pub async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names =
            self.call("list_collections", &self.retry, || self.store.list_collections()).await?;
        names.sort();
        Ok(names)
    }

    /// Whether the named collection exists.
    pub async fn exists(&self, name: &str) -> Result<bool> {
        self.call("collection_exists", &self.retry, || self.store.collection_exists(name)).await
    }

    /// Insert or overwrite records by id using the adapter's retry policy.
    pub async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
        self.upsert_with_policy(collection, records, &self.retry).await
    }

    /// Insert or overwrite records by id, retrying any non-precondition
    /// failure of the whole call according to `retry`.
    pub async fn upsert_with_policy(
        &self,
        collection: &str,
        records: &[VectorRecord],
        retry: &RetryConfig,
    ) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        if let Some(record) = records.iter().find(|r| r.embedding.is_empty()) {
            return Err(CatalogError::Validation(format!(
                "record '{}' has no embedding",
                record.id
            )));
        }
        let backend = self.store.backend_name();
        let timeout = self.call_timeout;
        retry_with_backoff(
            "upsert",
            retry,
            |e: &CatalogError| !e.is_precondition(),
            || async move {
                match tokio::time::timeout(timeout, self.store.upsert(collection, records)).await {
                    Ok(result) => result,
                    Err(_) => Err(CatalogError::unavailable(
                        backend,
                        format!("upsert timed out after {timeout:?}"),
                    )),
                }
            },
        )
        .await?;
        debug!(collection, count = records.len(), backend, "upserted records");
        Ok(())
    }

    /// Return at most `k` results ordered by descending similarity, ties
    /// broken by ascending id. Every score lies in `[0, 1]`.
    pub async fn query(&self, collection: &str, vector: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let fetch = k.saturating_add(QUERY_OVERFETCH);
        let hits = self.call("query", &self.retry, || self.store.query(collection, vector, fetch)).await?;
        let metric = self.store.metric();

        let mut results: Vec<SearchResult> = hits
            .into_iter()
            .map(|hit| SearchResult {
                collection: collection.to_string(),
                id: hit.record.id.clone(),
                score: metric.to_similarity(hit.raw_score),
                payload: Payload::from_record(&hit.record),
            })
            .collect();

        results.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        if results.len() > fetch {
            warn!(collection, returned = results.len(), requested = fetch, "backend returned more hits than requested");
        }
        results.truncate(k);
        Ok(results)
    }

    /// Number of records in the collection, read from the backend.
    pub async fn count(&self, collection: &str) -> Result<u64> {
        self.call("count", &self.retry, || self.store.count(collection)).await
    }

    /// Fetch records by id.
    pub async fn get(&self, collection: &str, ids: &[&str]) -> Result<Vec<VectorRecord>> {
        self.call("get", &self.retry, || self.store.get(collection, ids)).await
    }

    /// Delete records by id.
    pub async fn delete(&self, collection: &str, ids: &[&str]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.call("delete", &self.retry, || self.store.delete(collection, ids)).await
    }

    /// Every record of the collection, without embeddings.
    pub async fn list_records(&self, collection: &str) -> Result<Vec<VectorRecord>> {
        self.call("list_records", &self.retry, || self.store.list_records(collection)).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::document::ScoredRecord;
    use crate::vectorstore::DistanceMetric;

    /// Returns fixed hits and fails the first `failures` queries.
    struct ScriptedStore {
        metric: DistanceMetric,
        hits: Vec<(&'static str, f32)>,
        failures: u32,
        calls: AtomicU32,
        requested_k: AtomicUsize,
    }

    impl ScriptedStore {
        fn new(metric: DistanceMetric, hits: Vec<(&'static str, f32)>) -> Self {
            Self { metric, hits, failures: 0, calls: AtomicU32::new(0), requested_k: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl VectorStore for ScriptedStore {
        fn backend_name(&self) -> &str {
            "scripted"
        }
        fn metric(&self) -> DistanceMetric {
            self.metric
        }
        async fn heartbeat(&self) -> Result<()> {
            Ok(())
        }
        async fn create_collection(&self, _name: &str, _dimensions: usize) -> Result<()> {
            Ok(())
        }
        async fn delete_collection(&self, name: &str) -> Result<()> {
            Err(CatalogError::CollectionNotFound(name.to_string()))
        }
        async fn list_collections(&self) -> Result<Vec<String>> {
            Ok(vec!["b".into(), "a".into()])
        }
        async fn upsert(&self, _collection: &str, _records: &[VectorRecord]) -> Result<()> {
            Ok(())
        }
        async fn query(&self, collection: &str, _vector: &[f32], k: usize) -> Result<Vec<ScoredRecord>> {
            self.requested_k.store(k, Ordering::SeqCst);
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(CatalogError::unavailable("scripted", "connection refused"));
            }
            Ok(self
                .hits
                .iter()
                .take(k)
                .map(|(id, raw)| ScoredRecord {
                    record: VectorRecord {
                        id: id.to_string(),
                        embedding: vec![],
                        document: String::new(),
                        metadata: HashMap::new(),
                        collection: collection.to_string(),
                    },
                    raw_score: *raw,
                })
                .collect())
        }
        async fn count(&self, _collection: &str) -> Result<u64> {
            Ok(self.hits.len() as u64)
        }
        async fn get(&self, _collection: &str, _ids: &[&str]) -> Result<Vec<VectorRecord>> {
            Ok(vec![])
        }
        async fn delete(&self, _collection: &str, _ids: &[&str]) -> Result<()> {
            Ok(())
        }
        async fn list_records(&self, _collection: &str) -> Result<Vec<VectorRecord>> {
            Ok(vec![])
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig::default().with_initial_delay(1).without_jitter()
    }

    #[tokio::test]
    async fn query_normalizes_and_breaks_ties_by_id() {
        let store = ScriptedStore::new(
            DistanceMetric::L2,
            vec![("c", 1.0), ("b", 0.0), ("a", 1.0), ("d", 3.0)],
        );
        let backend = VectorBackend::new(Arc::new(store), fast_retry());
        let results = backend.query("col", &[1.0], 10).await.unwrap();

        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c", "d"]);
        assert_eq!(results[0].score, 1.0);
        assert_eq!(results[1].score, 0.5);
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.score)));
    }

    #[tokio::test]
    async fn query_truncates_to_k() {
        let store = ScriptedStore::new(
            DistanceMetric::CosineSimilarity,
            vec![("a", 0.9), ("b", 0.8), ("c", 0.7)],
        );
        let backend = VectorBackend::new(Arc::new(store), fast_retry());
        let results = backend.query("col", &[1.0], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(backend.query("col", &[1.0], 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ties_at_the_cutoff_are_decided_by_id() {
        // The backend lists equal scores in its own order and cuts at whatever k it is given.
        let store = Arc::new(ScriptedStore::new(
            DistanceMetric::CosineSimilarity,
            vec![("d", 0.9), ("c", 0.5), ("b", 0.5), ("a", 0.5)],
        ));
        let backend = VectorBackend::new(store.clone(), fast_retry());

        let results = backend.query("col", &[1.0], 2).await.unwrap();

        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["d", "a"]);
        assert!(store.requested_k.load(Ordering::SeqCst) > 2);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let mut store = ScriptedStore::new(DistanceMetric::CosineDistance, vec![("a", 0.1)]);
        store.failures = 2;
        let store = Arc::new(store);
        let backend = VectorBackend::new(store.clone(), fast_retry().with_max_retries(3));

        let results = backend.query("col", &[1.0], 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_backend_unavailable() {
        let mut store = ScriptedStore::new(DistanceMetric::CosineDistance, vec![]);
        store.failures = u32::MAX;
        let store = Arc::new(store);
        let backend = VectorBackend::new(store.clone(), fast_retry().with_max_retries(2));

        let err = backend.query("col", &[1.0], 1).await.unwrap_err();
        assert!(matches!(err, CatalogError::BackendUnavailable { .. }));
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn preconditions_are_not_retried() {
        let backend = VectorBackend::new(
            Arc::new(ScriptedStore::new(DistanceMetric::L2, vec![])),
            fast_retry(),
        );
        let err = backend.delete_collection("missing").await.unwrap_err();
        assert!(matches!(err, CatalogError::CollectionNotFound(_)));
    }

    #[tokio::test]
    async fn upsert_rejects_records_without_embeddings() {
        let backend = VectorBackend::new(
            Arc::new(ScriptedStore::new(DistanceMetric::L2, vec![])),
            fast_retry(),
        );
        let record = VectorRecord {
            id: "x".into(),
            embedding: vec![],
            document: "x".into(),
            metadata: HashMap::new(),
            collection: "col".into(),
        };
        let err = backend.upsert("col", &[record]).await.unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
    }

    #[tokio::test]
    async fn collections_are_listed_sorted() {
        let backend = VectorBackend::new(
            Arc::new(ScriptedStore::new(DistanceMetric::L2, vec![])),
            fast_retry(),
        );
        assert_eq!(backend.list_collections().await.unwrap(), vec!["a", "b"]);
    }
}

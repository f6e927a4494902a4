//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use adk_catalog::document::{ScoredRecord, VectorRecord};
use adk_catalog::{
    BackendKind, CatalogConfig, CatalogError, CatalogItem, CatalogService, CatalogSource,
    DistanceMetric, EmbeddingProvider, InMemoryVectorStore, Result, RetryConfig, SourceRecord,
    VectorBackend, VectorStore,
};
use async_trait::async_trait;

pub const DIM: usize = 256;

/// Texts containing this marker make the embedder fail the whole batch.
pub const EMBED_FAIL: &str = "EMBED_FAIL";

/// Deterministic bag-of-words embedder: each lowercase token increments one
/// FNV-hashed bucket, and the vector is L2-normalized.
#[derive(Default)]
pub struct HashEmbedder {
    pub embed_calls: AtomicUsize,
    pub batch_calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIM];
        for token in text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            v[bucket(&token.to_lowercase())] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

fn bucket(token: &str) -> usize {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in token.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (hash % DIM as u64) as usize
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn name(&self) -> &str {
        "hash"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if text.contains(EMBED_FAIL) {
            return Err(CatalogError::EmbeddingFailure {
                provider: "hash".into(),
                message: "refused".into(),
            });
        }
        Ok(Self::vector(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if texts.iter().any(|t| t.contains(EMBED_FAIL)) {
            return Err(CatalogError::EmbeddingFailure {
                provider: "hash".into(),
                message: "refused batch".into(),
            });
        }
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }

    fn dimensions(&self) -> usize {
        DIM
    }
}

/// An in-memory store with injectable failures and call counters.
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryVectorStore,
    pub upsert_calls: AtomicUsize,
    pub query_calls: AtomicUsize,
    /// Upserts containing any of these ids always fail.
    pub poisoned_ids: Mutex<HashSet<String>>,
    /// The next `n` upserts fail transiently.
    pub transient_upsert_failures: AtomicU32,
    /// Queries against these collections always fail.
    pub failing_collections: Mutex<HashSet<String>>,
    /// Every call sleeps this long first.
    pub delay: Mutex<Option<Duration>>,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn poison(&self, id: &str) {
        self.poisoned_ids.lock().unwrap().insert(id.to_string());
    }

    pub fn fail_queries_on(&self, collection: &str) {
        self.failing_collections.lock().unwrap().insert(collection.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn upserts(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl VectorStore for FlakyStore {
    fn backend_name(&self) -> &str {
        "flaky"
    }

    fn metric(&self) -> DistanceMetric {
        self.inner.metric()
    }

    async fn heartbeat(&self) -> Result<()> {
        self.pause().await;
        self.inner.heartbeat().await
    }

    async fn create_collection(&self, name: &str, dimensions: usize) -> Result<()> {
        self.inner.create_collection(name, dimensions).await
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.inner.delete_collection(name).await
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        self.inner.list_collections().await
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        self.inner.collection_exists(name).await
    }

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let pending = self.transient_upsert_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.transient_upsert_failures.store(pending - 1, Ordering::SeqCst);
            return Err(CatalogError::BackendUnavailable {
                backend: "flaky".into(),
                message: "connection reset".into(),
            });
        }
        let poisoned = {
            let ids = self.poisoned_ids.lock().unwrap();
            records.iter().any(|r| ids.contains(&r.id))
        };
        if poisoned {
            return Err(CatalogError::BackendUnavailable {
                backend: "flaky".into(),
                message: "write rejected".into(),
            });
        }
        self.inner.upsert(collection, records).await
    }

    async fn query(&self, collection: &str, vector: &[f32], k: usize) -> Result<Vec<ScoredRecord>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.failing_collections.lock().unwrap().contains(collection) {
            return Err(CatalogError::Backend {
                backend: "flaky".into(),
                message: format!("index for {collection} is corrupt"),
            });
        }
        self.inner.query(collection, vector, k).await
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        self.inner.count(collection).await
    }

    async fn get(&self, collection: &str, ids: &[&str]) -> Result<Vec<VectorRecord>> {
        self.inner.get(collection, ids).await
    }

    async fn delete(&self, collection: &str, ids: &[&str]) -> Result<()> {
        self.inner.delete(collection, ids).await
    }

    async fn list_records(&self, collection: &str) -> Result<Vec<VectorRecord>> {
        self.inner.list_records(collection).await
    }
}

/// A source returning fixed rows.
#[derive(Default)]
pub struct VecSource {
    pub rows: Vec<SourceRecord>,
    pub fetches: AtomicUsize,
    pub fail: bool,
}

impl VecSource {
    pub fn new(rows: Vec<SourceRecord>) -> Self {
        Self { rows, ..Self::default() }
    }

    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogSource for VecSource {
    fn name(&self) -> &str {
        "vec"
    }

    async fn fetch(&self) -> Result<Vec<SourceRecord>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(CatalogError::Source("connection refused".into()));
        }
        Ok(self.rows.clone())
    }
}

/// Retry policy with millisecond delays.
pub fn fast_retry() -> RetryConfig {
    RetryConfig::default().with_initial_delay(1).with_max_delay(5).without_jitter()
}

pub fn backend(store: Arc<dyn VectorStore>) -> Arc<VectorBackend> {
    Arc::new(VectorBackend::new(store, fast_retry()))
}

pub fn notebook() -> CatalogItem {
    CatalogItem::new("43211503", "Notebook computer", "A portable personal computer")
        .with_hierarchy("IT > Hardware > Computers")
}

/// `count` items with codes `item-00`, `item-01`, ...
pub fn numbered_items(count: usize) -> Vec<CatalogItem> {
    (0..count)
        .map(|i| CatalogItem::new(format!("item-{i:02}"), format!("Item {i}"), format!("Description {i}")))
        .collect()
}

pub fn memory_config() -> CatalogConfig {
    let mut config = CatalogConfig::builder()
        .backend(BackendKind::Memory)
        .batch_size(3)
        .batch_retry_limit(1)
        .retry(fast_retry())
        .embedding_dimensions(DIM)
        .build()
        .expect("valid config");
    config.source.item_type = "unspsc_commodity".into();
    config
}

pub fn service_with(store: Arc<dyn VectorStore>, config: CatalogConfig) -> (CatalogService, Arc<HashEmbedder>) {
    let embedder = HashEmbedder::new();
    let service = CatalogService::new(config, store, embedder.clone()).expect("service builds");
    (service, embedder)
}

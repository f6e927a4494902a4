//! Vector store trait implemented once per backend technology.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::{ScoredRecord, VectorRecord};
use crate::error::Result;

/// The native distance or score a backend reports for query hits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// `1 - cos(a, b)`; lower is better (Chroma `cosine` space).
    CosineDistance,
    /// `cos(a, b)`; higher is better (Milvus `COSINE`).
    CosineSimilarity,
    /// Euclidean distance; lower is better.
    L2,
    /// Dot product; higher is better.
    InnerProduct,
}

impl DistanceMetric {
    /// Map a native value onto the `[0, 1]` similarity scale.
    ///
    /// The mapping is monotonic in closeness and non-finite inputs map to 0.
    pub fn to_similarity(self, raw: f32) -> f32 {
        if !raw.is_finite() {
            return 0.0;
        }
        let similarity = match self {
            Self::CosineDistance => 1.0 - raw,
            Self::CosineSimilarity | Self::InnerProduct => raw,
            Self::L2 => 1.0 / (1.0 + raw.max(0.0)),
        };
        similarity.clamp(0.0, 1.0)
    }
}

/// A storage backend for vector records with similarity search.
///
/// Implementations are thin clients: they translate calls into the
/// backend's native API and report errors as
/// [`CatalogError`](crate::CatalogError) variants. Score normalization,
/// ordering, retries and timeouts are applied by
/// [`VectorBackend`](crate::adapter::VectorBackend).
///
/// Connectivity failures must be reported as
/// [`BackendUnavailable`](crate::CatalogError::BackendUnavailable) so the
/// adapter can retry them.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Backend name for logs and errors.
    fn backend_name(&self) -> &str;

    /// The metric of [`ScoredRecord::raw_score`] values returned by [`query`](Self::query).
    fn metric(&self) -> DistanceMetric;

    /// Check the backend is reachable.
    async fn heartbeat(&self) -> Result<()>;

    /// Create a named collection. Fails with `DuplicateCollection` if it exists.
    async fn create_collection(&self, name: &str, dimensions: usize) -> Result<()>;

    /// Delete a named collection and all its data. Fails with `CollectionNotFound` if absent.
    async fn delete_collection(&self, name: &str) -> Result<()>;

    /// Names of every collection in the backend.
    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Whether the named collection exists.
    async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.list_collections().await?.iter().any(|c| c == name))
    }

    /// Insert or overwrite records by id. Records must have embeddings set.
    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<()>;

    /// Return up to `k` nearest records with their native scores.
    async fn query(&self, collection: &str, vector: &[f32], k: usize) -> Result<Vec<ScoredRecord>>;

    /// Number of records in the collection.
    async fn count(&self, collection: &str) -> Result<u64>;

    /// Fetch records by id. Missing ids are skipped.
    async fn get(&self, collection: &str, ids: &[&str]) -> Result<Vec<VectorRecord>>;

    /// Delete records by id.
    async fn delete(&self, collection: &str, ids: &[&str]) -> Result<()>;

    /// Every record of the collection, without embeddings.
    async fn list_records(&self, collection: &str) -> Result<Vec<VectorRecord>>;
}

/// Flatten backend JSON metadata into string values. Nulls are dropped.
pub(crate) fn metadata_to_strings(metadata: Option<Map<String, Value>>) -> HashMap<String, String> {
    metadata
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(k, v)| match v {
            Value::Null => None,
            Value::String(s) => Some((k, s)),
            other => Some((k, other.to_string())),
        })
        .collect()
}

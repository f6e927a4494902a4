//! In-memory vector store using cosine distance.
//!
//! This module provides [`InMemoryVectorStore`], a zero-dependency vector store
//! backed by a `BTreeMap` protected by a `tokio::sync::RwLock`. It reports
//! distances the way Chroma's `cosine` space does, which makes it a faithful
//! stand-in for development and tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::document::{ScoredRecord, VectorRecord};
use crate::error::{CatalogError, Result};
use crate::vectorstore::{DistanceMetric, VectorStore};

type Records = BTreeMap<String, VectorRecord>;

/// An in-memory vector store using cosine distance for search.
///
/// Collections are stored as nested maps: collection name → record ID → record.
///
/// # Example
///
/// ```rust,ignore
/// use adk_catalog::{InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new();
/// store.create_collection("unspsc_categories", 384).await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<BTreeMap<String, Records>>,
}

impl InMemoryVectorStore {
    /// Create a new empty in-memory vector store.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Compute cosine distance (`1 - cos`) between two vectors.
///
/// Returns 1.0 (orthogonal) if either vector has zero magnitude.
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

fn missing(collection: &str) -> CatalogError {
    CatalogError::CollectionNotFound(collection.to_string())
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn backend_name(&self) -> &str {
        "memory"
    }

    fn metric(&self) -> DistanceMetric {
        DistanceMetric::CosineDistance
    }

    async fn heartbeat(&self) -> Result<()> {
        Ok(())
    }

    async fn create_collection(&self, name: &str, _dimensions: usize) -> Result<()> {
        let mut collections = self.collections.write().await;
        if collections.contains_key(name) {
            return Err(CatalogError::DuplicateCollection(name.to_string()));
        }
        collections.insert(name.to_string(), Records::new());
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let mut collections = self.collections.write().await;
        collections.remove(name).map(|_| ()).ok_or_else(|| missing(name))
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        Ok(self.collections.read().await.keys().cloned().collect())
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.collections.read().await.contains_key(name))
    }

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
        let mut collections = self.collections.write().await;
        let store = collections.get_mut(collection).ok_or_else(|| missing(collection))?;
        for record in records {
            let mut record = record.clone();
            record.collection = collection.to_string();
            store.insert(record.id.clone(), record);
        }
        Ok(())
    }

    async fn query(&self, collection: &str, vector: &[f32], k: usize) -> Result<Vec<ScoredRecord>> {
        let collections = self.collections.read().await;
        let store = collections.get(collection).ok_or_else(|| missing(collection))?;

        let mut scored: Vec<ScoredRecord> = store
            .values()
            .map(|record| ScoredRecord {
                raw_score: cosine_distance(&record.embedding, vector),
                record: record.clone(),
            })
            .collect();

        scored.sort_by(|a, b| a.raw_score.total_cmp(&b.raw_score));
        scored.truncate(k);
        Ok(scored)
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        let collections = self.collections.read().await;
        collections.get(collection).map(|s| s.len() as u64).ok_or_else(|| missing(collection))
    }

    async fn get(&self, collection: &str, ids: &[&str]) -> Result<Vec<VectorRecord>> {
        let collections = self.collections.read().await;
        let store = collections.get(collection).ok_or_else(|| missing(collection))?;
        Ok(ids.iter().filter_map(|id| store.get(*id).cloned()).collect())
    }

    async fn delete(&self, collection: &str, ids: &[&str]) -> Result<()> {
        let mut collections = self.collections.write().await;
        let store = collections.get_mut(collection).ok_or_else(|| missing(collection))?;
        for id in ids {
            store.remove(*id);
        }
        Ok(())
    }

    async fn list_records(&self, collection: &str) -> Result<Vec<VectorRecord>> {
        let collections = self.collections.read().await;
        let store = collections.get(collection).ok_or_else(|| missing(collection))?;
        Ok(store.values().map(|r| VectorRecord { embedding: Vec::new(), ..r.clone() }).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn record(id: &str, embedding: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            embedding,
            document: format!("doc {id}"),
            metadata: HashMap::new(),
            collection: String::new(),
        }
    }

    #[tokio::test]
    async fn duplicate_and_missing_collections_are_errors() {
        let store = InMemoryVectorStore::new();
        store.create_collection("a", 2).await.unwrap();
        assert!(matches!(
            store.create_collection("a", 2).await,
            Err(CatalogError::DuplicateCollection(name)) if name == "a"
        ));
        assert!(matches!(
            store.delete_collection("b").await,
            Err(CatalogError::CollectionNotFound(name)) if name == "b"
        ));
    }

    #[tokio::test]
    async fn upsert_overwrites_by_id() {
        let store = InMemoryVectorStore::new();
        store.create_collection("a", 2).await.unwrap();
        store.upsert("a", &[record("x", vec![1.0, 0.0])]).await.unwrap();
        store.upsert("a", &[record("x", vec![0.0, 1.0])]).await.unwrap();

        assert_eq!(store.count("a").await.unwrap(), 1);
        let hits = store.query("a", &[0.0, 1.0], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].raw_score.abs() < 1e-6);
        assert_eq!(hits[0].record.collection, "a");
    }

    #[test]
    fn zero_vectors_are_orthogonal() {
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }
}

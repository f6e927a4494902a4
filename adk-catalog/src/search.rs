//! Single- and multi-collection semantic search.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::adapter::VectorBackend;
use crate::document::SearchResult;
use crate::embedding::EmbeddingProvider;
use crate::error::{CatalogError, Result};
use crate::registry::CollectionRegistry;

/// A collection whose query failed during cross-collection search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionFailure {
    pub collection: String,
    pub error: String,
}

/// Grouped results of a cross-collection search.
///
/// Groups are keyed by collection name. Collections without a result at or
/// above `min_score` are omitted; collections whose query failed are listed
/// in `failures` instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SearchAllResults {
    pub groups: BTreeMap<String, Vec<SearchResult>>,
    #[serde(default)]
    pub failures: Vec<CollectionFailure>,
}

impl SearchAllResults {
    /// Total number of results across groups.
    pub fn total(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}

fn validate_query(query: &str, limit: usize) -> Result<()> {
    if query.trim().is_empty() {
        return Err(CatalogError::Validation("query must not be empty".into()));
    }
    if limit == 0 {
        return Err(CatalogError::Validation("limit must be greater than zero".into()));
    }
    Ok(())
}

/// Embeds queries once and runs them against one or many collections.
pub struct SearchOrchestrator {
    backend: Arc<VectorBackend>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    registry: Arc<CollectionRegistry>,
    concurrency: usize,
}

impl SearchOrchestrator {
    /// Create an orchestrator querying at most `concurrency` collections at once.
    pub fn new(
        backend: Arc<VectorBackend>,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        registry: Arc<CollectionRegistry>,
        concurrency: usize,
    ) -> Self {
        Self { backend, embedding_provider, registry, concurrency: concurrency.max(1) }
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.embedding_provider.embed(query.trim()).await
    }

    /// Top `limit` results of one collection, best first.
    pub async fn search(&self, collection: &str, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        validate_query(query, limit)?;
        if !self.backend.exists(collection).await? {
            return Err(CatalogError::CollectionNotFound(collection.to_string()));
        }
        let vector = self.embed_query(query).await?;
        let results = self.backend.query(collection, &vector, limit).await?;
        debug!(collection, limit, result_count = results.len(), "search completed");
        Ok(results)
    }

    /// Search every collection except manual ones.
    pub async fn search_all(
        &self,
        query: &str,
        limit_per_collection: usize,
        min_score: f32,
    ) -> Result<SearchAllResults> {
        validate_query(query, limit_per_collection)?;
        validate_min_score(min_score)?;
        let names = self.backend.list_collections().await?;
        let candidates = self.registry.searchable(names).await;
        self.fan_out(query, candidates, limit_per_collection, min_score).await
    }

    /// Search an explicit set of collections. Manual collections are searched
    /// only when named here.
    pub async fn search_collections(
        &self,
        query: &str,
        candidates: &[String],
        limit_per_collection: usize,
        min_score: f32,
    ) -> Result<SearchAllResults> {
        validate_query(query, limit_per_collection)?;
        validate_min_score(min_score)?;
        let mut candidates = candidates.to_vec();
        candidates.sort();
        candidates.dedup();
        self.fan_out(query, candidates, limit_per_collection, min_score).await
    }

    async fn fan_out(
        &self,
        query: &str,
        candidates: Vec<String>,
        limit: usize,
        min_score: f32,
    ) -> Result<SearchAllResults> {
        let mut results = SearchAllResults::default();
        if candidates.is_empty() {
            return Ok(results);
        }

        let vector = self.embed_query(query).await?;
        let vector = vector.as_slice();
        let backend = &self.backend;

        let outcomes: Vec<(String, Result<Vec<SearchResult>>)> = stream::iter(candidates)
            .map(|collection| async move {
                let outcome = backend.query(&collection, vector, limit).await;
                (collection, outcome)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (collection, outcome) in outcomes {
            match outcome {
                Ok(hits) => {
                    let kept: Vec<SearchResult> =
                        hits.into_iter().filter(|r| r.score >= min_score).collect();
                    if !kept.is_empty() {
                        results.groups.insert(collection, kept);
                    }
                }
                Err(e) => {
                    warn!(collection = %collection, error = %e, "collection query failed");
                    results.failures.push(CollectionFailure { collection, error: e.to_string() });
                }
            }
        }
        results.failures.sort_by(|a, b| a.collection.cmp(&b.collection));

        info!(
            groups = results.groups.len(),
            result_count = results.total(),
            failures = results.failures.len(),
            min_score,
            "cross-collection search completed"
        );
        Ok(results)
    }
}

fn validate_min_score(min_score: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&min_score) {
        return Err(CatalogError::Validation(format!("min_score ({min_score}) must be within [0, 1]")));
    }
    Ok(())
}

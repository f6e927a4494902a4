//! Batch ingestion with partial-failure accounting.
//!
//! The [`IngestionPipeline`] validates catalog items, embeds them in provider
//! batches, and upserts them in sub-batches of at most `batch_size` records.
//! A failing sub-batch is retried as a whole; once its retries are spent, its
//! items are reported as failed and ingestion moves on to the next one.
//!
//! # Example
//!
//! ```rust,ignore
//! use adk_catalog::{CatalogItem, IngestionPipeline};
//!
//! let pipeline = IngestionPipeline::builder()
//!     .backend(backend.clone())
//!     .embedding_provider(Arc::new(embedder))
//!     .batch_size(500)
//!     .batch_retry_limit(3)
//!     .build()?;
//!
//! let report = pipeline.ingest("unspsc_categories", items).await?;
//! println!("{} stored, {} failed", report.succeeded.len(), report.failed_count());
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::adapter::VectorBackend;
use crate::document::{CatalogItem, VectorRecord};
use crate::embedding::EmbeddingProvider;
use crate::error::{CatalogError, Result};
use crate::retry::RetryConfig;

/// Why one submitted item did not reach the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemFailure {
    /// Position of the item in the submitted batch.
    pub index: usize,
    pub code: String,
    pub reason: String,
}

/// Outcome of one ingestion call.
///
/// `succeeded`, `validation_failed`, `embedding_failed` and `upsert_failed`
/// are disjoint. Duplicate codes within one call count once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct IngestReport {
    pub collection: String,
    /// Items submitted, duplicates included.
    pub submitted: usize,
    /// Codes stored in the backend, in submission order.
    pub succeeded: Vec<String>,
    pub validation_failed: Vec<ItemFailure>,
    pub embedding_failed: Vec<ItemFailure>,
    pub upsert_failed: Vec<ItemFailure>,
    /// Backend upserts attempted.
    pub sub_batches: usize,
}

impl IngestReport {
    fn new(collection: &str, submitted: usize) -> Self {
        Self { collection: collection.to_string(), submitted, ..Self::default() }
    }

    /// Number of items that did not reach the backend.
    pub fn failed_count(&self) -> usize {
        self.validation_failed.len() + self.embedding_failed.len() + self.upsert_failed.len()
    }

    /// Whether every item was stored.
    pub fn is_complete(&self) -> bool {
        self.failed_count() == 0
    }

    /// Turn any failure into [`CatalogError::PartialBatchFailure`].
    pub fn into_result(self) -> Result<Self> {
        if self.is_complete() {
            return Ok(self);
        }
        Err(CatalogError::PartialBatchFailure {
            collection: self.collection.clone(),
            total: self.succeeded.len() + self.failed_count(),
            failed: self.failed_count(),
            validation: self.validation_failed.len(),
            embedding: self.embedding_failed.len(),
            upsert: self.upsert_failed.len(),
        })
    }
}

/// Validate an item, returning the reason it is rejected.
fn validate(item: &CatalogItem) -> Option<String> {
    for (field, value) in
        [("code", &item.code), ("name", &item.name), ("description", &item.description)]
    {
        if value.trim().is_empty() {
            return Some(format!("{field} must not be empty"));
        }
    }
    None
}

/// Ingests catalog items into vector collections.
pub struct IngestionPipeline {
    backend: Arc<VectorBackend>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    sub_batch_retry: RetryConfig,
}

impl IngestionPipeline {
    /// Create a new [`IngestionPipelineBuilder`].
    pub fn builder() -> IngestionPipelineBuilder {
        IngestionPipelineBuilder::default()
    }

    /// Maximum records per embedding call and per upsert.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Ingest `items` into `collection`.
    ///
    /// Per-item problems are reported in the returned [`IngestReport`]; only a
    /// missing collection or a failed existence check is returned as an error.
    pub async fn ingest(&self, collection: &str, items: Vec<CatalogItem>) -> Result<IngestReport> {
        if !self.backend.exists(collection).await? {
            return Err(CatalogError::CollectionNotFound(collection.to_string()));
        }

        let mut report = IngestReport::new(collection, items.len());
        let valid = self.validate_and_collapse(items, &mut report);
        let records = self.embed(collection, valid, &mut report).await;
        self.upsert(collection, records, &mut report).await;

        if report.is_complete() {
            info!(collection, stored = report.succeeded.len(), sub_batches = report.sub_batches, "ingested batch");
        } else {
            warn!(
                collection,
                stored = report.succeeded.len(),
                validation_failed = report.validation_failed.len(),
                embedding_failed = report.embedding_failed.len(),
                upsert_failed = report.upsert_failed.len(),
                "ingested batch with failures"
            );
        }
        Ok(report)
    }

    /// Reject invalid items and keep the last occurrence of each code, at the
    /// position of its first occurrence.
    fn validate_and_collapse(
        &self,
        items: Vec<CatalogItem>,
        report: &mut IngestReport,
    ) -> Vec<(usize, CatalogItem)> {
        let mut valid: Vec<(usize, CatalogItem)> = Vec::with_capacity(items.len());
        let mut slots: HashMap<String, usize> = HashMap::new();

        for (index, mut item) in items.into_iter().enumerate() {
            if let Some(reason) = validate(&item) {
                report.validation_failed.push(ItemFailure { index, code: item.code, reason });
                continue;
            }
            item.code = item.code.trim().to_string();
            match slots.get(&item.code) {
                Some(&slot) => valid[slot] = (index, item),
                None => {
                    slots.insert(item.code.clone(), valid.len());
                    valid.push((index, item));
                }
            }
        }
        valid
    }

    /// Embed items in provider batches. A failed batch marks exactly its items.
    async fn embed(
        &self,
        collection: &str,
        items: Vec<(usize, CatalogItem)>,
        report: &mut IngestReport,
    ) -> Vec<(usize, VectorRecord)> {
        let mut records = Vec::with_capacity(items.len());

        for batch in items.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|(_, item)| item.document_text()).collect();
            let text_refs: Vec<&str> = texts.iter().map(String::as_str).collect();

            let result = match self.embedding_provider.embed_batch(&text_refs).await {
                Ok(vectors) if vectors.len() != batch.len() => Err(CatalogError::embedding(
                    self.embedding_provider.name(),
                    format!("expected {} embeddings, got {}", batch.len(), vectors.len()),
                )),
                other => other,
            };

            match result {
                Ok(vectors) => {
                    for ((index, item), vector) in batch.iter().zip(vectors) {
                        records.push((*index, VectorRecord::from_catalog_item(collection, item, vector)));
                    }
                }
                Err(e) => {
                    error!(collection, batch_len = batch.len(), error = %e, "embedding batch failed");
                    let reason = e.to_string();
                    report.embedding_failed.extend(batch.iter().map(|(index, item)| ItemFailure {
                        index: *index,
                        code: item.code.clone(),
                        reason: reason.clone(),
                    }));
                }
            }
        }
        records
    }

    /// Upsert records in sequential sub-batches.
    async fn upsert(
        &self,
        collection: &str,
        records: Vec<(usize, VectorRecord)>,
        report: &mut IngestReport,
    ) {
        for (batch_number, batch) in records.chunks(self.batch_size).enumerate() {
            report.sub_batches += 1;
            let payload: Vec<VectorRecord> = batch.iter().map(|(_, r)| r.clone()).collect();

            match self.backend.upsert_with_policy(collection, &payload, &self.sub_batch_retry).await {
                Ok(()) => report.succeeded.extend(payload.into_iter().map(|r| r.id)),
                Err(e) => {
                    error!(
                        collection,
                        sub_batch = batch_number + 1,
                        batch_len = batch.len(),
                        error = %e,
                        "sub-batch upsert failed after retries"
                    );
                    let reason = e.to_string();
                    report.upsert_failed.extend(batch.iter().map(|(index, record)| ItemFailure {
                        index: *index,
                        code: record.id.clone(),
                        reason: reason.clone(),
                    }));
                }
            }
        }
    }
}

/// Builder for constructing an [`IngestionPipeline`].
///
/// `backend` and `embedding_provider` are required.
#[derive(Default)]
pub struct IngestionPipelineBuilder {
    backend: Option<Arc<VectorBackend>>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    batch_size: Option<usize>,
    batch_retry_limit: Option<u32>,
    retry: Option<RetryConfig>,
}

impl IngestionPipelineBuilder {
    /// Set the vector backend.
    pub fn backend(mut self, backend: Arc<VectorBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the maximum records per embedding call and per upsert (default 500).
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Set how often a failed sub-batch is retried (default 3).
    pub fn batch_retry_limit(mut self, limit: u32) -> Self {
        self.batch_retry_limit = Some(limit);
        self
    }

    /// Set the backoff used between sub-batch retries. Defaults to the backend's policy.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Build the [`IngestionPipeline`].
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Config`] if a required field is missing or
    /// `batch_size` is zero.
    pub fn build(self) -> Result<IngestionPipeline> {
        let backend =
            self.backend.ok_or_else(|| CatalogError::Config("backend is required".to_string()))?;
        let embedding_provider = self
            .embedding_provider
            .ok_or_else(|| CatalogError::Config("embedding_provider is required".to_string()))?;
        let batch_size = self.batch_size.unwrap_or(500);
        if batch_size == 0 {
            return Err(CatalogError::Config("batch_size must be greater than zero".to_string()));
        }
        let retry = self.retry.unwrap_or_else(|| backend.retry_config().clone());
        let sub_batch_retry = retry.with_max_retries(self.batch_retry_limit.unwrap_or(3));

        Ok(IngestionPipeline { backend, embedding_provider, batch_size, sub_batch_retry })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_rejects_blank_required_fields() {
        assert_eq!(validate(&CatalogItem::new(" ", "n", "d")).as_deref(), Some("code must not be empty"));
        assert_eq!(validate(&CatalogItem::new("c", "", "d")).as_deref(), Some("name must not be empty"));
        assert_eq!(
            validate(&CatalogItem::new("c", "n", "\t")).as_deref(),
            Some("description must not be empty")
        );
        assert!(validate(&CatalogItem::new("c", "n", "d")).is_none());
    }

    #[test]
    fn into_result_reports_counts() {
        let mut report = IngestReport::new("unspsc", 3);
        report.succeeded.push("a".into());
        assert!(report.clone().into_result().is_ok());

        report.upsert_failed.push(ItemFailure { index: 1, code: "b".into(), reason: "down".into() });
        report.validation_failed.push(ItemFailure { index: 2, code: "".into(), reason: "empty".into() });
        match report.into_result() {
            Err(CatalogError::PartialBatchFailure { total, failed, upsert, validation, .. }) => {
                assert_eq!((total, failed, upsert, validation), (3, 2, 1, 1));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}

//! Error types for the `adk-catalog` crate.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in catalog retrieval and ingestion.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Bad input shape. Returned to the caller immediately, never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The embedding provider failed to produce vectors.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingFailure {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The vector backend could not be reached, or a call timed out.
    ///
    /// This is the only transient variant: the adapter retries it with backoff
    /// and surfaces it once the retry budget is exhausted.
    #[error("Vector backend unavailable ({backend}): {message}")]
    BackendUnavailable {
        /// The vector store backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// The vector backend rejected a request.
    #[error("Vector backend error ({backend}): {message}")]
    Backend {
        /// The vector store backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// The named collection does not exist.
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    /// A collection with this name already exists.
    #[error("Collection already exists: {0}")]
    DuplicateCollection(String),

    /// A manual info entry with this key already exists.
    #[error("Item with key '{0}' already exists")]
    DuplicateKey(String),

    /// A manual info entry with this key does not exist.
    #[error("Item with key '{0}' not found")]
    NotFound(String),

    /// Part of an ingestion call failed. Per-item detail lives in the
    /// [`IngestReport`](crate::ingest::IngestReport) this was built from.
    #[error(
        "Partial batch failure in '{collection}': {failed} of {total} items failed \
         ({validation} validation, {embedding} embedding, {upsert} upsert)"
    )]
    PartialBatchFailure {
        /// Target collection.
        collection: String,
        /// Items submitted.
        total: usize,
        /// Items that did not reach the backend.
        failed: usize,
        /// Items rejected at validation.
        validation: usize,
        /// Items whose embedding failed.
        embedding: usize,
        /// Items whose sub-batch exhausted its retries.
        upsert: usize,
    },

    /// Startup reconciliation of a catalog collection failed.
    #[error("Sync failure for '{collection}': {message}")]
    SyncFailure {
        /// The collection being reconciled.
        collection: String,
        /// A description of the failure.
        message: String,
    },

    /// The relational catalog source failed.
    #[error("Catalog source error: {0}")]
    Source(String),

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A request-level timeout elapsed.
    #[error("Operation '{operation}' timed out after {elapsed:?}")]
    Timeout {
        /// The service operation that timed out.
        operation: String,
        /// The configured timeout.
        elapsed: Duration,
    },
}

impl CatalogError {
    /// Whether the adapter should retry the failed call.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }

    /// Whether the error is a precondition or input failure. These are never retried.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::CollectionNotFound(_)
                | Self::DuplicateCollection(_)
                | Self::DuplicateKey(_)
                | Self::NotFound(_)
        )
    }

    pub(crate) fn unavailable(backend: &str, message: impl Into<String>) -> Self {
        Self::BackendUnavailable { backend: backend.to_string(), message: message.into() }
    }

    pub(crate) fn backend(backend: &str, message: impl Into<String>) -> Self {
        Self::Backend { backend: backend.to_string(), message: message.into() }
    }

    pub(crate) fn embedding(provider: &str, message: impl Into<String>) -> Self {
        Self::EmbeddingFailure { provider: provider.to_string(), message: message.into() }
    }
}

/// A convenience result type for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;

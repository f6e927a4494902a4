//! Semantic retrieval over classification catalogs for ADK-Rust.
//!
//! This crate provides:
//! - A uniform vector backend contract ([`VectorBackend`]) over ChromaDB,
//!   Milvus and an in-memory store, with normalized `[0, 1]` scores
//! - Batch ingestion with partial-failure accounting ([`IngestionPipeline`])
//! - Startup reconciliation of empty catalog collections from a relational
//!   source ([`Reconciler`], [`PostgresCatalogSource`])
//! - Single- and multi-collection search ([`SearchOrchestrator`])
//! - Keyed manual info entries ([`ManualInfoManager`])
//! - A service context tying them together ([`CatalogService`])
//!
//! # Example
//!
//! ```rust,ignore
//! use adk_catalog::{CatalogConfig, CatalogItem, CatalogService};
//!
//! let service = CatalogService::from_config(CatalogConfig::load()?)?;
//! service.create_collection("office_supplies").await?;
//! service
//!     .ingest_batch("office_supplies", vec![CatalogItem::new("44121701", "Ballpoint pens", "Pens")])
//!     .await?;
//! let groups = service.search_all("pen", 3, 0.2).await?;
//! ```

pub mod adapter;
pub mod chroma;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod inmemory;
pub mod ingest;
pub mod manual;
pub mod milvus;
pub mod openai;
pub mod reconcile;
pub mod registry;
pub mod retry;
pub mod search;
pub mod service;
pub mod source;
pub mod vectorstore;

pub use adapter::VectorBackend;
pub use chroma::ChromaVectorStore;
pub use config::{
    BackendConfig, BackendKind, CatalogConfig, CatalogConfigBuilder, CollectionsConfig,
    EmbeddingConfig, IngestConfig, SearchConfig, ServerConfig, SourceConfig,
};
pub use document::{
    CatalogItem, Collection, CollectionKind, ManualInfoEntry, Payload, ScoredRecord, SearchResult,
    VectorRecord,
};
pub use embedding::EmbeddingProvider;
pub use error::{CatalogError, Result};
pub use inmemory::InMemoryVectorStore;
pub use ingest::{IngestReport, IngestionPipeline, IngestionPipelineBuilder, ItemFailure};
pub use manual::{ManualInfoManager, ManualInfoPage};
pub use milvus::MilvusVectorStore;
pub use openai::OpenAIEmbeddingProvider;
pub use reconcile::{ReconcileOutcome, ReconcileState, Reconciler};
pub use registry::CollectionRegistry;
pub use retry::{RetryConfig, retry_with_backoff};
pub use search::{CollectionFailure, SearchAllResults, SearchOrchestrator};
pub use service::{CatalogService, Readiness, ServiceStatus};
#[cfg(feature = "postgres")]
pub use source::PostgresCatalogSource;
pub use source::{CatalogSource, SourceRecord};
pub use vectorstore::{DistanceMetric, VectorStore};

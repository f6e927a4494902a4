//! Startup reconciliation of catalog collections against a relational source.
//!
//! The reconciler walks an explicit state machine:
//!
//! ```text
//! CheckEmpty ──(count > 0)──────────────────────────────────────▶ Done
//!     │
//!     └─(empty)─▶ FetchFromSource ─▶ Transform ─▶ Ingest ─▶ Done
//! ```
//!
//! The `CheckEmpty` guard makes a rerun a no-op once the collection holds
//! data. Failures are logged and returned as [`ReconcileOutcome::Failed`];
//! they never abort the caller.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::adapter::VectorBackend;
use crate::document::{CatalogItem, META_ITEM_TYPE};
use crate::error::CatalogError;
use crate::ingest::{IngestReport, IngestionPipeline};
use crate::source::{CatalogSource, SourceRecord};

/// Steps of a reconciliation run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileState {
    CheckEmpty,
    FetchFromSource,
    Transform,
    Ingest,
    Done,
}

/// Result of reconciling one collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The collection already held data; nothing was fetched.
    AlreadyPopulated { count: u64 },
    /// The source returned no rows.
    SourceEmpty,
    /// Rows were ingested. The report may contain per-item failures.
    Populated { report: IngestReport },
    /// The run stopped in `state`.
    Failed { state: ReconcileState, error: String },
}

impl ReconcileOutcome {
    /// Short name of the variant for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::AlreadyPopulated { .. } => "already_populated",
            Self::SourceEmpty => "source_empty",
            Self::Populated { .. } => "populated",
            Self::Failed { .. } => "failed",
        }
    }

    /// Whether the collection can be considered complete.
    pub fn is_healthy(&self) -> bool {
        match self {
            Self::AlreadyPopulated { .. } | Self::SourceEmpty => true,
            Self::Populated { report } => report.is_complete(),
            Self::Failed { .. } => false,
        }
    }

    /// Whether the run may have written some records but not all of them.
    ///
    /// A later run then finds the collection non-empty and reports
    /// [`AlreadyPopulated`](Self::AlreadyPopulated), which says nothing about completeness.
    pub fn left_partial_data(&self) -> bool {
        match self {
            Self::Populated { report } => !report.is_complete(),
            Self::Failed { state, .. } => *state == ReconcileState::Ingest,
            Self::AlreadyPopulated { .. } | Self::SourceEmpty => false,
        }
    }
}

/// Populates an empty catalog collection from a [`CatalogSource`].
pub struct Reconciler {
    backend: Arc<VectorBackend>,
    pipeline: Arc<IngestionPipeline>,
    dimensions: usize,
    item_type: String,
    system_code: String,
}

impl Reconciler {
    /// Create a reconciler that tags records as `unspsc_commodity` of system `UNSPSC`.
    pub fn new(backend: Arc<VectorBackend>, pipeline: Arc<IngestionPipeline>, dimensions: usize) -> Self {
        Self {
            backend,
            pipeline,
            dimensions,
            item_type: "unspsc_commodity".into(),
            system_code: "UNSPSC".into(),
        }
    }

    /// Set the `item_type` metadata written on reconciled records.
    pub fn with_item_type(mut self, item_type: impl Into<String>) -> Self {
        self.item_type = item_type.into();
        self
    }

    /// Set the `system` metadata written on reconciled records.
    pub fn with_system_code(mut self, system_code: impl Into<String>) -> Self {
        self.system_code = system_code.into();
        self
    }

    /// Turn source rows into catalog items. Blank descriptions fall back to the name.
    pub fn transform(&self, rows: Vec<SourceRecord>) -> Vec<CatalogItem> {
        rows.into_iter()
            .map(|row| {
                let description = row
                    .description
                    .filter(|d| !d.trim().is_empty())
                    .unwrap_or_else(|| row.name.clone());
                CatalogItem::new(row.code, row.name, description)
                    .with_metadata(META_ITEM_TYPE, self.item_type.as_str())
                    .with_metadata("system", self.system_code.as_str())
            })
            .collect()
    }

    /// Reconcile `collection` against `source`, creating the collection if needed.
    pub async fn reconcile(&self, collection: &str, source: &dyn CatalogSource) -> ReconcileOutcome {
        let mut state = ReconcileState::CheckEmpty;
        match self.run(collection, source, &mut state).await {
            Ok(outcome) => {
                let stored = match &outcome {
                    ReconcileOutcome::Populated { report } => report.succeeded.len(),
                    _ => 0,
                };
                info!(collection, source = source.name(), outcome = outcome.label(), stored, "reconciliation finished");
                outcome
            }
            Err(e) => {
                let failure =
                    CatalogError::SyncFailure { collection: collection.to_string(), message: e.to_string() };
                error!(collection, source = source.name(), ?state, error = %failure, "reconciliation failed");
                ReconcileOutcome::Failed { state, error: failure.to_string() }
            }
        }
    }

    async fn run(
        &self,
        collection: &str,
        source: &dyn CatalogSource,
        state: &mut ReconcileState,
    ) -> crate::error::Result<ReconcileOutcome> {
        self.ensure_collection(collection).await?;

        let count = self.backend.count(collection).await?;
        if count > 0 {
            *state = ReconcileState::Done;
            return Ok(ReconcileOutcome::AlreadyPopulated { count });
        }

        *state = ReconcileState::FetchFromSource;
        info!(collection, source = source.name(), "collection is empty, fetching from source");
        let rows = source.fetch().await?;
        if rows.is_empty() {
            warn!(collection, source = source.name(), "source returned no rows");
            *state = ReconcileState::Done;
            return Ok(ReconcileOutcome::SourceEmpty);
        }

        *state = ReconcileState::Transform;
        let items = self.transform(rows);

        *state = ReconcileState::Ingest;
        let report = self.pipeline.ingest(collection, items).await?;

        *state = ReconcileState::Done;
        Ok(ReconcileOutcome::Populated { report })
    }

    async fn ensure_collection(&self, collection: &str) -> crate::error::Result<()> {
        if self.backend.exists(collection).await? {
            return Ok(());
        }
        match self.backend.create_collection(collection, self.dimensions).await {
            Ok(_) | Err(CatalogError::DuplicateCollection(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

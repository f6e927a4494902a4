//! Manual info: free-text entries addressed by a unique key.
//!
//! Entries live in their own collection as records with `id = key` and
//! `document = description`, so they can be retrieved semantically when that
//! collection is named explicitly. Cross-collection search skips them.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::adapter::VectorBackend;
use crate::document::{
    META_CREATED_AT, META_ITEM_TYPE, META_ORIGINAL_KEY, META_UPDATED_AT, ManualInfoEntry,
    TYPE_MANUAL_INFO, VectorRecord,
};
use crate::embedding::EmbeddingProvider;
use crate::error::{CatalogError, Result};

/// Largest page size accepted by [`ManualInfoManager::list`].
pub const MAX_PAGE_SIZE: usize = 100;

/// One page of manual info entries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManualInfoPage {
    pub items: Vec<ManualInfoEntry>,
    /// Entries matching the filter across all pages.
    pub total_count: usize,
    pub total_pages: usize,
    /// The requested page, 1-based.
    pub current_page: usize,
}

/// Keyed CRUD over the manual info collection.
pub struct ManualInfoManager {
    backend: Arc<VectorBackend>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    collection: String,
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CatalogError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Keys are stored trimmed and looked up the same way.
fn entry_key(key: &str) -> Result<&str> {
    require("key", key)?;
    Ok(key.trim())
}

impl ManualInfoManager {
    pub fn new(
        backend: Arc<VectorBackend>,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        collection: impl Into<String>,
    ) -> Self {
        Self { backend, embedding_provider, collection: collection.into() }
    }

    /// Name of the manual info collection.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Create the collection if it does not exist. Returns whether it was created.
    pub async fn ensure_collection(&self) -> Result<bool> {
        if self.backend.exists(&self.collection).await? {
            return Ok(false);
        }
        match self.backend.create_collection(&self.collection, self.embedding_provider.dimensions()).await
        {
            Ok(_) => {
                info!(collection = %self.collection, "created manual info collection");
                Ok(true)
            }
            Err(CatalogError::DuplicateCollection(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn find(&self, key: &str) -> Result<Option<ManualInfoEntry>> {
        let records = self.backend.get(&self.collection, &[key]).await?;
        Ok(records
            .iter()
            .find(|r| r.id == key)
            .and_then(|r| ManualInfoEntry::from_record(r, Utc::now())))
    }

    async fn store(&self, entry: &ManualInfoEntry) -> Result<()> {
        let embedding = self.embedding_provider.embed(&entry.description).await?;
        let record = VectorRecord {
            id: entry.key.clone(),
            embedding,
            document: entry.description.clone(),
            metadata: entry.record_metadata(),
            collection: self.collection.clone(),
        };
        self.backend.upsert(&self.collection, &[record]).await
    }

    /// Create an entry. Fails with `DuplicateKey` if the key is taken.
    ///
    /// The duplicate check is best-effort: it reads the key and then writes,
    /// so two concurrent creates of the same key may both succeed, and the
    /// last write wins.
    pub async fn create(&self, key: &str, description: &str) -> Result<ManualInfoEntry> {
        let key = entry_key(key)?;
        require("description", description)?;
        if !self.backend.get(&self.collection, &[key]).await?.is_empty() {
            return Err(CatalogError::DuplicateKey(key.to_string()));
        }

        let now = Utc::now();
        let entry = ManualInfoEntry {
            key: key.to_string(),
            description: description.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.store(&entry).await?;
        info!(key, description_len = description.len(), "created manual info entry");
        Ok(entry)
    }

    /// Fetch an entry. Fails with `NotFound` if absent.
    pub async fn get(&self, key: &str) -> Result<ManualInfoEntry> {
        let key = entry_key(key)?;
        self.find(key).await?.ok_or_else(|| CatalogError::NotFound(key.to_string()))
    }

    /// Replace the description, keep `created_at`, refresh `updated_at`, re-embed.
    pub async fn update(&self, key: &str, description: &str) -> Result<ManualInfoEntry> {
        let key = entry_key(key)?;
        require("description", description)?;
        let existing = self.get(key).await?;
        let entry = ManualInfoEntry {
            description: description.to_string(),
            updated_at: Utc::now().max(existing.created_at),
            ..existing
        };
        self.store(&entry).await?;
        info!(key, description_len = description.len(), "updated manual info entry");
        Ok(entry)
    }

    /// Delete an entry. Fails with `NotFound` if absent.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let key = entry_key(key)?;
        self.get(key).await?;
        self.backend.delete(&self.collection, &[key]).await?;
        info!(key, "deleted manual info entry");
        Ok(())
    }

    /// List entries ordered by key.
    ///
    /// `page` is 1-based and `limit` must be within `1..=100`. When `search`
    /// is given, only entries whose key or description contains it
    /// (case-insensitively) are counted and returned. Each call reads the
    /// collection once, so concurrent writes may shift entries between pages.
    pub async fn list(&self, page: usize, limit: usize, search: Option<&str>) -> Result<ManualInfoPage> {
        if page == 0 {
            return Err(CatalogError::Validation("page must be at least 1".into()));
        }
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(CatalogError::Validation(format!("limit must be within 1..={MAX_PAGE_SIZE}")));
        }

        let fallback = Utc::now();
        let needle = search.map(str::trim).filter(|s| !s.is_empty()).map(str::to_lowercase);
        let mut entries: Vec<ManualInfoEntry> = self
            .backend
            .list_records(&self.collection)
            .await?
            .iter()
            .filter_map(|r| ManualInfoEntry::from_record(r, fallback))
            .filter(|e| match &needle {
                Some(n) => e.key.to_lowercase().contains(n) || e.description.to_lowercase().contains(n),
                None => true,
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        let total_count = entries.len();
        let items = entries.into_iter().skip((page - 1).saturating_mul(limit)).take(limit).collect();
        debug!(page, limit, total_count, "listed manual info entries");

        Ok(ManualInfoPage { items, total_count, total_pages: total_count.div_ceil(limit), current_page: page })
    }

    /// Fill in `item_type`, `original_key` and `name` on entries written
    /// without them. Records of another `item_type` are left alone.
    /// Returns how many entries were repaired.
    pub async fn repair_metadata(&self) -> Result<usize> {
        let mut broken: Vec<VectorRecord> = self
            .backend
            .list_records(&self.collection)
            .await?
            .into_iter()
            .filter(|r| matches!(r.item_type(), None | Some(TYPE_MANUAL_INFO)))
            .filter(|r| {
                r.item_type().is_none()
                    || !r.metadata.contains_key(META_ORIGINAL_KEY)
                    || !r.metadata.contains_key("name")
            })
            .collect();

        if broken.is_empty() {
            return Ok(0);
        }

        let documents: Vec<&str> = broken.iter().map(|r| r.document.as_str()).collect();
        let embeddings = self.embedding_provider.embed_batch(&documents).await?;
        if embeddings.len() != broken.len() {
            return Err(CatalogError::embedding(
                self.embedding_provider.name(),
                format!("expected {} embeddings, got {}", broken.len(), embeddings.len()),
            ));
        }

        let now = Utc::now().to_rfc3339();
        for (record, embedding) in broken.iter_mut().zip(embeddings) {
            let key = record.metadata.get(META_ORIGINAL_KEY).cloned().unwrap_or_else(|| record.id.clone());
            record.metadata.insert(META_ITEM_TYPE.to_string(), TYPE_MANUAL_INFO.to_string());
            record.metadata.entry("name".to_string()).or_insert_with(|| key.clone());
            record.metadata.insert(META_ORIGINAL_KEY.to_string(), key);
            for stamp in [META_CREATED_AT, META_UPDATED_AT] {
                record.metadata.entry(stamp.to_string()).or_insert_with(|| now.clone());
            }
            record.embedding = embedding;
        }

        self.backend.upsert(&self.collection, &broken).await?;
        info!(collection = %self.collection, repaired = broken.len(), "repaired manual info metadata");
        Ok(broken.len())
    }
}

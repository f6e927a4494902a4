//! Data types for catalog items, vector records, collections, and search results.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata key distinguishing catalog records from manual info records.
pub const META_ITEM_TYPE: &str = "item_type";
/// Metadata key holding the original manual info key.
pub const META_ORIGINAL_KEY: &str = "original_key";
/// Metadata key holding the manual info creation timestamp (RFC 3339).
pub const META_CREATED_AT: &str = "created_at_iso";
/// Metadata key holding the manual info update timestamp (RFC 3339).
pub const META_UPDATED_AT: &str = "updated_at_iso";

/// `item_type` value of records ingested from [`CatalogItem`]s without an explicit type.
pub const TYPE_CATALOG_ITEM: &str = "catalog_item";
/// `item_type` value of manual info records.
pub const TYPE_MANUAL_INFO: &str = "manual_info";

const RESERVED_KEYS: [&str; 4] = ["code", "name", "description", "hierarchy"];

/// A classification record: a product or commodity code with its text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogItem {
    /// The classification code. Unique within a collection.
    pub code: String,
    /// Short human readable name.
    pub name: String,
    /// Longer description.
    pub description: String,
    /// Position in the classification tree, e.g. `IT > Hardware > Computers`.
    #[serde(default)]
    pub hierarchy: String,
    /// Additional string metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CatalogItem {
    /// Create an item without hierarchy or metadata.
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            description: description.into(),
            hierarchy: String::new(),
            metadata: HashMap::new(),
        }
    }

    /// Set the hierarchy path.
    pub fn with_hierarchy(mut self, hierarchy: impl Into<String>) -> Self {
        self.hierarchy = hierarchy.into();
        self
    }

    /// Add one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The text that gets embedded: name, description and hierarchy, one per line.
    pub fn document_text(&self) -> String {
        let mut text = format!("{}\n{}", self.name.trim(), self.description.trim());
        let hierarchy = self.hierarchy.trim();
        if !hierarchy.is_empty() {
            text.push('\n');
            text.push_str(hierarchy);
        }
        text
    }

    /// Record metadata for this item. Reserved keys override user metadata.
    pub fn record_metadata(&self) -> HashMap<String, String> {
        let mut metadata = self.metadata.clone();
        metadata.entry(META_ITEM_TYPE.to_string()).or_insert_with(|| TYPE_CATALOG_ITEM.to_string());
        metadata.insert("code".to_string(), self.code.clone());
        metadata.insert("name".to_string(), self.name.clone());
        metadata.insert("description".to_string(), self.description.clone());
        metadata.insert("hierarchy".to_string(), self.hierarchy.clone());
        metadata
    }

    /// Rebuild an item from a stored record.
    ///
    /// Records written by other tools may only carry the description as their
    /// document, so a missing `description` field falls back to the document.
    pub fn from_record(record: &VectorRecord) -> Self {
        let get = |key: &str| record.metadata.get(key).cloned();
        let metadata = record
            .metadata
            .iter()
            .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self {
            code: get("code").unwrap_or_else(|| record.id.clone()),
            name: get("name").unwrap_or_default(),
            description: get("description").unwrap_or_else(|| record.document.clone()),
            hierarchy: get("hierarchy").unwrap_or_default(),
            metadata,
        }
    }
}

/// A record as stored in a vector backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorRecord {
    /// Record id, unique within its collection.
    pub id: String,
    /// The embedding of [`document`](Self::document). Empty when the backend
    /// did not return vectors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    /// The embedded text.
    pub document: String,
    /// String metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// The collection the record belongs to.
    pub collection: String,
}

impl VectorRecord {
    /// Derive the record for a catalog item: `id = code`, document from
    /// [`CatalogItem::document_text`].
    pub fn from_catalog_item(
        collection: impl Into<String>,
        item: &CatalogItem,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            id: item.code.clone(),
            embedding,
            document: item.document_text(),
            metadata: item.record_metadata(),
            collection: collection.into(),
        }
    }

    /// The `item_type` metadata value, if any.
    pub fn item_type(&self) -> Option<&str> {
        self.metadata.get(META_ITEM_TYPE).map(String::as_str)
    }
}

/// A stored record paired with the backend's native distance or score.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    /// The retrieved record.
    pub record: VectorRecord,
    /// Raw value in the backend's [`DistanceMetric`](crate::vectorstore::DistanceMetric).
    pub raw_score: f32,
}

/// What a collection holds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    /// Populated from catalog items, possibly by reconciliation.
    Catalog,
    /// Reserved key/value text store, excluded from cross-collection search.
    Manual,
}

/// A named collection and its current size.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Collection {
    /// Unique collection name.
    pub name: String,
    /// Collection kind.
    pub kind: CollectionKind,
    /// Item count as reported by the backend.
    pub item_count: u64,
}

/// The content attached to a [`SearchResult`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Payload {
    /// A classification record.
    Catalog(CatalogItem),
    /// Free text from a manual info entry.
    Text(String),
}

impl Payload {
    /// Build the payload for a stored record.
    pub fn from_record(record: &VectorRecord) -> Self {
        if record.item_type() == Some(TYPE_MANUAL_INFO) {
            Self::Text(record.document.clone())
        } else {
            Self::Catalog(CatalogItem::from_record(record))
        }
    }
}

/// A retrieved record with a normalized similarity score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// The collection the record came from.
    pub collection: String,
    /// Record id (the code for catalog items, the key for manual info).
    pub id: String,
    /// Similarity in `[0, 1]`; 1 means identical.
    pub score: f32,
    /// The record content.
    pub payload: Payload,
}

/// A manually maintained piece of key/value text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManualInfoEntry {
    /// Unique key, also the record id.
    pub key: String,
    /// The text content.
    pub description: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl ManualInfoEntry {
    /// Record metadata for this entry.
    pub fn record_metadata(&self) -> HashMap<String, String> {
        HashMap::from([
            (META_ITEM_TYPE.to_string(), TYPE_MANUAL_INFO.to_string()),
            (META_ORIGINAL_KEY.to_string(), self.key.clone()),
            ("name".to_string(), self.key.clone()),
            (META_CREATED_AT.to_string(), self.created_at.to_rfc3339()),
            (META_UPDATED_AT.to_string(), self.updated_at.to_rfc3339()),
        ])
    }

    /// Rebuild an entry from a stored record.
    ///
    /// Returns `None` for records that are not manual info. Missing or
    /// unparsable timestamps fall back to `fallback_time`.
    pub fn from_record(record: &VectorRecord, fallback_time: DateTime<Utc>) -> Option<Self> {
        if record.item_type() != Some(TYPE_MANUAL_INFO) {
            return None;
        }
        let timestamp = |key: &str| {
            record
                .metadata
                .get(key)
                .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or(fallback_time)
        };
        Some(Self {
            key: record.metadata.get(META_ORIGINAL_KEY).cloned().unwrap_or_else(|| record.id.clone()),
            description: record.document.clone(),
            created_at: timestamp(META_CREATED_AT),
            updated_at: timestamp(META_UPDATED_AT),
        })
    }
}

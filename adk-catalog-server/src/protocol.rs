//! Request and response bodies of the HTTP API.

use std::collections::{BTreeMap, HashMap};

use adk_catalog::{
    CatalogItem, Collection, CollectionFailure, CollectionKind, IngestReport, ManualInfoEntry,
    ManualInfoPage, Payload, Readiness, SearchResult,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub readiness: Readiness,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// `ok` when the backend is reachable and the catalog is ready.
    pub status: String,
    pub backend: String,
    pub backend_connected: bool,
    pub readiness: Readiness,
    pub collections: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub count: u64,
    pub kind: CollectionKind,
}

impl From<Collection> for CollectionInfo {
    fn from(collection: Collection) -> Self {
        Self { name: collection.name, count: collection.item_count, kind: collection.kind }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListCollectionsResponse {
    pub collections: Vec<CollectionInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchAddRequest {
    pub collection_name: String,
    pub items: Vec<CatalogItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchAddResponse {
    pub message: String,
    /// Items stored.
    pub count: usize,
    pub report: IngestReport,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchParams {
    pub query: String,
    /// Defaults to the configured default collection.
    pub collection_name: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchAllParams {
    pub query: String,
    pub limit_per_collection: Option<usize>,
    pub min_score: Option<f32>,
    /// Comma-separated collection names. When present only these are searched.
    pub collections: Option<String>,
}

/// One search hit in the flat shape clients expect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarityHit {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub hierarchy: String,
    pub similarity_score: f32,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl From<SearchResult> for SimilarityHit {
    fn from(result: SearchResult) -> Self {
        match result.payload {
            Payload::Catalog(item) => Self {
                code: item.code,
                name: item.name,
                description: item.description,
                hierarchy: item.hierarchy,
                similarity_score: result.score,
                metadata: item.metadata,
            },
            Payload::Text(text) => Self {
                code: result.id.clone(),
                name: result.id,
                description: text,
                hierarchy: String::new(),
                similarity_score: result.score,
                metadata: HashMap::new(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub collection_name: String,
    pub results: Vec<SimilarityHit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchAllResponse {
    pub query: String,
    pub results: BTreeMap<String, Vec<SimilarityHit>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<CollectionFailure>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RagInfoListParams {
    pub page: Option<usize>,
    pub limit: Option<usize>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagInfoCreate {
    pub key: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagInfoUpdate {
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RagInfoItem {
    /// Same as `key`.
    pub id: String,
    pub key: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ManualInfoEntry> for RagInfoItem {
    fn from(entry: ManualInfoEntry) -> Self {
        Self {
            id: entry.key.clone(),
            key: entry.key,
            description: entry.description,
            created_at: entry.created_at,
            updated_at: entry.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagInfoPageResponse {
    pub items: Vec<RagInfoItem>,
    pub total_count: usize,
    pub total_pages: usize,
    pub current_page: usize,
}

impl From<ManualInfoPage> for RagInfoPageResponse {
    fn from(page: ManualInfoPage) -> Self {
        Self {
            items: page.items.into_iter().map(RagInfoItem::from).collect(),
            total_count: page.total_count,
            total_pages: page.total_pages,
            current_page: page.current_page,
        }
    }
}

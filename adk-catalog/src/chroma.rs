//! ChromaDB vector store backend.
//!
//! Provides [`ChromaVectorStore`] which implements [`VectorStore`] against the
//! Chroma REST API (`/api/v1`) using [reqwest](https://docs.rs/reqwest).
//! Collections are created in the `cosine` space, so query distances are
//! reported as [`DistanceMetric::CosineDistance`].
//!
//! # Example
//!
//! ```rust,ignore
//! use adk_catalog::chroma::ChromaVectorStore;
//!
//! let store = ChromaVectorStore::from_host("localhost", 8000);
//! store.heartbeat().await?;
//! store.create_collection("unspsc_categories", 384).await?;
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::document::{ScoredRecord, VectorRecord};
use crate::error::{CatalogError, Result};
use crate::vectorstore::{DistanceMetric, VectorStore, metadata_to_strings};

const BACKEND: &str = "chromadb";

/// Page size used when listing every record of a collection.
const LIST_PAGE_SIZE: usize = 1000;

/// A [`VectorStore`] backed by a ChromaDB server.
pub struct ChromaVectorStore {
    client: reqwest::Client,
    base_url: String,
}

impl ChromaVectorStore {
    /// Create a store talking to the given base URL, e.g. `http://localhost:8000`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create a store for `http://{host}:{port}`.
    pub fn from_host(host: &str, port: u16) -> Self {
        Self::new(format!("http://{host}:{port}"))
    }

    /// Create a store from an existing HTTP client.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{path}", self.base_url)
    }

    /// Send a request and map transport and HTTP failures onto catalog errors.
    async fn send(&self, request: RequestBuilder, collection: Option<&str>) -> Result<Response> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, &body, collection))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        collection: Option<&str>,
    ) -> Result<T> {
        let response = self.send(request, collection).await?;
        response
            .json()
            .await
            .map_err(|e| CatalogError::backend(BACKEND, format!("failed to parse response: {e}")))
    }

    /// Resolve a collection name to its Chroma id.
    async fn collection_id(&self, name: &str) -> Result<String> {
        let info: CollectionInfo = self
            .send_json(self.client.get(self.url(&format!("/collections/{name}"))), Some(name))
            .await?;
        Ok(info.id)
    }

    async fn get_page(
        &self,
        collection: &str,
        id: &str,
        body: &GetRequest<'_>,
    ) -> Result<Vec<VectorRecord>> {
        let response: GetResponse = self
            .send_json(
                self.client.post(self.url(&format!("/collections/{id}/get"))).json(body),
                Some(collection),
            )
            .await?;
        Ok(response.into_records(collection))
    }
}

fn transport_error(e: reqwest::Error) -> CatalogError {
    if e.is_decode() {
        CatalogError::backend(BACKEND, e.to_string())
    } else {
        CatalogError::unavailable(BACKEND, e.to_string())
    }
}

/// Map a failed Chroma response onto a catalog error.
///
/// Chroma reports missing and duplicate collections as error messages rather
/// than dedicated status codes, so the body is inspected first.
fn classify_failure(status: StatusCode, body: &str, collection: Option<&str>) -> CatalogError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|e| e.error.or(e.detail.map(|d| d.to_string())))
        .unwrap_or_else(|| body.to_string());

    if let Some(name) = collection {
        if status == StatusCode::NOT_FOUND || message.contains("does not exist") {
            return CatalogError::CollectionNotFound(name.to_string());
        }
        if status == StatusCode::CONFLICT || message.contains("already exists") {
            return CatalogError::DuplicateCollection(name.to_string());
        }
    }
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return CatalogError::unavailable(BACKEND, format!("{status}: {message}"));
    }
    CatalogError::backend(BACKEND, format!("{status}: {message}"))
}

// ── Chroma API request/response types ──────────────────────────────

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
    detail: Option<Value>,
}

#[derive(Deserialize)]
struct CollectionInfo {
    id: String,
    name: String,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    ids: Vec<&'a str>,
    embeddings: Vec<&'a [f32]>,
    documents: Vec<&'a str>,
    metadatas: Vec<&'a HashMap<String, String>>,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    query_embeddings: [&'a [f32]; 1],
    n_results: usize,
    include: [&'static str; 3],
}

#[derive(Deserialize)]
struct QueryResponse {
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<Map<String, Value>>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<Option<f32>>>>,
}

impl QueryResponse {
    /// Hits of the single query vector, paired with their distances.
    fn into_hits(self, collection: &str) -> Vec<ScoredRecord> {
        let ids = self.ids.into_iter().next().unwrap_or_default();
        let mut documents = self.documents.and_then(|d| d.into_iter().next()).unwrap_or_default();
        let mut metadatas = self.metadatas.and_then(|m| m.into_iter().next()).unwrap_or_default();
        let distances = self.distances.and_then(|d| d.into_iter().next()).unwrap_or_default();

        documents.resize(ids.len(), None);
        metadatas.resize(ids.len(), None);

        ids.into_iter()
            .zip(documents)
            .zip(metadatas)
            .enumerate()
            .map(|(i, ((id, document), metadata))| ScoredRecord {
                record: VectorRecord {
                    id,
                    embedding: Vec::new(),
                    document: document.unwrap_or_default(),
                    metadata: metadata_to_strings(metadata),
                    collection: collection.to_string(),
                },
                raw_score: distances.get(i).copied().flatten().unwrap_or(f32::NAN),
            })
            .collect()
    }
}

#[derive(Serialize)]
struct GetRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    ids: Option<&'a [&'a str]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<usize>,
    include: [&'static str; 2],
}

#[derive(Deserialize)]
struct GetResponse {
    ids: Vec<String>,
    #[serde(default)]
    documents: Option<Vec<Option<String>>>,
    #[serde(default)]
    metadatas: Option<Vec<Option<Map<String, Value>>>>,
}

impl GetResponse {
    fn into_records(self, collection: &str) -> Vec<VectorRecord> {
        let mut documents = self.documents.unwrap_or_default();
        let mut metadatas = self.metadatas.unwrap_or_default();
        documents.resize(self.ids.len(), None);
        metadatas.resize(self.ids.len(), None);

        self.ids
            .into_iter()
            .zip(documents)
            .zip(metadatas)
            .map(|((id, document), metadata)| VectorRecord {
                id,
                embedding: Vec::new(),
                document: document.unwrap_or_default(),
                metadata: metadata_to_strings(metadata),
                collection: collection.to_string(),
            })
            .collect()
    }
}

// ── VectorStore implementation ─────────────────────────────────────

#[async_trait]
impl VectorStore for ChromaVectorStore {
    fn backend_name(&self) -> &str {
        BACKEND
    }

    fn metric(&self) -> DistanceMetric {
        DistanceMetric::CosineDistance
    }

    async fn heartbeat(&self) -> Result<()> {
        self.send(self.client.get(self.url("/heartbeat")), None).await?;
        Ok(())
    }

    async fn create_collection(&self, name: &str, dimensions: usize) -> Result<()> {
        let body = json!({
            "name": name,
            "metadata": { "hnsw:space": "cosine" },
            "get_or_create": false,
        });
        let info: CollectionInfo =
            self.send_json(self.client.post(self.url("/collections")).json(&body), Some(name)).await?;
        debug!(collection = %info.name, id = %info.id, dimensions, "created chroma collection");
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.send(self.client.delete(self.url(&format!("/collections/{name}"))), Some(name)).await?;
        debug!(collection = name, "deleted chroma collection");
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let collections: Vec<CollectionInfo> =
            self.send_json(self.client.get(self.url("/collections")), None).await?;
        Ok(collections.into_iter().map(|c| c.name).collect())
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        match self.collection_id(name).await {
            Ok(_) => Ok(true),
            Err(CatalogError::CollectionNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let id = self.collection_id(collection).await?;
        let body = UpsertRequest {
            ids: records.iter().map(|r| r.id.as_str()).collect(),
            embeddings: records.iter().map(|r| r.embedding.as_slice()).collect(),
            documents: records.iter().map(|r| r.document.as_str()).collect(),
            metadatas: records.iter().map(|r| &r.metadata).collect(),
        };
        self.send(
            self.client.post(self.url(&format!("/collections/{id}/upsert"))).json(&body),
            Some(collection),
        )
        .await?;
        debug!(collection, count = records.len(), "upserted records to chroma");
        Ok(())
    }

    async fn query(&self, collection: &str, vector: &[f32], k: usize) -> Result<Vec<ScoredRecord>> {
        let id = self.collection_id(collection).await?;
        let body = QueryRequest {
            query_embeddings: [vector],
            n_results: k,
            include: ["documents", "metadatas", "distances"],
        };
        let response: QueryResponse = self
            .send_json(
                self.client.post(self.url(&format!("/collections/{id}/query"))).json(&body),
                Some(collection),
            )
            .await?;
        Ok(response.into_hits(collection))
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        let id = self.collection_id(collection).await?;
        self.send_json(self.client.get(self.url(&format!("/collections/{id}/count"))), Some(collection))
            .await
    }

    async fn get(&self, collection: &str, ids: &[&str]) -> Result<Vec<VectorRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let id = self.collection_id(collection).await?;
        let body =
            GetRequest { ids: Some(ids), limit: None, offset: None, include: ["documents", "metadatas"] };
        self.get_page(collection, &id, &body).await
    }

    async fn delete(&self, collection: &str, ids: &[&str]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let id = self.collection_id(collection).await?;
        self.send(
            self.client.post(self.url(&format!("/collections/{id}/delete"))).json(&json!({ "ids": ids })),
            Some(collection),
        )
        .await?;
        debug!(collection, count = ids.len(), "deleted records from chroma");
        Ok(())
    }

    async fn list_records(&self, collection: &str) -> Result<Vec<VectorRecord>> {
        let id = self.collection_id(collection).await?;
        let mut records = Vec::new();
        loop {
            let body = GetRequest {
                ids: None,
                limit: Some(LIST_PAGE_SIZE),
                offset: Some(records.len()),
                include: ["documents", "metadatas"],
            };
            let page = self.get_page(collection, &id, &body).await?;
            let done = page.len() < LIST_PAGE_SIZE;
            records.extend(page);
            if done {
                break;
            }
        }
        Ok(records)
    }
}

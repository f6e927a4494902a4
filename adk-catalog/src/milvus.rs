//! Milvus vector store backend.
//!
//! Provides [`MilvusVectorStore`] which implements [`VectorStore`] against the
//! Milvus RESTful API v2 (`/v2/vectordb/...`) using reqwest.
//!
//! Each collection uses an explicit schema: a `VarChar` primary key `id`, a
//! `FloatVector` field `vector` indexed with `AUTOINDEX` under the `COSINE`
//! metric, and dynamic fields `document` and `metadata`. Search hits report
//! cosine similarity, i.e. [`DistanceMetric::CosineSimilarity`].
//!
//! # Example
//!
//! ```rust,ignore
//! use adk_catalog::milvus::MilvusVectorStore;
//!
//! let store = MilvusVectorStore::from_host("localhost", 19530).with_token("root:Milvus");
//! store.create_collection("unspsc_categories", 384).await?;
//! ```

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::document::{ScoredRecord, VectorRecord};
use crate::error::{CatalogError, Result};
use crate::vectorstore::{DistanceMetric, VectorStore, metadata_to_strings};

const BACKEND: &str = "milvus";

/// Maximum length of a primary key.
const ID_MAX_LENGTH: usize = 512;

/// Page size used when listing every record of a collection.
const LIST_PAGE_SIZE: usize = 1000;

const OUTPUT_FIELDS: [&str; 3] = ["id", "document", "metadata"];

/// A [`VectorStore`] backed by a Milvus server.
pub struct MilvusVectorStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl MilvusVectorStore {
    /// Create a store talking to the given base URL, e.g. `http://localhost:19530`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    /// Create a store for `http://{host}:{port}`.
    pub fn from_host(host: &str, port: u16) -> Self {
        Self::new(format!("http://{host}:{port}"))
    }

    /// Authenticate with a bearer token (`user:password` or an API key).
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// POST `body` to a v2 endpoint and unwrap the `{code, data, message}` envelope.
    async fn post<T: DeserializeOwned + Default>(
        &self,
        path: &str,
        body: &Value,
        collection: Option<&str>,
    ) -> Result<T> {
        let url = format!("{}/v2/vectordb{path}", self.base_url);
        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CatalogError::unavailable(BACKEND, e.to_string()))?;
        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(CatalogError::unavailable(BACKEND, format!("{status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CatalogError::backend(BACKEND, format!("{status}: {body}")));
        }

        let envelope: MilvusResponse<T> = response
            .json()
            .await
            .map_err(|e| CatalogError::backend(BACKEND, format!("failed to parse response: {e}")))?;
        envelope.into_result(collection)
    }

    async fn query_entities(&self, collection: &str, body: &Value) -> Result<Vec<VectorRecord>> {
        let rows: Vec<Map<String, Value>> =
            self.post("/entities/query", body, Some(collection)).await?;
        Ok(rows.into_iter().map(|row| row_to_record(collection, row).record).collect())
    }
}

// ── Milvus API response types ──────────────────────────────────────

#[derive(Deserialize)]
struct MilvusResponse<T> {
    code: i32,
    data: Option<T>,
    message: Option<String>,
}

impl<T: Default> MilvusResponse<T> {
    fn into_result(self, collection: Option<&str>) -> Result<T> {
        if self.code == 0 {
            return Ok(self.data.unwrap_or_default());
        }
        let message = self.message.unwrap_or_else(|| format!("error code {}", self.code));
        Err(classify_failure(self.code, message, collection))
    }
}

/// Map a non-zero Milvus envelope onto a catalog error.
fn classify_failure(code: i32, message: String, collection: Option<&str>) -> CatalogError {
    let lower = message.to_lowercase();
    if let Some(name) = collection {
        if code == 100 || lower.contains("collection not found") || lower.contains("can't find collection")
        {
            return CatalogError::CollectionNotFound(name.to_string());
        }
        if lower.contains("already exist") {
            return CatalogError::DuplicateCollection(name.to_string());
        }
    }
    if lower.contains("rate limit") || lower.contains("service unavailable") {
        return CatalogError::unavailable(BACKEND, message);
    }
    CatalogError::backend(BACKEND, format!("code {code}: {message}"))
}

#[derive(Deserialize, Default)]
struct HasCollection {
    has: bool,
}

#[derive(Serialize)]
struct Entity<'a> {
    id: &'a str,
    vector: &'a [f32],
    document: &'a str,
    metadata: &'a std::collections::HashMap<String, String>,
}

/// Convert a returned row into a record; `distance` becomes the raw score.
fn row_to_record(collection: &str, mut row: Map<String, Value>) -> ScoredRecord {
    let id = match row.remove("id") {
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
        None => String::new(),
    };
    let document = match row.remove("document") {
        Some(Value::String(s)) => s,
        _ => String::new(),
    };
    let metadata = match row.remove("metadata") {
        Some(Value::Object(map)) => Some(map),
        // Older rows may hold metadata as a JSON-encoded string.
        Some(Value::String(s)) => serde_json::from_str(&s).ok(),
        _ => None,
    };
    let raw_score =
        row.get("distance").and_then(Value::as_f64).map(|d| d as f32).unwrap_or(f32::NAN);

    ScoredRecord {
        record: VectorRecord {
            id,
            embedding: Vec::new(),
            document,
            metadata: metadata_to_strings(metadata),
            collection: collection.to_string(),
        },
        raw_score,
    }
}

/// Filter expression matching any of `ids`.
fn id_filter(ids: &[&str]) -> String {
    let quoted: Vec<String> = ids.iter().map(|id| Value::from(*id).to_string()).collect();
    format!("id in [{}]", quoted.join(", "))
}

fn create_body(name: &str, dimensions: usize) -> Value {
    json!({
        "collectionName": name,
        "schema": {
            "autoId": false,
            "enableDynamicField": true,
            "fields": [
                {
                    "fieldName": "id",
                    "dataType": "VarChar",
                    "isPrimary": true,
                    "elementTypeParams": { "max_length": ID_MAX_LENGTH }
                },
                {
                    "fieldName": "vector",
                    "dataType": "FloatVector",
                    "elementTypeParams": { "dim": dimensions }
                }
            ]
        },
        "indexParams": [
            {
                "fieldName": "vector",
                "indexName": "vector",
                "metricType": "COSINE",
                "indexType": "AUTOINDEX"
            }
        ]
    })
}

// ── VectorStore implementation ─────────────────────────────────────

#[async_trait]
impl VectorStore for MilvusVectorStore {
    fn backend_name(&self) -> &str {
        BACKEND
    }

    fn metric(&self) -> DistanceMetric {
        DistanceMetric::CosineSimilarity
    }

    async fn heartbeat(&self) -> Result<()> {
        let _: Vec<String> = self.post("/collections/list", &json!({}), None).await?;
        Ok(())
    }

    async fn create_collection(&self, name: &str, dimensions: usize) -> Result<()> {
        // Milvus accepts re-creating an identical collection, so check first.
        if self.collection_exists(name).await? {
            return Err(CatalogError::DuplicateCollection(name.to_string()));
        }
        let _: Value = self.post("/collections/create", &create_body(name, dimensions), Some(name)).await?;
        debug!(collection = name, dimensions, "created milvus collection");
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        if !self.collection_exists(name).await? {
            return Err(CatalogError::CollectionNotFound(name.to_string()));
        }
        let _: Value =
            self.post("/collections/drop", &json!({ "collectionName": name }), Some(name)).await?;
        debug!(collection = name, "dropped milvus collection");
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        self.post("/collections/list", &json!({}), None).await
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        let has: HasCollection =
            self.post("/collections/has", &json!({ "collectionName": name }), None).await?;
        Ok(has.has)
    }

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let data: Vec<Entity<'_>> = records
            .iter()
            .map(|r| Entity {
                id: &r.id,
                vector: &r.embedding,
                document: &r.document,
                metadata: &r.metadata,
            })
            .collect();
        let body = json!({ "collectionName": collection, "data": data });
        let _: Value = self.post("/entities/upsert", &body, Some(collection)).await?;
        debug!(collection, count = records.len(), "upserted records to milvus");
        Ok(())
    }

    async fn query(&self, collection: &str, vector: &[f32], k: usize) -> Result<Vec<ScoredRecord>> {
        let body = json!({
            "collectionName": collection,
            "data": [vector],
            "annsField": "vector",
            "limit": k,
            "outputFields": OUTPUT_FIELDS,
        });
        let rows: Vec<Map<String, Value>> = self.post("/entities/search", &body, Some(collection)).await?;
        Ok(rows.into_iter().map(|row| row_to_record(collection, row)).collect())
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        let body = json!({
            "collectionName": collection,
            "filter": "",
            "outputFields": ["count(*)"],
        });
        let rows: Vec<Map<String, Value>> = self.post("/entities/query", &body, Some(collection)).await?;
        Ok(rows.first().and_then(|row| row.get("count(*)")).and_then(Value::as_u64).unwrap_or(0))
    }

    async fn get(&self, collection: &str, ids: &[&str]) -> Result<Vec<VectorRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let body = json!({
            "collectionName": collection,
            "id": ids,
            "outputFields": OUTPUT_FIELDS,
        });
        let rows: Vec<Map<String, Value>> = self.post("/entities/get", &body, Some(collection)).await?;
        Ok(rows.into_iter().map(|row| row_to_record(collection, row).record).collect())
    }

    async fn delete(&self, collection: &str, ids: &[&str]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let body = json!({ "collectionName": collection, "filter": id_filter(ids) });
        let _: Value = self.post("/entities/delete", &body, Some(collection)).await?;
        debug!(collection, count = ids.len(), "deleted records from milvus");
        Ok(())
    }

    async fn list_records(&self, collection: &str) -> Result<Vec<VectorRecord>> {
        let mut records = Vec::new();
        loop {
            let body = json!({
                "collectionName": collection,
                "filter": "id != \"\"",
                "outputFields": OUTPUT_FIELDS,
                "limit": LIST_PAGE_SIZE,
                "offset": records.len(),
            });
            let page = self.query_entities(collection, &body).await?;
            let done = page.len() < LIST_PAGE_SIZE;
            records.extend(page);
            if done {
                break;
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_errors_are_classified() {
        let missing: MilvusResponse<Value> = serde_json::from_value(json!({
            "code": 100,
            "message": "collection not found[collection=unspsc]"
        }))
        .unwrap();
        assert!(matches!(missing.into_result(Some("unspsc")), Err(CatalogError::CollectionNotFound(_))));

        let other: MilvusResponse<Value> =
            serde_json::from_value(json!({ "code": 1100, "message": "invalid parameter" })).unwrap();
        assert!(matches!(other.into_result(Some("unspsc")), Err(CatalogError::Backend { .. })));
    }

    #[test]
    fn successful_envelope_without_data_defaults() {
        let ok: MilvusResponse<Vec<String>> = serde_json::from_value(json!({ "code": 0 })).unwrap();
        assert!(ok.into_result(None).unwrap().is_empty());
    }

    #[test]
    fn search_rows_become_scored_records() {
        let row = json!({
            "id": "43211503",
            "distance": 0.93,
            "document": "Notebook computer",
            "metadata": { "code": "43211503", "item_type": "unspsc_commodity" }
        });
        let hit = row_to_record("unspsc_categories", row.as_object().cloned().unwrap());
        assert_eq!(hit.record.id, "43211503");
        assert_eq!(hit.record.metadata["item_type"], "unspsc_commodity");
        assert!((hit.raw_score - 0.93).abs() < 1e-6);
    }

    #[test]
    fn string_encoded_metadata_is_parsed() {
        let row = json!({ "id": "k", "document": "d", "metadata": "{\"name\":\"k\"}" });
        let record = row_to_record("m", row.as_object().cloned().unwrap()).record;
        assert_eq!(record.metadata["name"], "k");
    }

    #[test]
    fn id_filter_quotes_and_escapes() {
        assert_eq!(id_filter(&["a", "b\"c"]), r#"id in ["a", "b\"c"]"#);
    }

    #[test]
    fn create_body_declares_schema_and_index() {
        let body = create_body("docs", 384);
        assert_eq!(body["schema"]["fields"][1]["elementTypeParams"]["dim"], 384);
        assert_eq!(body["indexParams"][0]["metricType"], "COSINE");
    }
}

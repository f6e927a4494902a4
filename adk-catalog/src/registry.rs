//! Collection registry: which logical collections exist and what they hold.
//!
//! The registry only tracks kinds. Item counts are never cached; they are
//! read from the backend whenever a [`Collection`] is described.

use std::collections::HashMap;

use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::sync::RwLock;

use crate::adapter::VectorBackend;
use crate::document::{Collection, CollectionKind};
use crate::error::Result;

/// Maps collection names to their [`CollectionKind`].
///
/// The manual collection is always registered as [`CollectionKind::Manual`];
/// any other name defaults to [`CollectionKind::Catalog`].
#[derive(Debug)]
pub struct CollectionRegistry {
    manual: String,
    kinds: RwLock<HashMap<String, CollectionKind>>,
}

impl CollectionRegistry {
    /// Create a registry with the given manual collection name.
    pub fn new(manual_collection: impl Into<String>) -> Self {
        let manual = manual_collection.into();
        let kinds = HashMap::from([(manual.clone(), CollectionKind::Manual)]);
        Self { manual, kinds: RwLock::new(kinds) }
    }

    /// Name of the manual info collection.
    pub fn manual_collection(&self) -> &str {
        &self.manual
    }

    /// Record the kind of a collection.
    pub async fn register(&self, name: &str, kind: CollectionKind) {
        if name == self.manual {
            return;
        }
        self.kinds.write().await.insert(name.to_string(), kind);
    }

    /// Forget a deleted collection.
    pub async fn remove(&self, name: &str) {
        if name != self.manual {
            self.kinds.write().await.remove(name);
        }
    }

    /// Kind of the named collection.
    pub async fn kind_of(&self, name: &str) -> CollectionKind {
        self.kinds.read().await.get(name).copied().unwrap_or(CollectionKind::Catalog)
    }

    /// The subset of `names` that cross-collection search may query.
    pub async fn searchable(&self, names: Vec<String>) -> Vec<String> {
        let kinds = self.kinds.read().await;
        names
            .into_iter()
            .filter(|n| kinds.get(n).copied().unwrap_or(CollectionKind::Catalog) != CollectionKind::Manual)
            .collect()
    }

    /// Describe one collection with a fresh item count.
    pub async fn describe(&self, backend: &VectorBackend, name: &str) -> Result<Collection> {
        let item_count = backend.count(name).await?;
        Ok(Collection { name: name.to_string(), kind: self.kind_of(name).await, item_count })
    }

    /// Describe every backend collection, sorted by name.
    pub async fn list(&self, backend: &VectorBackend, concurrency: usize) -> Result<Vec<Collection>> {
        let names = backend.list_collections().await?;
        let mut collections: Vec<Collection> = stream::iter(names)
            .map(|name| async move { self.describe(backend, &name).await })
            .buffer_unordered(concurrency.max(1))
            .try_collect()
            .await?;
        collections.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(collections)
    }
}

//! Vector-store abstraction: ANN search over namespaced document sets.
//!
//! The core assumes a key/value + ANN provider; [`VectorStore`] is that
//! seam. Two implementations ship here: an in-memory cosine store (tests,
//! small corpora) and a persistent SQLite store backed by sqlite-vec.
//! [`VectorStoreManager`] pairs a store namespace with an embedding
//! provider and is cached process-wide.

mod in_memory;
mod sqlite_vec;

pub use in_memory::InMemoryVectorStore;
pub use sqlite_vec::SqliteVecStore;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde_json::Value;

use crate::embedding::{EmbeddingProvider, TaskType};
use crate::store::StoreError;
use crate::token_usage::UsageContext;

/// One stored document: id, embeddable content, vector and provenance
/// metadata.
#[derive(Clone, Debug)]
pub struct VectorRecord {
    pub id: String,
    pub content: String,
    pub vector: Vec<f32>,
    pub metadata: Value,
}

/// One ANN hit with its similarity-like score.
#[derive(Clone, Debug)]
pub struct DocumentWithScore {
    pub id: String,
    pub content: String,
    pub score: f32,
    pub metadata: Value,
}

/// One metadata condition (`$eq`, `$in`, `$gte`/`$lte` range).
#[derive(Clone, Debug)]
pub enum FilterCondition {
    Eq(Value),
    In(Vec<Value>),
    Range { gte: Option<Value>, lte: Option<Value> },
}

impl FilterCondition {
    fn value_matches(expected: &Value, actual: &Value) -> bool {
        expected == actual
    }

    fn le(a: &Value, b: &Value) -> bool {
        match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x <= y,
            // Strings compare lexicographically (covers YYYYMMDD ranges).
            _ => match (a.as_str(), b.as_str()) {
                (Some(x), Some(y)) => x <= y,
                _ => false,
            },
        }
    }

    /// Whether the document field value satisfies this condition. An `$in`
    /// condition against an array field matches when any element is in the
    /// set (keyword lists).
    pub fn matches(&self, actual: &Value) -> bool {
        match self {
            FilterCondition::Eq(expected) => Self::value_matches(expected, actual),
            FilterCondition::In(set) => match actual.as_array() {
                Some(elements) => elements
                    .iter()
                    .any(|el| set.iter().any(|s| Self::value_matches(s, el))),
                None => set.iter().any(|s| Self::value_matches(s, actual)),
            },
            FilterCondition::Range { gte, lte } => {
                if let Some(min) = gte {
                    if !Self::le(min, actual) {
                        return false;
                    }
                }
                if let Some(max) = lte {
                    if !Self::le(actual, max) {
                        return false;
                    }
                }
                true
            }
        }
    }
}

/// Conjunction of per-field conditions; a missing field fails its condition.
#[derive(Clone, Debug, Default)]
pub struct MetadataFilter(pub HashMap<String, FilterCondition>);

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), FilterCondition::Eq(value.into()));
        self
    }

    pub fn any_of(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.0.insert(field.into(), FilterCondition::In(values));
        self
    }

    pub fn range(
        mut self,
        field: impl Into<String>,
        gte: Option<Value>,
        lte: Option<Value>,
    ) -> Self {
        self.0
            .insert(field.into(), FilterCondition::Range { gte, lte });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, metadata: &Value) -> bool {
        self.0.iter().all(|(field, condition)| {
            metadata
                .get(field)
                .map(|actual| condition.matches(actual))
                .unwrap_or(false)
        })
    }
}

/// ANN provider seam: upsert and KNN search within a namespace.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<(), StoreError>;

    /// Nearest neighbors of `query` in the namespace; filtered hits are
    /// excluded before the top-k cut.
    async fn search(
        &self,
        namespace: &str,
        query: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<DocumentWithScore>, StoreError>;

    /// Releases resources. Default: nothing to release.
    async fn aclose(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// A store namespace bound to its embedding provider.
///
/// Process-scoped and thread-safe-reusable: it only dispatches to the
/// underlying clients.
pub struct VectorStoreManager {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    namespace: String,
}

impl VectorStoreManager {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            store,
            embedder,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// Embeds the query and runs ANN search in this manager's namespace.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
        usage: &UsageContext,
    ) -> Result<Vec<DocumentWithScore>, StoreError> {
        let vectors = self
            .embedder
            .create_embeddings(&[query.to_string()], TaskType::RetrievalQuery, usage)
            .await
            .map_err(|e| StoreError::Embedding(e.to_string()))?;
        let query_vec = vectors
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Embedding("no query embedding returned".to_string()))?;
        self.store
            .search(&self.namespace, &query_vec, top_k, filter)
            .await
    }

    /// Embeds contents and upserts documents into this namespace.
    pub async fn index(
        &self,
        docs: Vec<(String, String, Value)>,
        usage: &UsageContext,
    ) -> Result<(), StoreError> {
        if docs.is_empty() {
            return Ok(());
        }
        let contents: Vec<String> = docs.iter().map(|(_, c, _)| c.clone()).collect();
        let vectors = self
            .embedder
            .create_embeddings(&contents, TaskType::RetrievalDocument, usage)
            .await
            .map_err(|e| StoreError::Embedding(e.to_string()))?;
        let records = docs
            .into_iter()
            .zip(vectors)
            .map(|((id, content, metadata), vector)| VectorRecord {
                id,
                content,
                vector,
                metadata,
            })
            .collect();
        self.store.upsert(&self.namespace, records).await
    }
}

static MANAGER_CACHE: Lazy<DashMap<String, Arc<VectorStoreManager>>> = Lazy::new(DashMap::new);

/// Process-wide manager cache keyed by namespace; the builder runs once per
/// key (init-on-first-use).
pub fn get_cached_vector_store_manager<F>(namespace: &str, build: F) -> Arc<VectorStoreManager>
where
    F: FnOnce() -> VectorStoreManager,
{
    MANAGER_CACHE
        .entry(namespace.to_string())
        .or_insert_with(|| Arc::new(build()))
        .clone()
}

/// Drops every cached manager (config invalidation hook).
pub fn invalidate_vector_store_managers() {
    MANAGER_CACHE.clear();
}

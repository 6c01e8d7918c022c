//! In-memory vector store with cosine similarity. Tests and small corpora.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::store::StoreError;

use super::{DocumentWithScore, MetadataFilter, VectorRecord, VectorStore};

/// In-memory [`VectorStore`]: namespace → records, cosine-ranked search.
#[derive(Default)]
pub struct InMemoryVectorStore {
    entries: RwLock<HashMap<String, Vec<VectorRecord>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        let bucket = entries.entry(namespace.to_string()).or_default();
        for record in records {
            match bucket.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record,
                None => bucket.push(record),
            }
        }
        Ok(())
    }

    async fn search(
        &self,
        namespace: &str,
        query: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<DocumentWithScore>, StoreError> {
        let entries = self.entries.read().await;
        let Some(bucket) = entries.get(namespace) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<DocumentWithScore> = bucket
            .iter()
            .filter(|r| filter.map(|f| f.matches(&r.metadata)).unwrap_or(true))
            .map(|r| DocumentWithScore {
                id: r.id.clone(),
                content: r.content.clone(),
                score: Self::cosine_similarity(query, &r.vector),
                metadata: r.metadata.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }
}

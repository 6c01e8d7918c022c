//! Hybrid retrieval: semantic similarity fused with lexical overlap.
//!
//! The lexical leg is a BM25-ish token-overlap contextual score; the fusion
//! weight is provider-supplied configuration, not a constant of the core.

use std::collections::HashSet;

use crate::vector::MetadataFilter;

use super::{RetrievalError, RetrievalResult, SemanticRetriever};

/// Fuses semantic and lexical scores: `w·semantic + (1-w)·lexical`.
pub struct HybridRetriever {
    semantic: SemanticRetriever,
    /// Semantic share of the fused score, 0..1.
    semantic_weight: f32,
}

impl HybridRetriever {
    pub fn new(semantic: SemanticRetriever, semantic_weight: f32) -> Self {
        Self {
            semantic,
            semantic_weight: semantic_weight.clamp(0.0, 1.0),
        }
    }

    /// Token-overlap score of the document against the query (0..1).
    fn lexical_score(query: &str, content: &str) -> f32 {
        let query_tokens: HashSet<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();
        if query_tokens.is_empty() {
            return 0.0;
        }
        let content_tokens: HashSet<String> = content
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();
        let overlap = query_tokens.intersection(&content_tokens).count();
        overlap as f32 / query_tokens.len() as f32
    }

    /// Retrieves semantically, then re-scores each hit with the fusion
    /// formula and re-sorts.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filters: Option<&MetadataFilter>,
    ) -> Result<RetrievalResult, RetrievalError> {
        let mut result = self.semantic.retrieve(query, top_k, filters).await?;
        let w = self.semantic_weight;
        for doc in &mut result.documents {
            let lexical = Self::lexical_score(query, &doc.content);
            doc.score = doc.score * w + lexical * (1.0 - w);
        }
        result
            .documents
            .sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(result)
    }
}

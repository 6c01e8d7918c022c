//! Agent execution error types.
//!
//! Used by `Agent::process` and by the graph runner. Layer-specific errors
//! (`LlmError`, `EmbeddingError`, `RetrievalError`, `StoreError`) live in
//! their modules and convert into `AgentError` at the agent boundary.

use thiserror::Error;

/// Agent execution error.
///
/// Returned by `Agent::process` when a step fails hard. Soft failures
/// (empty retrieval, unparseable output) are recorded inside the state
/// instead and the agent returns `Ok`.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Execution failed with a message (e.g. LLM call failed after fallbacks).
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// Provider-facing call failed (LLM fabric).
    #[error("llm error: {0}")]
    Llm(#[from] crate::llm::LlmError),

    /// Embedding fabric failure.
    #[error("embedding error: {0}")]
    Embedding(#[from] crate::embedding::EmbeddingError),

    /// Retrieval pipeline failure (vector search, rerank).
    #[error("retrieval error: {0}")]
    Retrieval(#[from] crate::retriever::RetrievalError),

    /// Malformed payload from an external collaborator (data service schema,
    /// unknown provider enum).
    #[error("protocol error: {0}")]
    Protocol(String),
}

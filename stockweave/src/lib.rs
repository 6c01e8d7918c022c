//! # Stockweave
//!
//! Multi-agent RAG core for stock/financial analysis. A question plus a
//! target company flows through a graph of specialized agents with a
//! **state-in, state-out** design: one [`AgentState`] carries the query,
//! analysis, retrieved evidence and results through every agent.
//!
//! ## Design principles
//!
//! - **Single state type**: every agent reads and writes [`AgentState`];
//!   the state is the sole channel of inter-agent communication, and each
//!   agent owns exactly its own keys.
//! - **One step per agent**: `process(state) → state`; the graph owns
//!   ordering and parallelism.
//! - **Provider seams everywhere**: LLMs ([`LlmClient`]), embeddings
//!   ([`EmbeddingProvider`]), ANN search ([`VectorStore`]), reranking
//!   ([`RerankModel`]), market data ([`StockDataService`]) are trait
//!   objects with mock implementations for tests.
//!
//! ## Main modules
//!
//! - [`state`]: [`AgentState`], [`SourceHit`], [`QuestionAnalysis`],
//!   [`ProcessingStatus`], [`StatusBoard`].
//! - [`llm`]: [`AgentLlm`] (per-agent config, fallback chain, token
//!   accounting), [`ChatOpenAi`], [`MockLlm`], structured output.
//! - [`embedding`]: provider-neutral embedding fabric with
//!   tokenization-aware batching.
//! - [`vector`]: ANN stores (in-memory, sqlite-vec) and the process-cached
//!   [`VectorStoreManager`].
//! - [`retriever`]: semantic retrieval, reranking, hybrid fusion, scoring.
//! - [`agents`]: question analyzer, per-source retrievers, integrator,
//!   summarizer, response formatter.
//! - [`graph`]: [`AgentGraph`] — dependency-ordered execution with a
//!   parallel retriever fan-out and observable per-session status.
//! - [`technical`]: candle frames, indicators, patterns, signals.
//! - [`components`]: the typed component tree of the final answer.
//! - [`token_usage`]: usage records, tracking contexts, the bounded async
//!   write queue.
//! - [`financial`]: the statement repository read interface.
//! - [`datasvc`]: the technical-data service client.

pub mod agents;
pub mod components;
pub mod datasvc;
pub mod embedding;
pub mod error;
pub mod financial;
pub mod graph;
pub mod llm;
pub mod message;
pub mod prompts;
pub mod retriever;
pub mod state;
pub mod store;
pub mod technical;
pub mod token_usage;
pub mod vector;

pub use agents::Agent;
pub use components::Component;
pub use error::AgentError;
pub use graph::{AgentGraph, AgentRegistry};
pub use llm::{AgentLlm, ChatOpenAi, LlmClient, MockLlm};
pub use message::Message;
pub use state::{AgentState, ProcessingStatus, QuestionAnalysis, SourceHit, StatusBoard};

// Re-exported seams used in doc examples and by the serve crate.
pub use datasvc::StockDataService;
pub use embedding::EmbeddingProvider;
pub use retriever::RerankModel;
pub use vector::{VectorStore, VectorStoreManager};

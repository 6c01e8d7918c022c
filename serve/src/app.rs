//! Axum app: state and router for the streaming chat endpoint.

use std::sync::Arc;

use axum::{routing::post, Router};

use stockweave::AgentGraph;

use super::chat::stream_chat;

/// Shared app state: the compiled agent graph.
#[derive(Clone)]
pub struct AppState {
    pub graph: Arc<AgentGraph>,
}

impl AppState {
    pub fn new(graph: Arc<AgentGraph>) -> Self {
        Self { graph }
    }
}

/// Routes: `POST /api/v1/chat/stream`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/chat/stream", post(stream_chat))
        .with_state(state)
}

//! Streaming chat handler: request → graph run → NDJSON frame stream.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::Response,
    Json,
};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tracing::{error, info};
use uuid::Uuid;

use stockweave::{AgentGraph, AgentState};
use stream_event::{epoch_seconds, ChatStreamEvent};

use super::app::AppState;
use super::monitor::monitor_status;

/// Frame queue depth: the single rendezvous between producer and writer.
const QUEUE_CAPACITY: usize = 256;
/// Characters per `token` frame when draining the final answer.
const TOKEN_CHUNK_CHARS: usize = 24;

/// Body of `POST /api/v1/chat/stream`.
#[derive(Clone, Debug, Deserialize)]
pub struct ChatStreamRequest {
    pub message: String,
    #[serde(default)]
    pub stock_code: Option<String>,
    #[serde(default)]
    pub stock_name: Option<String>,
    #[serde(default)]
    pub is_follow_up: bool,
}

fn now() -> f64 {
    epoch_seconds(SystemTime::now())
}

/// Runs the graph for one request, emitting frames onto the queue.
async fn run_request(
    graph: Arc<AgentGraph>,
    request: ChatStreamRequest,
    session_id: String,
    tx: mpsc::Sender<ChatStreamEvent>,
) {
    let started = Instant::now();
    let _ = tx
        .send(ChatStreamEvent::Start {
            message: "분석을 시작합니다.".to_string(),
            timestamp: now(),
        })
        .await;

    let (done_tx, done_rx) = watch::channel(false);
    let monitor = tokio::spawn(monitor_status(
        graph.board(),
        session_id.clone(),
        tx.clone(),
        started,
        done_rx,
    ));

    let mut state = AgentState::new(session_id.clone(), request.message.clone());
    state.stock_code = request.stock_code.clone();
    state.stock_name = request.stock_name.clone();
    state.is_follow_up = request.is_follow_up;

    let final_state = graph.execute(state).await;
    let _ = done_tx.send(true);
    let _ = monitor.await;

    let message_id = Uuid::new_v4().to_string();
    let elapsed = started.elapsed().as_secs_f64();

    match final_state.answer.clone().filter(|a| !a.is_empty()) {
        Some(answer) => {
            let _ = tx
                .send(ChatStreamEvent::ResponseStart {
                    message: "응답 생성을 시작합니다.".to_string(),
                    timestamp: now(),
                    elapsed,
                })
                .await;

            // Drain the formatted answer as token frames.
            let chars: Vec<char> = answer.chars().collect();
            for chunk in chars.chunks(TOKEN_CHUNK_CHARS) {
                let _ = tx
                    .send(ChatStreamEvent::Token {
                        token: chunk.iter().collect(),
                        message_id: message_id.clone(),
                        timestamp: now(),
                    })
                    .await;
            }

            let metadata = serde_json::json!({
                "components": final_state.components,
                "processing_status": final_state.processing_status,
                "metrics": final_state.metrics,
            });
            info!(session = %session_id, elapsed, "chat stream complete");
            let _ = tx
                .send(ChatStreamEvent::Complete {
                    message: "분석이 완료되었습니다.".to_string(),
                    response: answer,
                    response_expert: final_state.formatted_response.clone().unwrap_or_default(),
                    message_id,
                    metadata,
                    timestamp: now(),
                    elapsed: started.elapsed().as_secs_f64(),
                })
                .await;
        }
        None => {
            let detail = final_state
                .errors
                .last()
                .map(|e| e.error.clone())
                .unwrap_or_else(|| "응답을 생성하지 못했습니다.".to_string());
            error!(session = %session_id, error = %detail, "chat stream failed");
            let _ = tx
                .send(ChatStreamEvent::Error {
                    message: detail,
                    timestamp: now(),
                    elapsed: started.elapsed().as_secs_f64(),
                })
                .await;
        }
    }

    graph.board().remove(&session_id);
}

/// `POST /api/v1/chat/stream` — newline-delimited JSON frames.
pub async fn stream_chat(
    State(state): State<AppState>,
    Json(request): Json<ChatStreamRequest>,
) -> Response {
    let session_id = Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::channel::<ChatStreamEvent>(QUEUE_CAPACITY);

    tokio::spawn(run_request(
        Arc::clone(&state.graph),
        request,
        session_id,
        tx,
    ));

    let body = Body::from_stream(ReceiverStream::new(rx).map(|event| {
        Ok::<String, Infallible>(event.to_ndjson_line().unwrap_or_else(|_| "\n".to_string()))
    }));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(body)
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

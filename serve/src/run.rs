//! Server entry: tracing init + bind + serve.

use std::net::SocketAddr;
use std::sync::Arc;

use stockweave::AgentGraph;
use tracing::info;

use super::app::{router, AppState};

/// Initializes tracing from `RUST_LOG` (info default) and serves the chat
/// endpoint until the listener closes.
pub async fn run(
    addr: SocketAddr,
    graph: Arc<AgentGraph>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();

    let app = router(AppState::new(graph));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "chat server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

//! Streaming chat HTTP layer.
//!
//! One streaming POST endpoint drives the agent graph and writes
//! newline-delimited JSON frames ([`stream_event::ChatStreamEvent`]): a
//! bounded queue is the single rendezvous between the graph side and the
//! response body, and a monitor task diffs the per-session status snapshot
//! every 0.5 s into status frames on the same queue.

mod app;
mod chat;
mod monitor;
mod run;

pub use app::{router, AppState};
pub use chat::ChatStreamRequest;
pub use monitor::monitor_status;
pub use run::run;

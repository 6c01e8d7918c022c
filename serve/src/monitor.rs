//! Status monitor: polls the session's status snapshot and emits frames.
//!
//! Every 0.5 s the monitor diffs the board snapshot against its previous
//! one; each change becomes an `agent_status` frame plus an `agent_start`
//! or `agent_complete` frame with the user-facing message. The monitor
//! stops after one final diff once the graph signals completion.

use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime};

use stockweave::graph::{agent_message, MessagePhase};
use stockweave::{ProcessingStatus, StatusBoard};
use stream_event::{epoch_seconds, ChatStreamEvent};
use tokio::sync::{mpsc, watch};

/// Poll interval for the status snapshot.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

fn now() -> f64 {
    epoch_seconds(SystemTime::now())
}

/// Emits frames for the transitions between two snapshots.
fn emit_diff(
    previous: &HashMap<String, ProcessingStatus>,
    current: &HashMap<String, ProcessingStatus>,
    started: Instant,
    tx: &mpsc::Sender<ChatStreamEvent>,
) {
    let mut changed: Vec<(&String, &ProcessingStatus)> = current
        .iter()
        .filter(|(agent, status)| previous.get(*agent) != Some(*status))
        .collect();
    changed.sort_by(|a, b| a.0.cmp(b.0));

    for (agent, status) in changed {
        let elapsed = started.elapsed().as_secs_f64();
        let _ = tx.try_send(ChatStreamEvent::AgentStatus {
            agent: agent.clone(),
            status: status.as_str().to_string(),
            timestamp: now(),
            elapsed,
        });
        match status {
            ProcessingStatus::Processing => {
                let _ = tx.try_send(ChatStreamEvent::AgentStart {
                    agent: agent.clone(),
                    message: agent_message(agent, MessagePhase::Start),
                    timestamp: now(),
                    elapsed,
                });
            }
            status if status.is_terminal() => {
                let _ = tx.try_send(ChatStreamEvent::AgentComplete {
                    agent: agent.clone(),
                    message: agent_message(agent, MessagePhase::Complete),
                    timestamp: now(),
                    elapsed,
                });
            }
            _ => {}
        }
    }
}

/// Watches one session's status until `done` flips, then drains one last
/// diff.
pub async fn monitor_status(
    board: std::sync::Arc<StatusBoard>,
    session_id: String,
    tx: mpsc::Sender<ChatStreamEvent>,
    started: Instant,
    mut done: watch::Receiver<bool>,
) {
    let mut previous: HashMap<String, ProcessingStatus> = HashMap::new();
    loop {
        let current = board.snapshot(&session_id);
        emit_diff(&previous, &current, started, &tx);
        previous = current;

        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = done.changed() => {
                let current = board.snapshot(&session_id);
                emit_diff(&previous, &current, started, &tx);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// **Scenario**: a processing→completed transition emits agent_status,
    /// agent_start and agent_complete frames with the Korean messages.
    #[tokio::test]
    async fn transitions_become_frames() {
        let board = Arc::new(StatusBoard::new());
        let (tx, mut rx) = mpsc::channel(32);
        let (done_tx, done_rx) = watch::channel(false);

        let handle = tokio::spawn(monitor_status(
            Arc::clone(&board),
            "sess-m".to_string(),
            tx,
            Instant::now(),
            done_rx,
        ));

        board.set("sess-m", "telegram_retriever", ProcessingStatus::Processing);
        tokio::time::sleep(Duration::from_millis(600)).await;
        board.set("sess-m", "telegram_retriever", ProcessingStatus::Completed);
        tokio::time::sleep(Duration::from_millis(600)).await;
        done_tx.send(true).unwrap();
        handle.await.unwrap();

        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev.to_value().unwrap());
        }
        let kinds: Vec<&str> = events
            .iter()
            .map(|e| e["event"].as_str().unwrap())
            .collect();
        assert!(kinds.contains(&"agent_status"));
        assert!(kinds.contains(&"agent_start"));
        assert!(kinds.contains(&"agent_complete"));

        let start = events
            .iter()
            .find(|e| e["event"] == "agent_start")
            .unwrap();
        assert_eq!(start["data"]["message"], "내부 데이터 정보 검색 중...");
    }
}

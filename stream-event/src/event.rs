//! Wire-level chat stream events (one NDJSON frame per event).
//! Agent-status frames carry the internal agent name plus a user-facing message;
//! the HTTP layer serializes each event as one `{"event": ..., "data": {...}}` line.

use serde::Serialize;
use serde_json::Value;

/// One frame of the streaming chat response.
///
/// Serialized with `event` as the tag and the payload flattened under `data`,
/// matching the frame table of the chat endpoint. Timestamps are seconds since
/// epoch (f64); embedded datetimes are ISO-8601 strings inside `metadata`.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ChatStreamEvent {
    /// Stream opened; emitted once before any agent runs.
    Start { message: String, timestamp: f64 },
    /// Raw status transition of one agent (internal name + status string).
    AgentStatus {
        agent: String,
        status: String,
        timestamp: f64,
        elapsed: f64,
    },
    /// An agent entered `processing`; `message` is the user-facing text.
    AgentStart {
        agent: String,
        message: String,
        timestamp: f64,
        elapsed: f64,
    },
    /// An agent reached a terminal status; `message` is the user-facing text.
    AgentComplete {
        agent: String,
        message: String,
        timestamp: f64,
        elapsed: f64,
    },
    /// The answer body is about to stream.
    ResponseStart {
        message: String,
        timestamp: f64,
        elapsed: f64,
    },
    /// One streamed answer token.
    Token {
        token: String,
        message_id: String,
        timestamp: f64,
    },
    /// Terminal frame: the full response plus metadata.
    Complete {
        message: String,
        response: String,
        response_expert: String,
        message_id: String,
        metadata: Value,
        timestamp: f64,
        elapsed: f64,
    },
    /// Terminal error frame; `message` may carry partial response text.
    Error {
        message: String,
        timestamp: f64,
        elapsed: f64,
    },
}

impl ChatStreamEvent {
    /// Serializes this event to a JSON object.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Serializes this event as one newline-terminated NDJSON frame.
    pub fn to_ndjson_line(&self) -> Result<String, serde_json::Error> {
        Ok(format!("{}\n", serde_json::to_string(self)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: The tag lands in `event` and the payload under `data`.
    #[test]
    fn event_serializes_with_event_tag() {
        let ev = ChatStreamEvent::Start {
            message: "분석을 시작합니다.".to_string(),
            timestamp: 1700000000.5,
        };
        let value = ev.to_value().unwrap();
        assert_eq!(value["event"], "start");
        assert_eq!(value["data"]["message"], "분석을 시작합니다.");
        assert_eq!(value["data"]["timestamp"], 1700000000.5);
    }

    /// **Scenario**: Token frames carry token + message_id only.
    #[test]
    fn token_frame_fields() {
        let ev = ChatStreamEvent::Token {
            token: "삼성".to_string(),
            message_id: "msg-1".to_string(),
            timestamp: 1.0,
        };
        let value = ev.to_value().unwrap();
        assert_eq!(value["event"], "token");
        assert_eq!(value["data"]["token"], "삼성");
        assert_eq!(value["data"]["message_id"], "msg-1");
        assert!(value["data"].get("elapsed").is_none());
    }

    /// **Scenario**: NDJSON line ends with exactly one newline.
    #[test]
    fn ndjson_line_is_newline_terminated() {
        let ev = ChatStreamEvent::Error {
            message: "오류".to_string(),
            timestamp: 2.0,
            elapsed: 0.1,
        };
        let line = ev.to_ndjson_line().unwrap();
        assert!(line.ends_with('\n'));
        assert!(!line[..line.len() - 1].contains('\n'));
    }
}

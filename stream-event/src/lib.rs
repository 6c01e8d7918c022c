//! Chat stream protocol: the typed NDJSON frames of the streaming chat endpoint.
//!
//! This crate defines the wire shape of a single chat stream event. It does not
//! depend on the core library; the HTTP layer bridges graph progress and LLM
//! tokens into [`ChatStreamEvent`] frames and writes one JSON line per event.

pub mod event;

pub use event::ChatStreamEvent;

/// Seconds since the Unix epoch as f64 (frame `timestamp` field).
pub fn epoch_seconds(now: std::time::SystemTime) -> f64 {
    now.duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_seconds_is_positive_for_now() {
        assert!(epoch_seconds(std::time::SystemTime::now()) > 1_600_000_000.0);
    }
}

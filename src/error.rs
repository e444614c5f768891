//! Error types for the streaming relay.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for relay process operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Process-level error type (startup, binding, templates).
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Bind error: {0}")]
    Bind(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),
}

/// Errors from the upstream generation service.
///
/// Every variant ends a relay session with a single downstream `error`
/// message; the `Display` text is what the peer sees.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("Upstream configuration error: {0}")]
    Configuration(String),

    #[error("Upstream request failed with status {status}: {body}")]
    Request { status: u16, body: String },

    #[error("Upstream connection failed: {0}")]
    Connection(String),

    #[error("Upstream stream error: {0}")]
    Stream(String),

    #[error("Upstream read timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Upstream frame exceeded buffer limit of {limit} bytes")]
    BufferOverflow { limit: usize },
}

/// A frame payload that is not valid structured data.
#[derive(Error, Debug)]
pub enum FrameDecodeError {
    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors while delivering a message to the downstream peer.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Peer connection closed")]
    Closed,

    #[error("Write error: {0}")]
    Write(String),

    #[error("Write timeout")]
    Timeout,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_error_embeds_status_and_body() {
        let err = UpstreamError::Request {
            status: 429,
            body: "rate limited".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("429"));
        assert!(msg.contains("rate limited"));
    }

    #[test]
    fn test_timeout_display() {
        let err = UpstreamError::Timeout(Duration::from_secs(15));
        assert_eq!(err.to_string(), "Upstream read timed out after 15s");
    }
}

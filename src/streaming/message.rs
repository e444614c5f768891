//! Downstream message formatting.

use serde::{Deserialize, Serialize};

use crate::error::SinkError;
use crate::relay::Event;

/// One message sent to the browser per relayed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DownstreamMessage {
    /// Incremental text: `{"type":"chunk","data":"..."}`.
    Chunk { data: String },
    /// Completion: `{"type":"done"}`.
    Done,
    /// Failure: `{"type":"error","message":"..."}`.
    Error { message: String },
}

impl DownstreamMessage {
    pub fn chunk(data: impl Into<String>) -> Self {
        Self::Chunk { data: data.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::Done => "done",
            Self::Error { .. } => "error",
        }
    }

    /// Serialize to the JSON text frame sent over the socket.
    pub fn to_json(&self) -> Result<String, SinkError> {
        serde_json::to_string(self).map_err(|e| SinkError::Serialization(e.to_string()))
    }
}

impl From<Event> for DownstreamMessage {
    fn from(event: Event) -> Self {
        match event {
            Event::Chunk(data) => Self::Chunk { data },
            Event::Done => Self::Done,
            Event::Error(message) => Self::Error { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_chunk() {
        let json = DownstreamMessage::chunk("Hi").to_json().unwrap();
        assert_eq!(json, r#"{"type":"chunk","data":"Hi"}"#);
    }

    #[test]
    fn test_format_done() {
        assert_eq!(DownstreamMessage::Done.to_json().unwrap(), r#"{"type":"done"}"#);
    }

    #[test]
    fn test_format_error_escapes_text() {
        let json = DownstreamMessage::error("bad \"quote\"\n").to_json().unwrap();
        assert_eq!(json, r#"{"type":"error","message":"bad \"quote\"\n"}"#);
    }

    #[test]
    fn test_from_event() {
        assert_eq!(
            DownstreamMessage::from(Event::Chunk("x".to_string())),
            DownstreamMessage::chunk("x")
        );
        assert_eq!(DownstreamMessage::from(Event::Done), DownstreamMessage::Done);
        assert_eq!(
            DownstreamMessage::from(Event::Error("e".to_string())).kind(),
            "error"
        );
    }

    #[test]
    fn test_parse_back() {
        let msg: DownstreamMessage = serde_json::from_str(r#"{"type":"done"}"#).unwrap();
        assert_eq!(msg, DownstreamMessage::Done);
    }
}

//! Frame payload classification.

use serde::Deserialize;
use serde_json::Value;

use super::frame::Frame;
use crate::error::FrameDecodeError;

/// Payload marking the end of the upstream stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Message used when an explicit error frame cannot be decoded.
pub const UNPARSEABLE_ERROR_MESSAGE: &str = "failed to parse upstream error payload";

/// Message used when an error payload carries no message of its own.
pub const DEFAULT_ERROR_MESSAGE: &str = "upstream reported an error";

/// A classified upstream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Incremental text.
    Chunk(String),
    /// Upstream finished successfully.
    Done,
    /// Upstream failed.
    Error(String),
}

impl Event {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Event::Chunk(_))
    }
}

/// Handling of ordinary frames whose payload does not decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeFailurePolicy {
    /// Log and drop the frame.
    #[default]
    Skip,
    /// End the session with an error event.
    Terminate,
}

/// Outcome of classifying one frame, before policy is applied.
#[derive(Debug)]
pub enum Classified {
    Event(Event),
    Ignored,
    Undecodable(FrameDecodeError),
}

/// Turns frames into relay events.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventClassifier {
    policy: DecodeFailurePolicy,
}

impl EventClassifier {
    pub fn new(policy: DecodeFailurePolicy) -> Self {
        Self { policy }
    }

    /// Classify a frame, applying the decode-failure policy.
    pub fn classify(&self, frame: &Frame) -> Option<Event> {
        match self.inspect(frame) {
            Classified::Event(event) => Some(event),
            Classified::Ignored => None,
            Classified::Undecodable(err) => match self.policy {
                DecodeFailurePolicy::Skip => {
                    tracing::warn!(error = %err, "Skipping undecodable upstream frame");
                    crate::metrics::record_frame_skipped();
                    None
                }
                DecodeFailurePolicy::Terminate => Some(Event::Error(format!(
                    "failed to parse upstream payload: {}",
                    err
                ))),
            },
        }
    }

    /// Classify a frame without applying policy.
    ///
    /// Decode failures on explicit error frames are already resolved to an
    /// `Error` event here; only ordinary frames come back `Undecodable`.
    pub fn inspect(&self, frame: &Frame) -> Classified {
        let payload = frame.payload();

        if payload == DONE_SENTINEL {
            return Classified::Event(Event::Done);
        }

        let value = match decode(&payload) {
            Ok(value) => value,
            Err(_) if frame.is_error_event() => {
                return Classified::Event(Event::Error(UNPARSEABLE_ERROR_MESSAGE.to_string()));
            }
            Err(err) => return Classified::Undecodable(err),
        };

        if frame.is_error_event() {
            return Classified::Event(Event::Error(error_message(&value)));
        }

        match classify_value(&value) {
            Some(event) => Classified::Event(event),
            None => Classified::Ignored,
        }
    }
}

fn decode(payload: &str) -> Result<Value, FrameDecodeError> {
    Ok(serde_json::from_str(payload)?)
}

fn classify_value(value: &Value) -> Option<Event> {
    match value.get("type").and_then(Value::as_str) {
        Some("delta") | Some("response.output_text.delta") | Some("content_block_delta") => {
            delta_text(value.get("delta")?).map(Event::Chunk)
        }
        Some("error") | Some("response.error") | Some("response.failed") => {
            Some(Event::Error(error_message(value)))
        }
        Some(_) => None,
        None if value.get("error").is_some_and(|e| !e.is_null()) => {
            Some(Event::Error(error_message(value)))
        }
        None => {
            let delta = value.get("choices")?.get(0)?.get("delta")?;
            delta
                .get("content")
                .and_then(Value::as_str)
                .filter(|text| !text.is_empty())
                .map(|text| Event::Chunk(text.to_string()))
        }
    }
}

/// Delta text as a plain string or an object carrying `text`.
fn delta_text(delta: &Value) -> Option<String> {
    let text = match delta {
        Value::String(text) => text.as_str(),
        Value::Object(_) => delta.get("text")?.as_str()?,
        _ => return None,
    };
    (!text.is_empty()).then(|| text.to_string())
}

fn error_message(value: &Value) -> String {
    let candidates = [
        value.get("message"),
        value.get("error").and_then(|e| e.get("message")),
        value.get("error"),
        value
            .get("response")
            .and_then(|r| r.get("error"))
            .and_then(|e| e.get("message")),
    ];

    candidates
        .into_iter()
        .flatten()
        .find_map(Value::as_str)
        .filter(|msg| !msg.is_empty())
        .unwrap_or(DEFAULT_ERROR_MESSAGE)
        .to_string()
}

//! Mock source for demos and tests.
//!
//! Renders a canned response as SSE wire bytes and cuts it into small
//! fixed-size pieces, so the relay's reassembly is exercised on every run.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use std::time::Duration;

use super::traits::{CancelSignal, ChunkProducer, UpstreamRequest, UpstreamSource, VecChunkProducer};
use crate::error::UpstreamError;
use crate::server::html_escape;

/// Mock source that simulates an incremental generation service.
pub struct MockSource {
    /// Delay between fragments.
    fragment_delay: Duration,
    /// Size of each fragment in bytes.
    fragment_bytes: usize,
}

impl MockSource {
    /// Create a new mock source.
    pub fn new() -> Self {
        Self {
            fragment_delay: Duration::from_millis(40),
            fragment_bytes: 7,
        }
    }

    /// Create with custom pacing.
    pub fn with_pacing(fragment_delay: Duration, fragment_bytes: usize) -> Self {
        Self {
            fragment_delay,
            fragment_bytes: fragment_bytes.max(1),
        }
    }
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Render the SSE body the mock streams for `prompt`.
pub fn mock_wire_body(prompt: &str) -> String {
    let preview: String = prompt.chars().take(100).collect();
    let html = format!(
        "<h1>Hello from the relay</h1>\n\
         <p>This page is being assembled from a stream of incremental deltas.</p>\n\
         <p>You asked: <q>{}</q></p>\n\
         <p>Configure an HTTP upstream to replace this mock response.</p>",
        html_escape(&preview)
    );

    let mut body = String::from(": keep-alive\n\n");
    for piece in html.split_inclusive(' ') {
        let frame = json!({ "type": "delta", "delta": piece });
        body.push_str(&format!("data: {}\n\n", frame));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

#[async_trait]
impl UpstreamSource for MockSource {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn open(
        &self,
        request: UpstreamRequest,
        cancel: CancelSignal,
    ) -> Result<ChunkProducer, UpstreamError> {
        let body = Bytes::from(mock_wire_body(&request.prompt));

        let fragments: Vec<Bytes> = (0..body.len())
            .step_by(self.fragment_bytes)
            .map(|start| body.slice(start..(start + self.fragment_bytes).min(body.len())))
            .collect();

        tracing::debug!(
            request_id = %request.request_id,
            fragments = fragments.len(),
            "Mock stream opened"
        );

        let delay = (!self.fragment_delay.is_zero()).then_some(self.fragment_delay);
        Ok(Box::new(VecChunkProducer::new(fragments, delay, cancel)))
    }
}

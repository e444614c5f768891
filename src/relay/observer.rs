//! Observability hook for relay sessions.

use std::time::Duration;

use super::session::SessionState;
use crate::error::{SinkError, UpstreamError};
use crate::metrics;
use crate::streaming::DownstreamMessage;

/// Receives structured notifications from a relay session.
pub trait RelayObserver: Send + Sync {
    fn transition(&self, session_id: u64, from: SessionState, to: SessionState);

    fn upstream_opened(&self, session_id: u64, source: &'static str, elapsed: Duration);

    fn upstream_failed(&self, session_id: u64, source: &'static str, error: &UpstreamError);

    fn forwarded(&self, session_id: u64, message: &DownstreamMessage);

    fn send_skipped(&self, session_id: u64, message: &DownstreamMessage, reason: &SinkError);
}

/// Default observer: tracing events plus Prometheus series.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsObserver;

impl RelayObserver for MetricsObserver {
    fn transition(&self, session_id: u64, from: SessionState, to: SessionState) {
        tracing::debug!(session_id, from = from.as_str(), to = to.as_str(), "Session transition");
        if to.is_terminal() {
            metrics::record_session_outcome(to.as_str());
        }
    }

    fn upstream_opened(&self, session_id: u64, source: &'static str, elapsed: Duration) {
        tracing::debug!(
            session_id,
            source,
            elapsed_ms = elapsed.as_millis() as u64,
            "Upstream stream opened"
        );
        metrics::record_upstream_request(source);
        metrics::record_upstream_ttfb(source, elapsed);
    }

    fn upstream_failed(&self, session_id: u64, source: &'static str, error: &UpstreamError) {
        tracing::warn!(session_id, source, error = %error, "Upstream failed");
        metrics::record_upstream_error(source);
    }

    fn forwarded(&self, session_id: u64, message: &DownstreamMessage) {
        match message {
            DownstreamMessage::Chunk { data } => {
                tracing::trace!(session_id, len = data.len(), "Chunk forwarded");
                metrics::record_chunk_forwarded();
            }
            other => {
                tracing::debug!(session_id, kind = other.kind(), "Terminal message forwarded");
            }
        }
    }

    fn send_skipped(&self, session_id: u64, message: &DownstreamMessage, reason: &SinkError) {
        tracing::debug!(session_id, kind = message.kind(), reason = %reason, "Downstream send skipped");
        metrics::record_send_failure();
    }
}

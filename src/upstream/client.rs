//! Shared HTTP client builder for upstream streaming.
//!
//! Provides a configured reqwest Client for long-lived SSE responses.

use reqwest::Client;
use std::time::Duration;

use crate::config::UpstreamConfig;
use crate::error::UpstreamError;

/// Build an HTTP client configured for SSE streaming.
///
/// No overall request timeout is set: generation streams are long-lived and
/// a whole-request deadline would cut healthy responses short. Slow reads are
/// bounded per chunk by the source instead (`read_timeout_secs`).
pub fn build_streaming_client(config: &UpstreamConfig) -> Result<Client, UpstreamError> {
    let mut builder = Client::builder()
        .connect_timeout(config.connect_timeout())
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60));

    // Allow insecure TLS connections (for testing with self-signed certificates)
    if config.insecure_ssl {
        builder = builder.danger_accept_invalid_certs(true);
        tracing::warn!("TLS certificate verification disabled (insecure_ssl=true)");
    }

    tracing::debug!(
        connect_timeout_secs = config.connect_timeout_secs,
        pool_max_idle_per_host = config.pool_max_idle_per_host,
        "Upstream HTTP client configured"
    );

    builder
        .build()
        .map_err(|e| UpstreamError::Connection(e.to_string()))
}

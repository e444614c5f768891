//! Prometheus metrics for the relay.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

/// Global active sessions tracker.
static ACTIVE_SESSIONS: AtomicI64 = AtomicI64::new(0);
/// Global peak sessions tracker.
static PEAK_SESSIONS: AtomicI64 = AtomicI64::new(0);

/// Initialize metrics descriptions.
pub fn init_metrics() {
    // Connection metrics
    describe_gauge!(
        "relay_active_connections",
        "Number of currently open WebSocket connections"
    );
    describe_counter!(
        "relay_connections_total",
        "Total number of WebSocket connections accepted"
    );
    describe_counter!(
        "relay_connections_rejected_total",
        "Connections rejected due to capacity"
    );

    // Session metrics
    describe_gauge!("relay_active_sessions", "Relay sessions currently running");
    describe_gauge!(
        "relay_peak_sessions",
        "Peak number of concurrent relay sessions seen"
    );
    describe_counter!(
        "relay_sessions_total",
        "Finished relay sessions by terminal state"
    );
    describe_histogram!(
        "relay_session_duration_seconds",
        "Total duration per relay session"
    );

    // Downstream metrics
    describe_counter!("relay_chunks_forwarded_total", "Chunk messages delivered");
    describe_counter!("relay_bytes_sent_total", "Total payload bytes sent to clients");
    describe_counter!(
        "relay_send_failures_total",
        "Downstream sends skipped or failed"
    );

    // Upstream metrics
    describe_counter!("relay_upstream_requests_total", "Upstream streams opened");
    describe_counter!("relay_upstream_errors_total", "Upstream open failures");
    describe_histogram!(
        "relay_upstream_ttfb_seconds",
        "Time until the upstream stream was open"
    );
    describe_counter!(
        "relay_frames_skipped_total",
        "Upstream frames dropped as undecodable"
    );
}

/// Start the Prometheus metrics HTTP server.
pub async fn start_metrics_server(addr: SocketAddr) -> anyhow::Result<()> {
    // Session duration: 10ms to ~163s (exponential buckets base 0.01, factor 2, count 15)
    let duration_buckets: [f64; 15] = [
        0.01, 0.02, 0.04, 0.08, 0.16, 0.32, 0.64, 1.28, 2.56, 5.12, 10.24, 20.48, 40.96, 81.92,
        163.84,
    ];

    // Upstream TTFB: 1ms to ~16s (exponential buckets base 0.001, factor 2, count 15)
    let ttfb_buckets: [f64; 15] = [
        0.001, 0.002, 0.004, 0.008, 0.016, 0.032, 0.064, 0.128, 0.256, 0.512, 1.024, 2.048, 4.096,
        8.192, 16.384,
    ];

    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("relay_session_duration_seconds".to_string()),
            &duration_buckets,
        )?
        .set_buckets_for_metric(
            Matcher::Full("relay_upstream_ttfb_seconds".to_string()),
            &ttfb_buckets,
        )?;

    builder
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to start metrics server: {}", e))?;

    tracing::info!(%addr, "Metrics server started");
    Ok(())
}

/// Record connection accepted.
pub fn record_connection_accepted() {
    counter!("relay_connections_total").increment(1);
}

/// Record connection rejected due to capacity.
pub fn record_connection_rejected() {
    counter!("relay_connections_rejected_total").increment(1);
}

/// Update active connection gauge.
pub fn set_active_connections(count: u64) {
    gauge!("relay_active_connections").set(count as f64);
}

/// Record session start - increments active sessions and updates peak if necessary.
pub fn record_session_start() {
    let current = ACTIVE_SESSIONS.fetch_add(1, Ordering::Relaxed) + 1;
    gauge!("relay_active_sessions").set(current as f64);

    // Update peak if needed using CAS loop
    loop {
        let peak = PEAK_SESSIONS.load(Ordering::Relaxed);
        if current <= peak {
            break;
        }
        if PEAK_SESSIONS
            .compare_exchange_weak(peak, current, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            gauge!("relay_peak_sessions").set(current as f64);
            break;
        }
    }
}

/// Record session end - decrements active sessions.
pub fn record_session_end(duration: Duration) {
    let current = ACTIVE_SESSIONS.fetch_sub(1, Ordering::Relaxed) - 1;
    gauge!("relay_active_sessions").set(current as f64);
    histogram!("relay_session_duration_seconds").record(duration.as_secs_f64());
}

/// Record a session reaching a terminal state.
pub fn record_session_outcome(outcome: &'static str) {
    counter!("relay_sessions_total", "outcome" => outcome).increment(1);
}

/// Record chunk message delivered.
pub fn record_chunk_forwarded() {
    counter!("relay_chunks_forwarded_total").increment(1);
}

/// Record bytes sent to client.
pub fn record_bytes_sent(bytes: u64) {
    counter!("relay_bytes_sent_total").increment(bytes);
}

/// Record a downstream send that was skipped or failed.
pub fn record_send_failure() {
    counter!("relay_send_failures_total").increment(1);
}

/// Record an undecodable frame that was dropped.
pub fn record_frame_skipped() {
    counter!("relay_frames_skipped_total").increment(1);
}

/// Record upstream stream opened.
pub fn record_upstream_request(source: &'static str) {
    counter!("relay_upstream_requests_total", "source" => source).increment(1);
}

/// Record upstream open failure.
pub fn record_upstream_error(source: &'static str) {
    counter!("relay_upstream_errors_total", "source" => source).increment(1);
}

/// Record time until the upstream stream was open.
pub fn record_upstream_ttfb(source: &'static str, duration: Duration) {
    histogram!("relay_upstream_ttfb_seconds", "source" => source).record(duration.as_secs_f64());
}

/// Active sessions as tracked by this process.
pub fn active_sessions() -> i64 {
    ACTIVE_SESSIONS.load(Ordering::Relaxed)
}

/// Timer for measuring durations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

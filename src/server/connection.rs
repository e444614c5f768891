//! Connection handler running one relay session per WebSocket.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitStream;
use futures::{FutureExt, StreamExt};
use serde::Deserialize;
use tracing::Instrument;

use crate::config::{RelayConfig, ServerConfig, UpstreamConfig};
use crate::metrics::{self, Timer};
use crate::relay::{RelaySession, SessionOutcome};
use crate::shutdown::ConnectionGuard;
use crate::streaming::WsSink;
use crate::upstream::{UpstreamRequest, UpstreamSource};

/// Per-connection overrides taken from the `/ws` query string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayParams {
    pub prompt: Option<String>,
    pub model: Option<String>,
}

/// Connection handler shared by every WebSocket.
pub struct ConnectionHandler {
    server: ServerConfig,
    upstream: UpstreamConfig,
    relay: RelayConfig,
    source: Arc<dyn UpstreamSource>,
}

impl ConnectionHandler {
    pub fn new(
        server: ServerConfig,
        upstream: UpstreamConfig,
        relay: RelayConfig,
        source: Arc<dyn UpstreamSource>,
    ) -> Self {
        Self {
            server,
            upstream,
            relay,
            source,
        }
    }

    /// Handle an upgraded WebSocket until its session ends.
    pub async fn handle(&self, socket: WebSocket, guard: ConnectionGuard, params: RelayParams) {
        let conn_id = guard.id();
        let span = tracing::info_span!("relay", id = conn_id);

        async {
            let timer = Timer::new();
            metrics::record_session_start();

            // Wrap in panic catcher
            let result = AssertUnwindSafe(self.handle_inner(socket, &guard, params))
                .catch_unwind()
                .await;

            metrics::record_session_end(timer.elapsed());

            match result {
                Ok(outcome) => {
                    tracing::info!(
                        state = outcome.state.as_str(),
                        chunks = outcome.chunks_forwarded,
                        duration_ms = timer.elapsed().as_millis() as u64,
                        "Session finished"
                    );
                }
                Err(panic) => {
                    let panic_msg = if let Some(s) = panic.downcast_ref::<&str>() {
                        s.to_string()
                    } else if let Some(s) = panic.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "Unknown panic".to_string()
                    };
                    tracing::error!(panic = %panic_msg, "Connection handler panicked");
                }
            }
        }
        .instrument(span)
        .await
        // Active connections gauge is updated in ConnectionGuard::drop
    }

    async fn handle_inner(
        &self,
        socket: WebSocket,
        guard: &ConnectionGuard,
        params: RelayParams,
    ) -> SessionOutcome {
        let (sender, receiver) = socket.split();
        let sink = WsSink::new(sender, self.server.write_timeout());

        let session = RelaySession::new(guard.id(), self.source.clone(), sink, &self.relay);
        let disconnect = session.disconnect_handle();
        let request = self.build_request(guard.id(), params);

        tracing::debug!(
            source = self.source.name(),
            prompt_len = request.prompt.len(),
            "Starting relay session"
        );

        let watch_peer = async move {
            tokio::select! {
                _ = wait_for_peer_close(receiver) => {
                    tracing::debug!("Peer closed connection");
                }
                _ = guard.wait_for_shutdown() => {
                    tracing::info!("Shutdown signaled, closing session");
                }
            }
            disconnect.peer_closed();
        };

        let run = session.run(request);
        tokio::pin!(run);

        tokio::select! {
            outcome = &mut run => outcome,
            // The session observes the disconnect at its next suspension point
            _ = watch_peer => run.await,
        }
    }

    fn build_request(&self, conn_id: u64, params: RelayParams) -> UpstreamRequest {
        let prompt = params
            .prompt
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| self.upstream.prompt.clone());

        let mut request = UpstreamRequest::new(prompt, format!("relay-{}", conn_id));
        request.model = params.model.filter(|m| !m.is_empty());
        request.instructions = self.upstream.instructions.clone();
        request.max_tokens = self.upstream.max_tokens;
        request.temperature = self.upstream.temperature;
        request
    }
}

/// Resolves when the peer closes the socket or the read side errors.
async fn wait_for_peer_close(mut receiver: SplitStream<WebSocket>) {
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Close(_)) => return,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "WebSocket read error");
                return;
            }
        }
    }
}

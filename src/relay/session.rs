//! Per-connection relay state machine.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use super::classify::{Event, EventClassifier};
use super::events::EventStream;
use super::frame::FrameAssembler;
use super::observer::{MetricsObserver, RelayObserver};
use super::sink::DownstreamSink;
use crate::config::RelayConfig;
use crate::error::SinkError;
use crate::streaming::DownstreamMessage;
use crate::upstream::{CancelSignal, ChunkProducer, UpstreamRequest, UpstreamSource};

/// Lifecycle of a relay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Streaming,
    Completed,
    Errored,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Errored | SessionState::Aborted
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Streaming => "streaming",
            SessionState::Completed => "completed",
            SessionState::Errored => "errored",
            SessionState::Aborted => "aborted",
        }
    }
}

/// Transport-side handle used to report that the peer went away.
#[derive(Debug, Clone)]
pub struct DisconnectHandle {
    token: CancellationToken,
}

impl DisconnectHandle {
    /// Mark the peer as gone; the session aborts at its next suspension point.
    pub fn peer_closed(&self) {
        self.token.cancel();
    }
}

/// Summary returned when a session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    pub id: u64,
    pub state: SessionState,
    pub chunks_forwarded: u64,
}

/// Relays one upstream stream to one downstream peer.
pub struct RelaySession<S> {
    id: u64,
    token: CancellationToken,
    state: SessionState,
    sink: S,
    source: Arc<dyn UpstreamSource>,
    config: RelayConfig,
    observer: Arc<dyn RelayObserver>,
    chunks_forwarded: u64,
}

impl<S: DownstreamSink> RelaySession<S> {
    /// Create a session in the `Connecting` state.
    pub fn new(id: u64, source: Arc<dyn UpstreamSource>, sink: S, config: &RelayConfig) -> Self {
        Self {
            id,
            token: CancellationToken::new(),
            state: SessionState::Connecting,
            sink,
            source,
            config: config.clone(),
            observer: Arc::new(MetricsObserver),
            chunks_forwarded: 0,
        }
    }

    /// Replace the default observer.
    pub fn with_observer(mut self, observer: Arc<dyn RelayObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Handle for the transport's close notification.
    pub fn disconnect_handle(&self) -> DisconnectHandle {
        DisconnectHandle {
            token: self.token.clone(),
        }
    }

    /// Drive the session until a terminal state is reached.
    pub async fn run(mut self, request: UpstreamRequest) -> SessionOutcome {
        let cancel = CancelSignal::new(self.token.clone());

        if self.token.is_cancelled() {
            self.set_state(SessionState::Aborted);
            return self.outcome();
        }

        let source = self.source.clone();
        let started = Instant::now();
        let opened = tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            result = source.open(request, cancel.clone()) => Some(result),
        };

        let producer = match opened {
            None => {
                self.set_state(SessionState::Aborted);
                return self.outcome();
            }
            Some(Err(e)) => {
                self.observer.upstream_failed(self.id, source.name(), &e);
                self.finish(Event::Error(e.to_string())).await;
                None
            }
            Some(Ok(producer)) => {
                self.observer
                    .upstream_opened(self.id, source.name(), started.elapsed());
                Some(producer)
            }
        };

        if let Some(producer) = producer {
            self.set_state(SessionState::Streaming);
            self.stream(producer, cancel).await;
        }

        if !self.state.is_terminal() {
            self.set_state(SessionState::Aborted);
        }
        self.token.cancel();

        if self.state != SessionState::Aborted {
            self.sink.close().await;
        }

        self.outcome()
    }

    /// Pull events until a terminal one, end of stream, or cancellation.
    ///
    /// The upstream producer is dropped on return.
    async fn stream(&mut self, producer: ChunkProducer, cancel: CancelSignal) {
        let mut events = EventStream::new(
            producer,
            FrameAssembler::with_limit(self.config.buffer_limit()),
            EventClassifier::new(self.config.decode_failure),
            cancel,
        );

        loop {
            let event = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                event = events.next() => event,
            };

            match event {
                Some(Event::Chunk(text)) => self.forward(DownstreamMessage::chunk(text)).await,
                Some(terminal) => {
                    self.finish(terminal).await;
                    break;
                }
                None if self.token.is_cancelled() => break,
                // Upstream closed without a sentinel
                None => {
                    self.finish(Event::Done).await;
                    break;
                }
            }
        }
    }

    /// Forward a terminal event and settle the final state.
    async fn finish(&mut self, event: Event) {
        if self.token.is_cancelled() {
            self.set_state(SessionState::Aborted);
            return;
        }

        let state = match event {
            Event::Error(_) => SessionState::Errored,
            _ => SessionState::Completed,
        };

        self.forward(event.into()).await;
        self.set_state(state);
        self.token.cancel();
    }

    /// Single best-effort send; never after cancellation.
    async fn forward(&mut self, message: DownstreamMessage) {
        if self.token.is_cancelled() {
            return;
        }

        if !self.sink.is_open() {
            self.observer
                .send_skipped(self.id, &message, &SinkError::Closed);
            return;
        }

        match self.sink.send(&message).await {
            Ok(()) => {
                if matches!(message, DownstreamMessage::Chunk { .. }) {
                    self.chunks_forwarded += 1;
                }
                self.observer.forwarded(self.id, &message);
            }
            Err(e) => self.observer.send_skipped(self.id, &message, &e),
        }
    }

    fn set_state(&mut self, to: SessionState) {
        if self.state == to || self.state.is_terminal() {
            return;
        }
        let from = self.state;
        self.state = to;
        self.observer.transition(self.id, from, to);
    }

    fn outcome(&self) -> SessionOutcome {
        SessionOutcome {
            id: self.id,
            state: self.state,
            chunks_forwarded: self.chunks_forwarded,
        }
    }
}

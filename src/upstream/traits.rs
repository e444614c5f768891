//! Upstream source trait definitions.

use async_trait::async_trait;
use bytes::Bytes;
use std::pin::Pin;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::UpstreamError;

/// A service that produces an incremental byte stream for a request.
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    /// Get the source name for metrics/logging.
    fn name(&self) -> &'static str;

    /// Issue the upstream request and return its chunk producer.
    ///
    /// The producer must observe `cancel` before every read and end the
    /// sequence silently once it is set.
    async fn open(
        &self,
        request: UpstreamRequest,
        cancel: CancelSignal,
    ) -> Result<ChunkProducer, UpstreamError>;
}

/// Parameters for one upstream request.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    /// The prompt to generate from.
    pub prompt: String,
    /// Model to use (optional, uses source default).
    pub model: Option<String>,
    /// System instructions.
    pub instructions: Option<String>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// Temperature for generation.
    pub temperature: Option<f32>,
    /// Request ID for correlation.
    pub request_id: String,
}

impl UpstreamRequest {
    pub fn new(prompt: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: None,
            instructions: None,
            max_tokens: None,
            temperature: None,
            request_id: request_id.into(),
        }
    }
}

/// Read-only view of a session's cancellation token.
///
/// Sources can wait on it but never set it.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    token: CancellationToken,
}

impl CancelSignal {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// A signal that is never set.
    pub fn never() -> Self {
        Self::new(CancellationToken::new())
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the owning session has been cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

/// Stream of raw byte chunks from an upstream source.
pub type ChunkProducer = Box<dyn ChunkProducerTrait>;

/// Trait for chunk producers.
pub trait ChunkProducerTrait: Send {
    /// Get the next chunk, `None` at end of stream or after cancellation.
    #[allow(clippy::type_complexity)]
    fn next(
        &mut self,
    ) -> Pin<Box<dyn std::future::Future<Output = Option<Result<Bytes, UpstreamError>>> + Send + '_>>;
}

/// Vector-backed chunk producer for the mock source and tests.
pub struct VecChunkProducer {
    chunks: std::vec::IntoIter<Result<Bytes, UpstreamError>>,
    delay: Option<Duration>,
    cancel: CancelSignal,
}

impl VecChunkProducer {
    pub fn new(chunks: Vec<Bytes>, delay: Option<Duration>, cancel: CancelSignal) -> Self {
        Self::from_results(chunks.into_iter().map(Ok).collect(), delay, cancel)
    }

    /// Build a producer that can also yield read errors.
    pub fn from_results(
        chunks: Vec<Result<Bytes, UpstreamError>>,
        delay: Option<Duration>,
        cancel: CancelSignal,
    ) -> Self {
        Self {
            chunks: chunks.into_iter(),
            delay,
            cancel,
        }
    }
}

impl ChunkProducerTrait for VecChunkProducer {
    fn next(
        &mut self,
    ) -> Pin<Box<dyn std::future::Future<Output = Option<Result<Bytes, UpstreamError>>> + Send + '_>>
    {
        Box::pin(async move {
            if self.cancel.is_cancelled() {
                return None;
            }

            if let Some(d) = self.delay {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return None,
                    _ = tokio::time::sleep(d) => {}
                }
            }

            self.chunks.next()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_vec_producer_yields_in_order() {
        let mut producer = VecChunkProducer::new(
            vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cd")],
            None,
            CancelSignal::never(),
        );

        assert_eq!(producer.next().await.unwrap().unwrap(), "ab");
        assert_eq!(producer.next().await.unwrap().unwrap(), "cd");
        assert!(producer.next().await.is_none());
    }

    #[tokio::test]
    async fn test_vec_producer_stops_when_cancelled() {
        let token = CancellationToken::new();
        let mut producer = VecChunkProducer::new(
            vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cd")],
            Some(Duration::from_secs(3600)),
            CancelSignal::new(token.clone()),
        );

        let pending = tokio::spawn(async move { producer.next().await });
        tokio::task::yield_now().await;
        token.cancel();

        let result = pending.await.unwrap();
        assert!(result.is_none());
    }
}

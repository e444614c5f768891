//! Downstream peer abstraction.

use async_trait::async_trait;

use crate::error::SinkError;
use crate::streaming::DownstreamMessage;

/// The live connection to one client.
///
/// Close notification travels the other way: the transport calls
/// [`DisconnectHandle::peer_closed`](super::DisconnectHandle::peer_closed).
#[async_trait]
pub trait DownstreamSink: Send {
    /// Whether a send can still be attempted.
    fn is_open(&self) -> bool;

    /// Deliver one message as a single atomic send.
    async fn send(&mut self, message: &DownstreamMessage) -> Result<(), SinkError>;

    /// Close the connection after the last message.
    async fn close(&mut self) {}
}

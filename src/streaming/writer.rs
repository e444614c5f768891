//! WebSocket writer with timeout support.
//!
//! Each downstream message goes out as one text frame, flushed immediately.

use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;

use super::message::DownstreamMessage;
use crate::error::SinkError;
use crate::metrics;
use crate::relay::DownstreamSink;

/// Write half of a browser WebSocket with a per-send timeout.
pub struct WsSink {
    sender: SplitSink<WebSocket, Message>,
    write_timeout: Duration,
    open: bool,
}

impl WsSink {
    /// Create a new WebSocket sink.
    pub fn new(sender: SplitSink<WebSocket, Message>, write_timeout: Duration) -> Self {
        Self {
            sender,
            write_timeout,
            open: true,
        }
    }

    async fn send_with_timeout(&mut self, message: Message) -> Result<(), SinkError> {
        match tokio::time::timeout(self.write_timeout, self.sender.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.open = false;
                Err(SinkError::Write(e.to_string()))
            }
            Err(_) => {
                // A stalled peer is treated as gone
                self.open = false;
                Err(SinkError::Timeout)
            }
        }
    }
}

#[async_trait]
impl DownstreamSink for WsSink {
    fn is_open(&self) -> bool {
        self.open
    }

    async fn send(&mut self, message: &DownstreamMessage) -> Result<(), SinkError> {
        if !self.open {
            return Err(SinkError::Closed);
        }

        let json = message.to_json()?;
        let len = json.len() as u64;
        self.send_with_timeout(Message::Text(json.into())).await?;

        metrics::record_bytes_sent(len);
        Ok(())
    }

    async fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        // Shutdown with timeout to avoid hanging on slow/broken clients
        let close = async {
            let _ = self.sender.send(Message::Close(None)).await;
            let _ = self.sender.close().await;
        };
        if tokio::time::timeout(self.write_timeout, close).await.is_err() {
            tracing::debug!("WebSocket close timed out");
        }
    }
}

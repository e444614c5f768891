//! Downstream message format and the WebSocket writer.

mod message;
mod writer;

pub use message::DownstreamMessage;
pub use writer::WsSink;

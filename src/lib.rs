//! Streaming relay
//!
//! Serves a page whose content is generated live: each browser WebSocket gets
//! one relay session that opens an upstream event stream, reassembles and
//! classifies its frames, and forwards text chunks as they arrive.

pub mod config;
pub mod error;
pub mod metrics;
pub mod relay;
pub mod server;
pub mod shutdown;
pub mod streaming;
pub mod upstream;

pub use config::Config;
pub use error::{RelayError, Result};

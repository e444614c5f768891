//! Upstream sources producing incremental byte streams.

mod client;
mod http;
mod mock;
mod traits;

pub use client::build_streaming_client;
pub use http::{ApiFlavor, HttpSource};
pub use mock::{mock_wire_body, MockSource};
pub use traits::{
    CancelSignal, ChunkProducer, ChunkProducerTrait, UpstreamRequest, UpstreamSource,
    VecChunkProducer,
};

use std::sync::Arc;

use crate::config::UpstreamConfig;
use crate::error::UpstreamError;

/// Create a source from configuration.
pub fn create_source(config: &UpstreamConfig) -> Result<Arc<dyn UpstreamSource>, UpstreamError> {
    match config.provider.as_str() {
        "mock" => Ok(Arc::new(MockSource::with_pacing(
            config.mock_delay(),
            config.mock_fragment_bytes,
        ))),
        "http" => {
            let client = build_streaming_client(config)?;

            Ok(Arc::new(HttpSource::new(
                client,
                config.api_key().map(str::to_string),
                config.endpoint.clone(),
                config.api,
                config.model.clone(),
                config.read_timeout(),
            )))
        }
        other => Err(UpstreamError::Configuration(format!(
            "Unknown upstream provider: {}. Available: mock, http",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_source_by_provider() {
        let mut config = UpstreamConfig::default();
        assert_eq!(create_source(&config).unwrap().name(), "mock");

        config.provider = "http".to_string();
        assert_eq!(create_source(&config).unwrap().name(), "http");

        config.provider = "nope".to_string();
        assert!(create_source(&config).is_err());
    }
}

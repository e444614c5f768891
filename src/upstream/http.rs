//! HTTP streaming source.
//!
//! Posts a generation request to an OpenAI-compatible endpoint and exposes
//! the raw SSE response body as a chunk producer. Framing is left to the
//! relay's frame assembler.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;

use super::traits::{CancelSignal, ChunkProducer, ChunkProducerTrait, UpstreamRequest, UpstreamSource};
use crate::error::UpstreamError;

/// Request body dialect spoken by the upstream endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiFlavor {
    /// `{model, input, stream}` bodies (Responses-style APIs).
    #[default]
    Responses,
    /// `{model, messages, stream}` bodies (Chat Completions-style APIs).
    Chat,
}

/// HTTP upstream source.
pub struct HttpSource {
    client: Client,
    api_key: Option<String>,
    endpoint: String,
    api: ApiFlavor,
    default_model: String,
    read_timeout: Option<Duration>,
}

impl HttpSource {
    /// Create a new HTTP source.
    ///
    /// A missing `api_key` is accepted here and reported per request, so the
    /// peer sees a configuration error instead of the process refusing to start.
    pub fn new(
        client: Client,
        api_key: Option<String>,
        endpoint: String,
        api: ApiFlavor,
        default_model: String,
        read_timeout: Option<Duration>,
    ) -> Self {
        Self {
            client,
            api_key,
            endpoint,
            api,
            default_model,
            read_timeout,
        }
    }

    fn request_body(&self, request: UpstreamRequest) -> serde_json::Value {
        let model = request.model.unwrap_or_else(|| self.default_model.clone());

        let body = match self.api {
            ApiFlavor::Responses => serde_json::to_value(ResponsesRequest {
                model,
                input: request.prompt,
                instructions: request.instructions,
                max_output_tokens: request.max_tokens,
                temperature: request.temperature,
                stream: true,
            }),
            ApiFlavor::Chat => {
                let mut messages = Vec::new();
                if let Some(system) = request.instructions {
                    messages.push(ChatMessage {
                        role: "system".to_string(),
                        content: system,
                    });
                }
                messages.push(ChatMessage {
                    role: "user".to_string(),
                    content: request.prompt,
                });
                serde_json::to_value(ChatRequest {
                    model,
                    messages,
                    max_tokens: request.max_tokens,
                    temperature: request.temperature,
                    stream: true,
                })
            }
        };

        // Both request structs only hold strings and numbers
        body.unwrap_or_default()
    }
}

#[async_trait]
impl UpstreamSource for HttpSource {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn open(
        &self,
        request: UpstreamRequest,
        cancel: CancelSignal,
    ) -> Result<ChunkProducer, UpstreamError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                UpstreamError::Configuration(
                    "Upstream API key not configured. Set UPSTREAM_API_KEY or upstream.api_key"
                        .to_string(),
                )
            })?;

        let request_id = request.request_id.clone();
        let body = self.request_body(request);

        tracing::debug!(endpoint = %self.endpoint, request_id = %request_id, "Opening upstream stream");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .header(ACCEPT, "text/event-stream")
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| UpstreamError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<unreadable body: {}>", e));
            return Err(UpstreamError::Request {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        if response.content_length() == Some(0) {
            return Err(UpstreamError::Request {
                status: status.as_u16(),
                body: "response had no body".to_string(),
            });
        }

        Ok(Box::new(HttpChunkProducer {
            body: response.bytes_stream().boxed(),
            cancel,
            read_timeout: self.read_timeout,
        }))
    }
}

/// Chunk producer over a streaming response body.
struct HttpChunkProducer {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    cancel: CancelSignal,
    read_timeout: Option<Duration>,
}

impl HttpChunkProducer {
    async fn read(&mut self) -> Option<Result<Bytes, UpstreamError>> {
        let next = match self.read_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.body.next()).await {
                Ok(next) => next,
                Err(_) => return Some(Err(UpstreamError::Timeout(limit))),
            },
            None => self.body.next().await,
        };

        next.map(|result| result.map_err(|e| UpstreamError::Stream(e.to_string())))
    }
}

impl ChunkProducerTrait for HttpChunkProducer {
    fn next(
        &mut self,
    ) -> Pin<Box<dyn std::future::Future<Output = Option<Result<Bytes, UpstreamError>>> + Send + '_>>
    {
        Box::pin(async move {
            if self.cancel.is_cancelled() {
                return None;
            }

            let cancel = self.cancel.clone();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                chunk = self.read() => chunk,
            }
        })
    }
}

#[derive(Debug, Serialize)]
struct ResponsesRequest {
    model: String,
    input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

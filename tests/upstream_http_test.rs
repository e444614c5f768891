//! HTTP source tests against an in-process SSE server.

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use streaming_relay_rs::config::UpstreamConfig;
use streaming_relay_rs::error::UpstreamError;
use streaming_relay_rs::relay::{Event, EventClassifier, EventStream, FrameAssembler};
use streaming_relay_rs::upstream::{
    build_streaming_client, ApiFlavor, CancelSignal, ChunkProducer, ChunkProducerTrait, HttpSource,
    UpstreamRequest, UpstreamSource,
};

const API_KEY: &str = "test-key";

const SSE_BODY: &str = "event: response.created\ndata: {\"type\":\"response.created\"}\n\n\
                        event: response.output_text.delta\ndata: {\"type\":\"response.output_text.delta\",\"delta\":\"<p>Hi\"}\n\n\
                        event: response.output_text.delta\ndata: {\"type\":\"response.output_text.delta\",\"delta\":\" there</p>\"}\n\n\
                        event: response.completed\ndata: {\"type\":\"response.completed\"}\n\n";

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {}", API_KEY))
}

fn sse(body: Body) -> Response {
    Response::builder()
        .header("content-type", "text/event-stream")
        .body(body)
        .unwrap()
}

/// Streams the body in 5-byte pieces with small pauses.
async fn fragmented(headers: HeaderMap, Json(request): Json<Value>) -> Response {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "bad key").into_response();
    }
    if request["stream"] != Value::Bool(true) || request["input"].as_str().is_none() {
        return (StatusCode::BAD_REQUEST, "expected a streaming responses request").into_response();
    }

    let pieces: Vec<Bytes> = SSE_BODY
        .as_bytes()
        .chunks(5)
        .map(Bytes::copy_from_slice)
        .collect();
    let stream = futures::stream::iter(pieces).then(|piece| async move {
        tokio::time::sleep(Duration::from_millis(1)).await;
        Ok::<_, std::io::Error>(piece)
    });
    sse(Body::from_stream(stream))
}

async fn chat(Json(request): Json<Value>) -> Response {
    let content = request["messages"][0]["content"].as_str().unwrap_or("").to_string();
    let frame = serde_json::json!({ "choices": [{ "delta": { "content": content } }] });
    sse(Body::from(format!("data: {}\n\ndata: [DONE]\n\n", frame)))
}

async fn limited() -> Response {
    (StatusCode::TOO_MANY_REQUESTS, "rate limited").into_response()
}

async fn empty() -> Response {
    sse(Body::empty())
}

/// Sends one frame, then stalls forever.
async fn stall() -> Response {
    let first = Bytes::from_static(b"data: {\"type\":\"delta\",\"delta\":\"first\"}\n\n");
    let stream = futures::stream::once(async move { Ok::<_, std::io::Error>(first) })
        .chain(futures::stream::pending());
    sse(Body::from_stream(stream))
}

async fn spawn_upstream() -> SocketAddr {
    let app = Router::new()
        .route("/v1/responses", post(fragmented))
        .route("/v1/chat", post(chat))
        .route("/limited", post(limited))
        .route("/empty", post(empty))
        .route("/stall", post(stall));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn source(addr: SocketAddr, path: &str, api: ApiFlavor, read_timeout: Option<Duration>) -> HttpSource {
    let client = build_streaming_client(&UpstreamConfig::default()).unwrap();
    HttpSource::new(
        client,
        Some(API_KEY.to_string()),
        format!("http://{}{}", addr, path),
        api,
        "test-model".to_string(),
        read_timeout,
    )
}

async fn drain(producer: ChunkProducer) -> Vec<Event> {
    EventStream::new(
        producer,
        FrameAssembler::new(),
        EventClassifier::default(),
        CancelSignal::never(),
    )
    .into_stream()
    .collect()
    .await
}

async fn open_err(source: &HttpSource) -> UpstreamError {
    match source
        .open(UpstreamRequest::new("hello", "t-1"), CancelSignal::never())
        .await
    {
        Ok(_) => panic!("expected open to fail"),
        Err(e) => e,
    }
}

#[tokio::test]
async fn test_fragmented_responses_stream() {
    let addr = spawn_upstream().await;
    let source = source(addr, "/v1/responses", ApiFlavor::Responses, None);

    let producer = source
        .open(UpstreamRequest::new("hello", "t-1"), CancelSignal::never())
        .await
        .unwrap();
    let events = drain(producer).await;

    // The responses dialect ends without a sentinel
    assert_eq!(
        events,
        vec![
            Event::Chunk("<p>Hi".to_string()),
            Event::Chunk(" there</p>".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_chat_dialect() {
    let addr = spawn_upstream().await;
    let source = source(addr, "/v1/chat", ApiFlavor::Chat, None);

    let producer = source
        .open(UpstreamRequest::new("echo me", "t-2"), CancelSignal::never())
        .await
        .unwrap();

    assert_eq!(
        drain(producer).await,
        vec![Event::Chunk("echo me".to_string()), Event::Done]
    );
}

#[tokio::test]
async fn test_rejected_request_carries_status_and_body() {
    let addr = spawn_upstream().await;
    let err = open_err(&source(addr, "/limited", ApiFlavor::Responses, None)).await;

    assert_eq!(
        err,
        UpstreamError::Request {
            status: 429,
            body: "rate limited".to_string()
        }
    );
    assert!(err.to_string().contains("rate limited"));
}

#[tokio::test]
async fn test_wrong_credential_rejected() {
    let addr = spawn_upstream().await;
    let client = build_streaming_client(&UpstreamConfig::default()).unwrap();
    let source = HttpSource::new(
        client,
        Some("wrong".to_string()),
        format!("http://{}/v1/responses", addr),
        ApiFlavor::Responses,
        "test-model".to_string(),
        None,
    );

    assert!(matches!(
        open_err(&source).await,
        UpstreamError::Request { status: 401, .. }
    ));
}

#[tokio::test]
async fn test_empty_body_rejected() {
    let addr = spawn_upstream().await;
    let err = open_err(&source(addr, "/empty", ApiFlavor::Responses, None)).await;
    assert!(matches!(err, UpstreamError::Request { status: 200, .. }));
}

#[tokio::test]
async fn test_missing_credential_fails_before_request() {
    let client = build_streaming_client(&UpstreamConfig::default()).unwrap();
    // Nothing listens here; a request attempt would be a connection error
    let source = HttpSource::new(
        client,
        None,
        "http://127.0.0.1:9/v1/responses".to_string(),
        ApiFlavor::Responses,
        "test-model".to_string(),
        None,
    );

    assert!(matches!(
        open_err(&source).await,
        UpstreamError::Configuration(_)
    ));
}

#[tokio::test]
async fn test_blank_credential_fails_before_request() {
    for key in ["", "   "] {
        let client = build_streaming_client(&UpstreamConfig::default()).unwrap();
        let source = HttpSource::new(
            client,
            Some(key.to_string()),
            "http://127.0.0.1:9/v1/responses".to_string(),
            ApiFlavor::Responses,
            "test-model".to_string(),
            None,
        );

        assert!(
            matches!(open_err(&source).await, UpstreamError::Configuration(_)),
            "key {:?}",
            key
        );
    }
}

#[tokio::test]
async fn test_unreachable_upstream() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = open_err(&source(addr, "/v1/responses", ApiFlavor::Responses, None)).await;
    assert!(matches!(err, UpstreamError::Connection(_)));
}

#[tokio::test]
async fn test_read_timeout_ends_stream_with_error() {
    let addr = spawn_upstream().await;
    let source = source(
        addr,
        "/stall",
        ApiFlavor::Responses,
        Some(Duration::from_millis(200)),
    );

    let producer = source
        .open(UpstreamRequest::new("hello", "t-3"), CancelSignal::never())
        .await
        .unwrap();
    let events = drain(producer).await;

    assert_eq!(events.len(), 2);
    assert_eq!(events[0], Event::Chunk("first".to_string()));
    assert!(matches!(&events[1], Event::Error(msg) if msg.contains("timed out")));
}

#[tokio::test]
async fn test_cancel_stops_stalled_read() {
    let addr = spawn_upstream().await;
    let source = source(addr, "/stall", ApiFlavor::Responses, None);
    let token = CancellationToken::new();

    let mut producer = source
        .open(
            UpstreamRequest::new("hello", "t-4"),
            CancelSignal::new(token.clone()),
        )
        .await
        .unwrap();

    assert!(matches!(producer.next().await, Some(Ok(_))));

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let next = tokio::time::timeout(Duration::from_secs(5), producer.next())
        .await
        .expect("cancel should end the pending read");
    assert!(next.is_none());
    canceller.await.unwrap();
}

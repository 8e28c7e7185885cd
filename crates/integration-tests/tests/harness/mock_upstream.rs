//! Mock OpenAI-compatible upstream for integration tests
//!
//! Returns canned chat-completion responses, optionally streamed as SSE
//! chunks with fixed boundaries, and counts how often it is actually hit —
//! the single-flight and replay assertions hang off that counter.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing};
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// SSE chunks emitted for streaming requests, boundaries fixed
pub const STREAM_CHUNKS: &[&str] = &[
    "data: {\"delta\":\"He\"}\n\n",
    "data: {\"delta\":\"llo\"}\n\n",
    "data: [DONE]\n\n",
];

/// A running mock upstream instance
pub struct MockUpstream {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<MockState>,
}

struct MockState {
    completion_count: AtomicU32,
    request_count: AtomicU32,
    /// Status returned by the chat endpoint
    status: StatusCode,
}

impl MockUpstream {
    /// Start a mock upstream returning 200s
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with_status(StatusCode::OK).await
    }

    /// Start a mock upstream answering the chat endpoint with `status`
    pub async fn start_with_status(status: StatusCode) -> anyhow::Result<Self> {
        let state = Arc::new(MockState {
            completion_count: AtomicU32::new(0),
            request_count: AtomicU32::new(0),
            status,
        });

        let app = Router::new()
            .route("/v1/chat/completions", routing::post(handle_chat_completions))
            .route("/v1/models", routing::get(handle_models))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self { addr, shutdown, state })
    }

    /// Base URL for configuring the mock as the gate's upstream
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Number of chat completion requests that reached the mock
    pub fn completion_count(&self) -> u32 {
        self.state.completion_count.load(Ordering::Relaxed)
    }

    /// Total number of requests that reached the mock
    pub fn request_count(&self) -> u32 {
        self.state.request_count.load(Ordering::Relaxed)
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn handle_chat_completions(State(state): State<Arc<MockState>>, Json(request): Json<Value>) -> Response {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    state.completion_count.fetch_add(1, Ordering::Relaxed);

    if state.status != StatusCode::OK {
        return (
            state.status,
            Json(serde_json::json!({
                "error": {
                    "message": "mock upstream error",
                    "type": "server_error"
                }
            })),
        )
            .into_response();
    }

    if request.get("stream").and_then(Value::as_bool).unwrap_or(false) {
        return streaming_response();
    }

    let model = request.get("model").and_then(Value::as_str).unwrap_or("mock-model");
    Json(serde_json::json!({
        "id": "chatcmpl-mock-1",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "Hello from mock upstream"},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    }))
    .into_response()
}

/// Emit the fixed chunk sequence with pauses so each arrives as its own
/// transfer chunk
fn streaming_response() -> Response {
    let chunks = futures_util::stream::iter(STREAM_CHUNKS).then(|chunk| async move {
        tokio::time::sleep(Duration::from_millis(25)).await;
        Ok::<_, std::convert::Infallible>(Bytes::from_static(chunk.as_bytes()))
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(chunks))
        .expect("valid mock response")
}

async fn handle_models(State(state): State<Arc<MockState>>) -> Response {
    state.request_count.fetch_add(1, Ordering::Relaxed);

    Json(serde_json::json!({
        "object": "list",
        "data": [{
            "id": "mock-model-1",
            "object": "model",
            "created": 1_700_000_000,
            "owned_by": "mock"
        }]
    }))
    .into_response()
}

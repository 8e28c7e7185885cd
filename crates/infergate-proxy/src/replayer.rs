//! Response materialization
//!
//! Turns stored entries (and live upstream tees) back into HTTP responses.
//! Streaming entries replay chunk-by-chunk in recorded order, as fast as the
//! client drains — replayed tests should not inherit recording latency.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use http::StatusCode;
use infergate_store::{CacheStore, Entry, ResponsePayload};
use tokio::sync::mpsc;

/// Headers never replayed verbatim; `content-length` is recomputed from the
/// actual body
const SKIP_REPLAY_HEADERS: &[&str] = &["content-length"];

/// Materialize a stored entry into a response
///
/// Streaming chunks are read lazily from the store; if the client
/// disconnects mid-replay the stream is simply dropped and the entry is
/// unaffected.
pub(crate) fn replay(store: &Arc<CacheStore>, entry: &Entry) -> Response {
    match &entry.payload {
        ResponsePayload::Buffered(body) => buffered_response(
            entry.meta.response.status,
            &entry.meta.response.headers,
            body.clone(),
        ),
        ResponsePayload::Streamed { chunk_count } => {
            let chunks = store
                .chunk_stream(&entry.id, *chunk_count)
                .map(|item| item.map_err(axum::BoxError::from));
            stream_response(
                entry.meta.response.status,
                &entry.meta.response.headers,
                Body::from_stream(chunks),
            )
        }
    }
}

/// Response for a streaming forward in progress: chunks arrive from the
/// recording tee as the upstream delivers them
pub(crate) fn live_stream_response(
    status: u16,
    headers: &BTreeMap<String, String>,
    chunks: mpsc::Receiver<Bytes>,
) -> Response {
    let stream = futures_util::stream::unfold(chunks, |mut rx| async move {
        rx.recv()
            .await
            .map(|chunk| (Ok::<_, std::convert::Infallible>(chunk), rx))
    });
    stream_response(status, headers, Body::from_stream(stream))
}

fn buffered_response(status: u16, headers: &BTreeMap<String, String>, body: Bytes) -> Response {
    let mut builder = http::Response::builder().status(status_code(status));
    for (name, value) in headers {
        if SKIP_REPLAY_HEADERS.contains(&name.as_str()) {
            continue;
        }
        builder = builder.header(name, value);
    }
    builder.body(Body::from(body)).unwrap_or_else(assembly_error)
}

fn stream_response(status: u16, headers: &BTreeMap<String, String>, body: Body) -> Response {
    // The SSE contract is asserted even when the stored headers lack it
    let mut merged = headers.clone();
    merged.retain(|name, _| !SKIP_REPLAY_HEADERS.contains(&name.as_str()));
    merged
        .entry("content-type".to_owned())
        .or_insert_with(|| "text/event-stream".to_owned());
    merged
        .entry("cache-control".to_owned())
        .or_insert_with(|| "no-cache".to_owned());
    merged
        .entry("connection".to_owned())
        .or_insert_with(|| "keep-alive".to_owned());

    let mut builder = http::Response::builder().status(status_code(status));
    for (name, value) in &merged {
        builder = builder.header(name, value);
    }
    builder.body(body).unwrap_or_else(assembly_error)
}

fn status_code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn assembly_error(error: http::Error) -> Response {
    tracing::error!(error = %error, "failed to assemble replay response");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

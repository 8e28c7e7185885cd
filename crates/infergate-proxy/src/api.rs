//! Read-only introspection API
//!
//! JSON endpoints over the store for the dashboard and tooling: entry
//! listing, entry detail, aggregate statistics, and the running
//! configuration.

use axum::Json;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use infergate_store::{Entry, ResponsePayload, StoreError};
use serde_json::Value;

use crate::server::AppState;

/// Handle `GET /api/cache`
pub(crate) async fn cache_list_handler(State(state): State<AppState>) -> Response {
    match state.router.store().list().await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => store_error_response(&e),
    }
}

/// Handle `GET /api/cache/{id}`
pub(crate) async fn cache_detail_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let store = state.router.store();

    let entry = match store.get(&id).await {
        Ok(Some(entry)) => entry,
        Ok(None) => return entry_not_found_response(),
        Err(e @ StoreError::CorruptEntry { .. }) => {
            tracing::warn!(id, error = %e, "corrupt entry treated as missing");
            return entry_not_found_response();
        }
        Err(e) => return store_error_response(&e),
    };

    let (body, chunks) = match &entry.payload {
        ResponsePayload::Buffered(bytes) => (render_body(bytes), Value::Null),
        ResponsePayload::Streamed { .. } => match store.load_chunks(&id).await {
            Ok(chunks) => {
                let rendered: Vec<Value> = chunks
                    .iter()
                    .map(|chunk| Value::String(String::from_utf8_lossy(chunk).into_owned()))
                    .collect();
                (Value::Null, Value::Array(rendered))
            }
            Err(e) => return store_error_response(&e),
        },
    };

    Json(entry_detail(&entry, body, chunks)).into_response()
}

/// Handle `GET /api/stats`
pub(crate) async fn stats_handler(State(state): State<AppState>) -> Response {
    match state.router.store().stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => store_error_response(&e),
    }
}

/// Handle `GET /api/config`
pub(crate) async fn config_handler(State(state): State<AppState>) -> Response {
    let info = &state.info;
    Json(serde_json::json!({
        "mode": info.mode,
        "upstream_url": info.upstream_url,
        "host": info.host,
        "port": info.port,
        "cache_dir": info.cache_dir,
    }))
    .into_response()
}

fn entry_detail(entry: &Entry, response_body: Value, chunks: Value) -> Value {
    serde_json::json!({
        "id": entry.id,
        "model": entry.meta.metadata.model,
        "temperature": entry.meta.metadata.temperature,
        "prompt_hash": entry.meta.metadata.prompt_hash,
        "request": {
            "method": entry.meta.request.method,
            "path": entry.meta.request.path,
            "query": entry.meta.request.query,
            "headers": entry.meta.request.headers,
            "body": render_body(&entry.request_body),
        },
        "response": {
            "status_code": entry.meta.response.status,
            "headers": entry.meta.response.headers,
            "is_streaming": entry.meta.response.is_streaming,
            "body": response_body,
            "chunks": chunks,
        },
    })
}

/// Decode a recorded body for display: JSON when it parses, string otherwise
fn render_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

fn entry_not_found_response() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "entry not found" })),
    )
        .into_response()
}

fn store_error_response(error: &StoreError) -> Response {
    tracing::error!(error = %error, "introspection query failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": error.to_string() })),
    )
        .into_response()
}

//! Per-request routing state machine
//!
//! fingerprint → per-id lock → store lookup → replay hit, replay-only miss,
//! or forward-and-record. The lock is held across the whole
//! get/forward/record span, so concurrent requests with the same fingerprint
//! cause exactly one upstream call and every waiter observes the freshly
//! recorded entry.

use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use infergate_core::HttpError;
use infergate_store::{
    CacheStore, EntryMetadata, Fingerprint, RequestRecord, StoreError, fingerprint,
};
use tokio::sync::oneshot;

use crate::error::GateError;
use crate::mode::Mode;
use crate::recorder::{ForwardOutcome, Recorder};
use crate::replayer;
use crate::request::ProxyRequest;
use crate::upstream::Upstream;

/// Routes incoming requests to the store or the upstream API
///
/// Stateless across requests aside from the shared store. All methods are
/// fingerprinted and cached alike; upstream health endpoints and model-list
/// queries benefit from replay too.
pub struct GateRouter {
    mode: Mode,
    store: Arc<CacheStore>,
    upstream: Option<Arc<dyn Upstream>>,
}

impl GateRouter {
    /// Create a router
    ///
    /// # Errors
    ///
    /// Returns an error when record-and-replay mode is requested without an
    /// upstream client
    pub fn new(mode: Mode, store: Arc<CacheStore>, upstream: Option<Arc<dyn Upstream>>) -> anyhow::Result<Self> {
        if mode == Mode::RecordAndReplay && upstream.is_none() {
            anyhow::bail!("an upstream client is required in record-and-replay mode");
        }
        Ok(Self { mode, store, upstream })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Handle one request end to end
    pub async fn handle(&self, request: ProxyRequest) -> Response {
        let start = Instant::now();
        let canonical = request.canonicalize();
        let fp = fingerprint(&canonical);

        let guard = self.store.lock(&fp.id).await;

        let cached = match self.store.get(&fp.id).await {
            Ok(entry) => entry,
            Err(e @ StoreError::CorruptEntry { .. }) => {
                tracing::warn!(id = %fp.id, error = %e, "corrupt entry treated as cache miss");
                None
            }
            Err(e) => {
                drop(guard);
                let error = GateError::Store(e);
                log_request(&fp, "storage_error", error.status_code().as_u16(), start);
                return error_response(&error);
            }
        };

        if let Some(entry) = cached {
            drop(guard);
            log_request(&fp, "hit", entry.meta.response.status, start);
            return replayer::replay(&self.store, &entry);
        }

        if self.mode == Mode::ReplayOnly {
            drop(guard);
            log_request(&fp, "miss", 404, start);
            return cache_miss_response(&fp.id);
        }

        let request_record = RequestRecord {
            method: canonical.method,
            path: canonical.path,
            query: canonical.query,
            headers: canonical.headers,
        };
        self.forward_and_record(request, request_record, fp, guard, start).await
    }

    /// Forward upstream, record the response, and replay it to the client
    ///
    /// The whole span runs on a detached task holding the per-id lock guard:
    /// a client disconnect cancels the handler future but never the upstream
    /// drain or the recording, and the guard releases when the task finishes
    /// regardless of how it exits.
    async fn forward_and_record(
        &self,
        request: ProxyRequest,
        request_record: RequestRecord,
        fp: Fingerprint,
        guard: tokio::sync::OwnedMutexGuard<()>,
        start: Instant,
    ) -> Response {
        let Some(upstream) = self.upstream.clone() else {
            let error = GateError::Internal(anyhow::anyhow!("no upstream configured"));
            log_request(&fp, "upstream_error", error.status_code().as_u16(), start);
            return error_response(&error);
        };

        let metadata = EntryMetadata {
            model: fp.model.clone(),
            temperature: fp.temperature,
            prompt_hash: fp.prompt_hash.clone(),
        };
        let recorder = Recorder::new(Arc::clone(&self.store));
        let id = fp.id.clone();
        let request_body = request.body.clone();

        let (outcome_tx, outcome_rx) = oneshot::channel();
        tokio::spawn(async move {
            let _guard = guard;
            match upstream.forward(&request).await {
                Ok(response) => {
                    recorder
                        .record(id, request_record, metadata, request_body, response, outcome_tx)
                        .await;
                }
                Err(e) => {
                    let _ = outcome_tx.send(ForwardOutcome::TransportFailed(e));
                }
            }
        });

        match outcome_rx.await {
            Ok(ForwardOutcome::TransportFailed(e)) => {
                tracing::error!(id = %fp.id, error = %e, "upstream unreachable");
                log_request(&fp, "upstream_error", 502, start);
                upstream_unreachable_response()
            }
            Ok(ForwardOutcome::Buffered(Ok(entry))) => {
                log_request(&fp, "record", entry.meta.response.status, start);
                replayer::replay(&self.store, &entry)
            }
            Ok(ForwardOutcome::Buffered(Err(e))) => {
                let error = GateError::Store(e);
                log_request(&fp, "storage_error", error.status_code().as_u16(), start);
                error_response(&error)
            }
            Ok(ForwardOutcome::Streaming { status, headers, chunks }) => {
                log_request(&fp, "record", status, start);
                replayer::live_stream_response(status, &headers, chunks)
            }
            Err(_) => {
                let error = GateError::Internal(anyhow::anyhow!("forward task aborted"));
                log_request(&fp, "upstream_error", error.status_code().as_u16(), start);
                error_response(&error)
            }
        }
    }
}

/// The one required observability contract: a structured record per request
fn log_request(fp: &Fingerprint, outcome: &str, status: u16, start: Instant) {
    tracing::info!(
        id = %fp.id,
        outcome,
        status,
        duration_ms = start.elapsed().as_millis() as u64,
        model = fp.model.as_deref().unwrap_or("-"),
        "handled request"
    );
}

/// Fixed-shape replay-only miss response; test suites detect this contract
fn cache_miss_response(id: &str) -> Response {
    let error = GateError::CacheMiss { id: id.to_owned() };
    let body = serde_json::json!({
        "error": error.error_type(),
        "id": id,
        "message": "No cached entry for this request; replay-only mode.",
    });
    (error.status_code(), Json(body)).into_response()
}

fn upstream_unreachable_response() -> Response {
    let body = serde_json::json!({ "error": "upstream_unreachable" });
    (StatusCode::BAD_GATEWAY, Json(body)).into_response()
}

fn error_response(error: &GateError) -> Response {
    let body = serde_json::json!({
        "error": error.error_type(),
        "message": error.client_message(),
    });
    (error.status_code(), Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_replay_requires_upstream() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CacheStore::open(dir.path()).unwrap());

        assert!(GateRouter::new(Mode::RecordAndReplay, Arc::clone(&store), None).is_err());
        assert!(GateRouter::new(Mode::ReplayOnly, store, None).is_ok());
    }

    #[tokio::test]
    async fn replay_only_miss_has_frozen_shape() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CacheStore::open(dir.path()).unwrap());
        let router = GateRouter::new(Mode::ReplayOnly, store, None).unwrap();

        let request = ProxyRequest {
            method: "POST".to_owned(),
            path: "/v1/chat/completions".to_owned(),
            query: Vec::new(),
            headers: vec![("content-type".to_owned(), "application/json".to_owned())],
            body: bytes::Bytes::from_static(br#"{"model":"gpt-4","messages":[]}"#),
        };

        let response = router.handle(request).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers().get("content-type").unwrap(), "application/json");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "cache_miss");
        assert_eq!(
            json["message"],
            "No cached entry for this request; replay-only mode."
        );
        assert!(json["id"].as_str().is_some_and(|id| id.len() == 64));
    }
}

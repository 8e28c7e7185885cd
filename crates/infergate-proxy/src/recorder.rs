//! Inverse recording pipeline
//!
//! Consumes an upstream response to completion and persists it as a store
//! entry. Streaming responses are teed: every chunk is forwarded to the
//! client as it arrives while the full sequence is collected for the
//! recording. Chunk boundaries are preserved exactly as the upstream
//! delivered them; the recorder never re-chunks into SSE events.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use infergate_store::{
    CacheStore, Entry, EntryBody, EntryMeta, EntryMetadata, NewEntry, RequestRecord, ResponsePayload, ResponseRecord,
    StoreError,
};
use tokio::sync::{mpsc, oneshot};

use crate::upstream::{UpstreamBody, UpstreamError, UpstreamResponse};

/// Capacity of the client-facing chunk channel during a streaming tee
const TEE_CHANNEL_CAPACITY: usize = 16;

/// Client-facing outcome of a forward-and-record pass
pub(crate) enum ForwardOutcome {
    /// No status line was received; nothing to record
    TransportFailed(UpstreamError),
    /// Non-streaming response, recorded (or failed to record) and ready to replay
    Buffered(Result<Entry, StoreError>),
    /// Streaming response being teed; chunks arrive on the receiver as the
    /// upstream delivers them
    Streaming {
        status: u16,
        headers: BTreeMap<String, String>,
        chunks: mpsc::Receiver<Bytes>,
    },
}

/// Persists upstream responses via the store
pub(crate) struct Recorder {
    store: Arc<CacheStore>,
}

impl Recorder {
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self { store }
    }

    /// Consume the upstream response to completion and persist it
    ///
    /// The client-facing [`ForwardOutcome`] is sent on `outcome_tx` as soon
    /// as it is known; for streaming responses that is before the upstream
    /// stream has drained. The caller is expected to run this on a detached
    /// task: a client disconnect must not abort an in-flight recording, and
    /// send failures after a disconnect are ignored while the drain
    /// continues.
    ///
    /// Non-2xx statuses are recorded like any other response. A stream that
    /// terminates abnormally discards the partial recording; the client sees
    /// the same partial stream the upstream produced.
    pub async fn record(
        &self,
        id: String,
        request: RequestRecord,
        metadata: EntryMetadata,
        request_body: Bytes,
        response: UpstreamResponse,
        outcome_tx: oneshot::Sender<ForwardOutcome>,
    ) {
        let status = response.status;
        let headers = response.headers;

        match response.body {
            UpstreamBody::Buffered(body) => {
                let meta = EntryMeta {
                    request,
                    response: ResponseRecord {
                        status,
                        headers,
                        is_streaming: false,
                    },
                    metadata,
                };

                let recorded = self
                    .store
                    .put(NewEntry {
                        id: id.clone(),
                        meta: meta.clone(),
                        request_body: request_body.clone(),
                        body: EntryBody::Buffered(body.clone()),
                    })
                    .await
                    .map(|()| Entry {
                        id,
                        meta,
                        request_body,
                        payload: ResponsePayload::Buffered(body),
                    });

                let _ = outcome_tx.send(ForwardOutcome::Buffered(recorded));
            }
            UpstreamBody::Stream(mut stream) => {
                let (chunk_tx, chunk_rx) = mpsc::channel(TEE_CHANNEL_CAPACITY);
                let _ = outcome_tx.send(ForwardOutcome::Streaming {
                    status,
                    headers: headers.clone(),
                    chunks: chunk_rx,
                });

                let mut collected: Vec<Bytes> = Vec::new();
                let mut clean = true;
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(chunk) => {
                            collected.push(chunk.clone());
                            let _ = chunk_tx.send(chunk).await;
                        }
                        Err(e) => {
                            tracing::warn!(id = %id, error = %e, "upstream stream ended abnormally; discarding partial recording");
                            clean = false;
                            break;
                        }
                    }
                }
                drop(chunk_tx);

                if !clean {
                    return;
                }

                let meta = EntryMeta {
                    request,
                    response: ResponseRecord {
                        status,
                        headers,
                        is_streaming: true,
                    },
                    metadata,
                };

                if let Err(e) = self
                    .store
                    .put(NewEntry {
                        id: id.clone(),
                        meta,
                        request_body,
                        body: EntryBody::Chunks(collected),
                    })
                    .await
                {
                    tracing::error!(id = %id, error = %e, "failed to record streaming response");
                }
            }
        }
    }
}

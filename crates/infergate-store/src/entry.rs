//! Data model for recorded entries

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Metadata derived from the request body
///
/// Regenerable from the recorded request; never authoritative.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// `model` field of the request body, when present
    pub model: Option<String>,
    /// `temperature` field of the request body, when present
    pub temperature: Option<f64>,
    /// Digest over just the prompt (`messages` / `input`), for introspection
    pub prompt_hash: Option<String>,
}

/// Recorded request envelope (the body lives in `request.bin`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    /// HTTP method, uppercase
    pub method: String,
    /// Normalized URL path
    pub path: String,
    /// Query parameters, name-sorted, insertion order kept within a name
    #[serde(default)]
    pub query: Vec<(String, String)>,
    /// Fingerprint-relevant headers only, lowercased
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Recorded response envelope (the body lives in side files)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRecord {
    /// Upstream status code
    pub status: u16,
    /// Response headers, lowercased
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// True iff the upstream response was an SSE stream
    pub is_streaming: bool,
}

/// Contents of an entry's `meta.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMeta {
    pub request: RequestRecord,
    pub response: ResponseRecord,
    #[serde(default)]
    pub metadata: EntryMetadata,
}

/// Response payload of a materialized entry
///
/// Streamed chunk bytes stay on disk and are loaded on demand via
/// [`crate::CacheStore::chunk_stream`] or [`crate::CacheStore::load_chunks`].
#[derive(Debug, Clone)]
pub enum ResponsePayload {
    /// Full body of a non-streaming response
    Buffered(Bytes),
    /// Number of recorded chunks of a streaming response
    Streamed { chunk_count: usize },
}

/// A fully materialized entry, as returned by [`crate::CacheStore::get`]
#[derive(Debug, Clone)]
pub struct Entry {
    /// Fingerprint digest; also the storage key
    pub id: String,
    pub meta: EntryMeta,
    /// Raw request body bytes
    pub request_body: Bytes,
    pub payload: ResponsePayload,
}

/// Response body handed to [`crate::CacheStore::put`]
#[derive(Debug, Clone)]
pub enum EntryBody {
    /// Buffered body of a non-streaming response
    Buffered(Bytes),
    /// Ordered chunk sequence of a streaming response, boundaries preserved
    Chunks(Vec<Bytes>),
}

/// A new entry to persist
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub id: String,
    pub meta: EntryMeta,
    pub request_body: Bytes,
    pub body: EntryBody,
}

/// Summary yielded by [`crate::CacheStore::list`]
#[derive(Debug, Clone, Serialize)]
pub struct EntrySummary {
    pub id: String,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub is_streaming: bool,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub prompt_hash: Option<String>,
}

/// Aggregate store statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub total_entries: usize,
    pub total_size_bytes: u64,
    pub streaming_responses: usize,
    pub entries_by_model: BTreeMap<String, usize>,
}

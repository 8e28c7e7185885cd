//! Content-addressed recording store for InferenceGate
//!
//! Derives a stable fingerprint from a normalized view of each incoming
//! request and persists recorded upstream responses under that fingerprint,
//! with atomic publication and a per-fingerprint locking primitive for
//! single-flight recording.

mod entry;
mod error;
mod fingerprint;
mod store;

pub use entry::{
    Entry, EntryBody, EntryMeta, EntryMetadata, EntrySummary, NewEntry, RequestRecord, ResponseRecord,
    ResponsePayload, StoreStats,
};
pub use error::StoreError;
pub use fingerprint::{CanonicalBody, CanonicalRequest, Fingerprint, canonical_json, fingerprint};
pub use store::CacheStore;

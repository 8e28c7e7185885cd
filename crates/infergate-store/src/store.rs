//! On-disk content-addressed store
//!
//! Each entry lives under `{root}/{id[0:2]}/{id}/` with `meta.json`, the raw
//! request body, and either a buffered response body or a numbered chunk
//! sequence. Publication is atomic: `put` assembles the entry in a sibling
//! `{id}.tmp/` directory, fsyncs every file, then renames the directory into
//! place, so readers never observe a partial entry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::entry::{
    Entry, EntryBody, EntryMeta, EntrySummary, NewEntry, ResponsePayload, StoreStats,
};
use crate::error::StoreError;

const META_FILE: &str = "meta.json";
const REQUEST_FILE: &str = "request.bin";
const RESPONSE_FILE: &str = "response.bin";
const CHUNKS_DIR: &str = "chunks";
const CHUNK_INDEX_FILE: &str = "index";
const TMP_SUFFIX: &str = ".tmp";

/// Registry size above which uncontended per-id locks are swept
const LOCK_SWEEP_THRESHOLD: usize = 128;

/// Content-addressed repository of recorded entries
///
/// Shared by all in-flight requests; cheap to clone behind an `Arc`.
pub struct CacheStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CacheStore {
    /// Open (and create if needed) a store rooted at `root`
    ///
    /// Orphaned `.tmp` directories left by a crashed writer are swept here;
    /// readers ignore them regardless.
    ///
    /// # Errors
    ///
    /// Returns `StorageIo` if the root cannot be created or scanned
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        sweep_orphans(&root);
        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Acquire the exclusive per-id lock
    ///
    /// The returned owned guard releases on drop on every exit path,
    /// including cancellation. Concurrent requests with the same fingerprint
    /// serialize here so at most one upstream call happens per fingerprint.
    pub async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        let cell = {
            let mut locks = self.locks.lock().await;
            if locks.len() > LOCK_SWEEP_THRESHOLD {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            Arc::clone(locks.entry(id.to_owned()).or_default())
        };
        cell.lock_owned().await
    }

    /// Look up an entry by fingerprint
    ///
    /// Streaming chunk bytes are not loaded here; see [`Self::chunk_stream`].
    ///
    /// # Errors
    ///
    /// Returns `CorruptEntry` when `meta.json` exists but the entry is
    /// unreadable or incomplete, `StorageIo` on other filesystem failures
    pub async fn get(&self, id: &str) -> Result<Option<Entry>, StoreError> {
        if !is_valid_id(id) {
            return Ok(None);
        }
        let dir = self.entry_dir(id);

        let raw_meta = match tokio::fs::read(dir.join(META_FILE)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let meta: EntryMeta =
            serde_json::from_slice(&raw_meta).map_err(|e| StoreError::corrupt(id, format!("bad meta.json: {e}")))?;

        let request_body = tokio::fs::read(dir.join(REQUEST_FILE))
            .await
            .map(Bytes::from)
            .map_err(|e| StoreError::corrupt(id, format!("missing {REQUEST_FILE}: {e}")))?;

        let payload = if meta.response.is_streaming {
            let chunk_count = self.read_chunk_count(id).await?;
            ResponsePayload::Streamed { chunk_count }
        } else {
            let body = tokio::fs::read(dir.join(RESPONSE_FILE))
                .await
                .map(Bytes::from)
                .map_err(|e| StoreError::corrupt(id, format!("missing {RESPONSE_FILE}: {e}")))?;
            ResponsePayload::Buffered(body)
        };

        Ok(Some(Entry {
            id: id.to_owned(),
            meta,
            request_body,
            payload,
        }))
    }

    /// Persist a new entry atomically
    ///
    /// Last writer wins when the id already exists; responses to the same
    /// fingerprint are assumed equivalent.
    ///
    /// # Errors
    ///
    /// Returns `StorageIo` on any filesystem failure
    pub async fn put(&self, entry: NewEntry) -> Result<(), StoreError> {
        let final_dir = self.entry_dir(&entry.id);
        let tmp_dir = tmp_sibling(&final_dir);

        remove_dir_if_present(&tmp_dir).await?;
        tokio::fs::create_dir_all(&tmp_dir).await?;

        let meta_json = serde_json::to_vec_pretty(&entry.meta).map_err(std::io::Error::other)?;
        write_synced(&tmp_dir.join(META_FILE), &meta_json).await?;
        write_synced(&tmp_dir.join(REQUEST_FILE), &entry.request_body).await?;

        match &entry.body {
            EntryBody::Buffered(body) => {
                write_synced(&tmp_dir.join(RESPONSE_FILE), body).await?;
            }
            EntryBody::Chunks(chunks) => {
                let chunks_dir = tmp_dir.join(CHUNKS_DIR);
                tokio::fs::create_dir_all(&chunks_dir).await?;
                for (index, chunk) in chunks.iter().enumerate() {
                    write_synced(&chunks_dir.join(chunk_file_name(index)), chunk).await?;
                }
                write_synced(&chunks_dir.join(CHUNK_INDEX_FILE), format!("{}\n", chunks.len()).as_bytes()).await?;
            }
        }

        // Rename cannot replace a non-empty directory; drop the old entry first
        remove_dir_if_present(&final_dir).await?;
        tokio::fs::rename(&tmp_dir, &final_dir).await?;

        tracing::debug!(id = %entry.id, streaming = matches!(entry.body, EntryBody::Chunks(_)), "recorded entry");
        Ok(())
    }

    /// Enumerate all entries; order is unspecified
    ///
    /// Unreadable entries are skipped with a warning rather than failing the
    /// whole listing.
    ///
    /// # Errors
    ///
    /// Returns `StorageIo` if the store tree cannot be walked
    pub async fn list(&self) -> Result<Vec<EntrySummary>, StoreError> {
        let mut summaries = Vec::new();
        for dir in self.entry_dirs().await? {
            let Some(id) = dir.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
                continue;
            };
            match read_meta(&dir).await {
                Ok(meta) => summaries.push(EntrySummary {
                    id,
                    method: meta.request.method,
                    path: meta.request.path,
                    status: meta.response.status,
                    is_streaming: meta.response.is_streaming,
                    model: meta.metadata.model,
                    temperature: meta.metadata.temperature,
                    prompt_hash: meta.metadata.prompt_hash,
                }),
                Err(e) => {
                    tracing::warn!(id, error = %e, "skipping unreadable entry");
                }
            }
        }
        Ok(summaries)
    }

    /// Aggregate statistics over all entries
    ///
    /// # Errors
    ///
    /// Returns `StorageIo` if the store tree cannot be walked
    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        let mut stats = StoreStats::default();
        for dir in self.entry_dirs().await? {
            let Ok(meta) = read_meta(&dir).await else {
                continue;
            };
            stats.total_entries += 1;
            stats.total_size_bytes += dir_size(&dir).await?;
            if meta.response.is_streaming {
                stats.streaming_responses += 1;
            }
            if let Some(model) = meta.metadata.model {
                *stats.entries_by_model.entry(model).or_default() += 1;
            }
        }
        Ok(stats)
    }

    /// Remove all store contents, returning the number of entries removed
    ///
    /// Refuses to touch a directory that has contents but no recorded entry
    /// anywhere, to limit blast radius when pointed at the wrong path.
    ///
    /// # Errors
    ///
    /// Returns `NotACacheRoot` when the guard triggers, `StorageIo` on
    /// filesystem failures
    pub async fn clear(&self) -> Result<usize, StoreError> {
        let entries = self.entry_dirs().await?;
        let mut count = 0;
        for dir in &entries {
            if dir.join(META_FILE).exists() {
                count += 1;
            }
        }

        let mut children = tokio::fs::read_dir(&self.root).await?;
        let mut non_empty = false;
        let mut to_remove = Vec::new();
        while let Some(child) = children.next_entry().await? {
            non_empty = true;
            to_remove.push(child.path());
        }

        if count == 0 {
            if non_empty {
                return Err(StoreError::NotACacheRoot(self.root.clone()));
            }
            return Ok(0);
        }

        for path in to_remove {
            if path.is_dir() {
                tokio::fs::remove_dir_all(&path).await?;
            } else {
                tokio::fs::remove_file(&path).await?;
            }
        }

        tracing::info!(count, root = %self.root.display(), "cleared cache");
        Ok(count)
    }

    /// Stream a streaming entry's chunks, in recorded order
    pub fn chunk_stream(
        &self,
        id: &str,
        chunk_count: usize,
    ) -> Pin<Box<dyn Stream<Item = Result<Bytes, StoreError>> + Send>> {
        let chunks_dir = self.entry_dir(id).join(CHUNKS_DIR);
        let paths = (0..chunk_count).map(move |index| chunks_dir.join(chunk_file_name(index)));
        Box::pin(futures_util::stream::iter(paths).then(|path| async move {
            let bytes = tokio::fs::read(&path).await?;
            Ok(Bytes::from(bytes))
        }))
    }

    /// Load all chunks of a streaming entry into memory
    ///
    /// # Errors
    ///
    /// Returns `CorruptEntry` when the chunk index or a chunk file is
    /// missing, `StorageIo` on other filesystem failures
    pub async fn load_chunks(&self, id: &str) -> Result<Vec<Bytes>, StoreError> {
        let chunk_count = self.read_chunk_count(id).await?;
        let mut stream = self.chunk_stream(id, chunk_count);
        let mut chunks = Vec::with_capacity(chunk_count);
        while let Some(chunk) = stream.next().await {
            chunks.push(chunk.map_err(|e| StoreError::corrupt(id, format!("missing chunk: {e}")))?);
        }
        Ok(chunks)
    }

    fn entry_dir(&self, id: &str) -> PathBuf {
        self.root.join(&id[..2]).join(id)
    }

    async fn read_chunk_count(&self, id: &str) -> Result<usize, StoreError> {
        let chunks_dir = self.entry_dir(id).join(CHUNKS_DIR);
        let raw = tokio::fs::read_to_string(chunks_dir.join(CHUNK_INDEX_FILE))
            .await
            .map_err(|e| StoreError::corrupt(id, format!("missing chunk index: {e}")))?;
        let count: usize = raw
            .trim()
            .parse()
            .map_err(|e| StoreError::corrupt(id, format!("bad chunk index: {e}")))?;

        // Chunks are written sequentially, so a present last chunk means a
        // complete sequence
        if count > 0 && !chunks_dir.join(chunk_file_name(count - 1)).exists() {
            return Err(StoreError::corrupt(id, format!("expected {count} chunks")));
        }
        Ok(count)
    }

    /// All published entry directories under the two-level fan-out
    async fn entry_dirs(&self) -> Result<Vec<PathBuf>, StoreError> {
        let mut dirs = Vec::new();
        let mut fanout = tokio::fs::read_dir(&self.root).await?;
        while let Some(bucket) = fanout.next_entry().await? {
            if !bucket.file_type().await?.is_dir() {
                continue;
            }
            let mut entries = tokio::fs::read_dir(bucket.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let is_tmp = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(TMP_SUFFIX));
                if entry.file_type().await?.is_dir() && !is_tmp {
                    dirs.push(path);
                }
            }
        }
        Ok(dirs)
    }
}

/// Ids are hex digests; anything else never resolves (and never escapes the root)
fn is_valid_id(id: &str) -> bool {
    id.len() >= 2 && id.bytes().all(|b| b.is_ascii_hexdigit())
}

fn chunk_file_name(index: usize) -> String {
    format!("{index:06}.bin")
}

fn tmp_sibling(final_dir: &Path) -> PathBuf {
    let mut name = final_dir.as_os_str().to_owned();
    name.push(TMP_SUFFIX);
    PathBuf::from(name)
}

async fn write_synced(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    Ok(())
}

async fn remove_dir_if_present(path: &Path) -> Result<(), StoreError> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn read_meta(dir: &Path) -> Result<EntryMeta, StoreError> {
    let raw = tokio::fs::read(dir.join(META_FILE)).await?;
    serde_json::from_slice(&raw).map_err(|e| StoreError::StorageIo(std::io::Error::other(e)))
}

async fn dir_size(dir: &Path) -> Result<u64, StoreError> {
    let mut total = 0;
    let mut pending = vec![dir.to_owned()];
    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else {
                total += entry.metadata().await?.len();
            }
        }
    }
    Ok(total)
}

/// Remove `.tmp` directories orphaned by a crashed writer
fn sweep_orphans(root: &Path) {
    let Ok(fanout) = std::fs::read_dir(root) else {
        return;
    };
    for bucket in fanout.flatten() {
        let Ok(entries) = std::fs::read_dir(bucket.path()) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let is_tmp = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(TMP_SUFFIX));
            if is_tmp && path.is_dir() {
                if let Err(e) = std::fs::remove_dir_all(&path) {
                    tracing::warn!(path = %path.display(), error = %e, "failed to sweep orphaned tmp dir");
                } else {
                    tracing::debug!(path = %path.display(), "swept orphaned tmp dir");
                }
            }
        }
    }
}

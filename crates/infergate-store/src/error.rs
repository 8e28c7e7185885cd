use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the cache store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying filesystem failure
    #[error("storage i/o: {0}")]
    StorageIo(#[from] std::io::Error),

    /// `meta.json` exists but the entry is unreadable or incomplete
    #[error("corrupt entry {id}: {reason}")]
    CorruptEntry { id: String, reason: String },

    /// `clear` target has contents but no recorded entries anywhere
    #[error("{} does not look like a cache root; refusing to clear", .0.display())]
    NotACacheRoot(PathBuf),
}

impl StoreError {
    pub(crate) fn corrupt(id: &str, reason: impl Into<String>) -> Self {
        Self::CorruptEntry {
            id: id.to_owned(),
            reason: reason.into(),
        }
    }
}

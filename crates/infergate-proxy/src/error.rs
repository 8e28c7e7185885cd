use http::StatusCode;
use infergate_core::HttpError;
use infergate_store::StoreError;
use thiserror::Error;

/// Errors that can occur while routing a request
#[derive(Debug, Error)]
pub enum GateError {
    /// No cached entry for the request fingerprint in replay-only mode
    #[error("no cached entry for this request; replay-only mode")]
    CacheMiss { id: String },

    /// Upstream could not be reached (no status line received)
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    /// Store read or write failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Unexpected internal error
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl HttpError for GateError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::CacheMiss { .. } => StatusCode::NOT_FOUND,
            Self::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
            Self::Store(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::CacheMiss { .. } => "cache_miss",
            Self::UpstreamUnreachable(_) => "upstream_unreachable",
            Self::Store(_) => "storage_error",
            Self::Internal(_) => "internal_error",
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::Internal(_) => "an internal error occurred".to_owned(),
            other => other.to_string(),
        }
    }
}

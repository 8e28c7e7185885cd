//! Shared core types for InferenceGate

mod error;

pub use error::HttpError;

//! Upload error types.

use crate::transport::TransportError;

/// Errors produced by the upload engine.
///
/// Only `Transport` failures are eligible for retry. `Protocol` covers
/// malformed or field-missing backend responses, which are presumed futile
/// to retry. `TooLarge` and `Unreadable` are pre-flight validation failures.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("The file could not be uploaded because it exceeds the maximum file size allowed.")]
    TooLarge,

    #[error("The file could not be uploaded because it cannot be read.")]
    Unreadable(#[source] std::io::Error),

    #[error("cancelled")]
    Cancelled,
}

impl UploadError {
    /// Returns `true` if the operation that produced this error may be
    /// re-attempted under the retry policy.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UploadError::Transport(_))
    }
}

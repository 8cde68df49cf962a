//! Engine error taxonomy.
//!
//! Errors are split by how the run reacts to them: vision errors carry a
//! retryable/fatal classification, media errors are always recoverable
//! (skip + record), and the remaining kinds abort the run.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the vision backend.
#[derive(Debug, Error)]
pub enum VisionError {
    /// Missing or rejected credentials. Never retried.
    #[error("not authenticated with vision backend: {0}")]
    NotAuthenticated(String),

    /// Quota or billing exhausted. Never retried.
    #[error("vision backend quota exhausted: {0}")]
    QuotaExhausted(String),

    /// Request the backend rejected as malformed. Never retried.
    #[error("vision backend rejected request: {0}")]
    InvalidRequest(String),

    /// Network-level failure (connect, timeout, TLS).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-success HTTP response that is not one of the typed kinds above.
    #[error("vision backend error ({status}): {message}")]
    ApiResponse {
        /// HTTP status code.
        status: u16,
        /// Error message from the backend.
        message: String,
        /// Backend error type, if the response carried one.
        error_type: Option<String>,
    },

    /// Response arrived but no usable payload could be extracted.
    #[error("unparseable vision response: {0}")]
    Parse(String),

    /// Retries exhausted on a transient error.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made, including the first.
        attempts: u32,
        /// The final transient error, stringified.
        last: String,
    },
}

impl VisionError {
    /// Whether the retry policy applies to this error.
    ///
    /// Timeouts, connection failures, rate limiting (429), and server
    /// errors (5xx, including the overload statuses 522/529) are
    /// transient. Auth, quota, and malformed-request errors are fatal.
    pub fn is_transient(&self) -> bool {
        match self {
            VisionError::Network(e) => e.is_timeout() || e.is_connect(),
            VisionError::ApiResponse { status, .. } => {
                matches!(status, 408 | 429) || (500..=599).contains(status)
            }
            // A garbled response is worth one more try.
            VisionError::Parse(_) => true,
            VisionError::NotAuthenticated(_)
            | VisionError::QuotaExhausted(_)
            | VisionError::InvalidRequest(_)
            | VisionError::RetriesExhausted { .. } => false,
        }
    }

    /// Whether this error must abort the whole run (exit code 2).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VisionError::NotAuthenticated(_)
                | VisionError::QuotaExhausted(_)
                | VisionError::InvalidRequest(_)
        )
    }
}

/// Errors while reading or preparing an image. Always recoverable at the
/// run level: the image is skipped and the failure recorded in the report.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("unreadable file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("HEIC support not compiled in, cannot decode {0}")]
    HeicDisabled(PathBuf),

    #[error("failed to encode {path}: {reason}")]
    Encode { path: PathBuf, reason: String },
}

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("source directory not found or not a directory: {0}")]
    InvalidSource(PathBuf),

    #[error("no undo manifest found at {0}")]
    ManifestMissing(PathBuf),

    #[error("roster is empty; add subjects with `photosort database` or use --mode auto-cluster")]
    EmptyRoster,

    #[error("roster entry '{0}' already exists")]
    DuplicateRosterEntry(String),

    #[error("roster entry '{0}' not found")]
    RosterEntryNotFound(String),

    #[error("reference image not found: {0}")]
    ReferenceImageMissing(PathBuf),

    #[error(transparent)]
    Vision(#[from] VisionError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed state file {path}: {source}")]
    StateFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Result alias for engine operations.
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

//! Error taxonomy for ragdoc.
//!
//! [`ValidationError`] covers everything the format sniffer can reject and is
//! always scoped to a single file. [`Error`] is the pipeline-wide error; its
//! classification helpers decide whether a failure is retried, recorded
//! against one document, or aborts a whole batch.

use thiserror::Error;

/// A file was rejected before it entered the pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unsupported file extension: {0:?}")]
    UnsupportedExtension(String),

    #[error("{ext}: header does not match any known signature")]
    SignatureMismatch { ext: String },

    #[error("{ext}: container structure mismatch: {detail}")]
    StructureMismatch { ext: String, detail: String },

    #[error("{ext}: invalid content: {detail}")]
    ContentInvalid { ext: String, detail: String },

    #[error("{ext}: trailer does not match the expected end marker")]
    TrailerMismatch { ext: String },

    #[error("file is {size} bytes, limit is {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("could not read file content: {0}")]
    Unreadable(String),
}

/// Main error type for pipeline operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Network failure, timeout, 429 or 5xx from a backend. Eligible for retry.
    #[error("backend unavailable: {0}")]
    TransientBackend(String),

    /// Dimension mismatch, missing provider or credentials. Never retried.
    #[error("configuration error: {0}")]
    PermanentConfig(String),

    #[error("malformed backend response: {0}")]
    MalformedResponse(String),

    /// Backend rejected the request (non-retryable 4xx).
    #[error("backend rejected request: {0}")]
    Backend(String),

    #[error("no plugin registered for extension {0:?}")]
    PluginNotFound(String),

    #[error("plugin for {ext:?} failed to initialize: {reason}")]
    PluginInitFailed { ext: String, reason: String },

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for failures a caller may retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientBackend(_))
    }

    /// True for failures that make every remaining document in a batch fail
    /// the same way, so the batch is abandoned.
    pub fn aborts_batch(&self) -> bool {
        matches!(self, Error::PermanentConfig(_))
    }

    /// Category code used in the `{code, msg}` response envelope. `0` is
    /// reserved for success.
    pub fn envelope_code(&self) -> i32 {
        match self {
            Error::Validation(_) | Error::InvalidRequest(_) => 1,
            Error::NotFound(_) => 2,
            Error::TransientBackend(_) => 3,
            Error::PermanentConfig(_) => 4,
            Error::PluginNotFound(_) | Error::PluginInitFailed { .. } => 5,
            Error::MalformedResponse(_)
            | Error::Backend(_)
            | Error::Extraction(_)
            | Error::Store(_)
            | Error::Io(_) => 6,
        }
    }
}

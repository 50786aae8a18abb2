//! Error types for tasklink-sync.

use std::path::PathBuf;

use thiserror::Error;

/// Failure of a single remote operation against either store.
///
/// Adapters retry transient failures before returning one; the engine
/// treats any `StoreError` as fatal to the entity being processed only.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Timeout, transport failure, rate limit, or 5xx after retries ran out.
    #[error("{op}: transient failure after {attempts} attempt(s): {message}")]
    Transient {
        op: String,
        attempts: u32,
        message: String,
    },

    /// The remote refused the request.
    #[error("{op}: rejected with status {status}: {message}")]
    Rejected {
        op: String,
        status: u16,
        message: String,
    },

    /// The response did not have the expected record shape.
    #[error("{op}: malformed response: {message}")]
    Malformed { op: String, message: String },
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient { .. })
    }

    pub fn malformed(op: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Malformed {
            op: op.into(),
            message: message.into(),
        }
    }
}

/// Errors that abort a whole pass. No cursor is advanced after one.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A delta could not be fetched from one of the stores.
    #[error("failed to fetch {what}: {source}")]
    Fetch {
        what: &'static str,
        #[source]
        source: StoreError,
    },

    /// The queued mirror mutations could not be flushed.
    #[error("mirror batch commit failed: {0}")]
    Commit(#[source] StoreError),

    /// Cursor state could not be read or written through a remote store.
    #[error("cursor store error: {0}")]
    CursorStore(#[source] StoreError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (cursor file, dumps).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The configuration cannot drive a pass.
    #[error(transparent)]
    Config(#[from] tasklink_core::ConfigError),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

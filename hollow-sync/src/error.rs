//! Error types for hollow-sync.

use std::path::PathBuf;

use thiserror::Error;

use hollow_core::error::DepotError;

/// Errors raised while orchestrating a sync batch.
///
/// Depot failures and busy files are recoverable per file; the orchestrator
/// turns them into error modifications and keeps the batch going. Everything
/// else aborts the batch.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Underlying I/O failure, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Populate store (de)serialization failure.
    #[error("populate store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Depot(#[from] DepotError),

    /// A concurrent reader held the file exclusively through every retry.
    #[error("file busy after {attempts} attempt(s): {path}")]
    FileBusy { path: PathBuf, attempts: u32 },

    /// Malformed always-resident or file-filter regex.
    #[error("bad file pattern: {0}")]
    BadPattern(#[from] regex::Error),

    /// A depot file mapped outside the workspace client root.
    #[error("local path escapes the client root: {path}")]
    OutsideRoot { path: PathBuf },

    /// The batch was abandoned after a fatal error on another worker.
    #[error("sync batch canceled")]
    Canceled,
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

//! Error types for hollow-service.

use std::path::PathBuf;

use thiserror::Error;

use hollow_core::error::SettingError;
use hollow_proto::ProtoError;
use hollow_sync::SyncError;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Underlying I/O failure, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Setting(#[from] SettingError),

    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    /// A runtime task panicked or was aborted.
    #[error("{task} task failed: {reason}")]
    Task { task: &'static str, reason: String },
}

/// Convenience constructor for [`ServiceError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ServiceError {
    ServiceError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn task_err(task: &'static str, reason: impl ToString) -> ServiceError {
    ServiceError::Task {
        task,
        reason: reason.to_string(),
    }
}

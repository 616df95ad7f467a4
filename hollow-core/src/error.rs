//! Error types for hollow-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from setting tree and setting file operations.
#[derive(Debug, Error)]
pub enum SettingError {
    /// Underlying I/O failure, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// XML parse error on load.
    #[error("failed to parse settings XML: {0}")]
    XmlParse(#[from] xmltree::ParseError),

    /// XML emit error on save.
    #[error("failed to write settings XML: {0}")]
    XmlWrite(#[from] xmltree::Error),

    /// JSON (de)serialization error for the wire form of a setting node.
    #[error("setting JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A JSON token that has no setting-node equivalent (e.g. an array).
    #[error("JSON value cannot be represented as a setting node: {kind}")]
    UnsupportedJson { kind: &'static str },
}

/// Convenience constructor for [`SettingError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SettingError {
    SettingError::Io {
        path: path.into(),
        source,
    }
}

/// Errors reported by a depot backend through the [`crate::depot`] capability.
///
/// These are the recoverable, per-file error kinds of the sync batch: the
/// orchestrator converts them into error modifications and keeps going.
#[derive(Debug, Error)]
pub enum DepotError {
    #[error("cannot connect to depot '{server}': {reason}")]
    Connect { server: String, reason: String },

    #[error("cannot resolve '{spec}': {reason}")]
    Resolve { spec: String, reason: String },

    #[error("no such depot file: {path}")]
    NoSuchFile { path: String },

    #[error("permission denied for '{user}' on {path}")]
    PermissionDenied { path: String, user: String },

    #[error("depot command '{command}' failed: {reason}")]
    Command { command: String, reason: String },

    #[error("workspace '{workspace}' has no client root mapping")]
    NotMapped { workspace: String },
}

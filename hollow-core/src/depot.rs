//! Depot capability — the seam to the version-control backend.
//!
//! The service never speaks a VCS protocol itself; it consumes this small
//! capability interface (connect, resolve, fetch, have/flush, where, run)
//! and any conforming backend satisfies it. [`memory::MemoryDepotFactory`]
//! is the in-process backend used by tests and `--local` runs.

pub mod memory;

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::DepotError;
use crate::types::{DepotServer, DepotUser, DepotWorkspace};

// ---------------------------------------------------------------------------
// Revision syntax
// ---------------------------------------------------------------------------

/// A target revision in depot syntax: `#have`, `#head`, `#N`, `@change`,
/// `@label`, `@YYYY/MM/DD`.
///
/// A range (`spec#lo,#hi` / `spec@lo,@hi`) resolves to its upper bound; sync
/// only ever materializes the newest revision of the requested window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DepotRevision {
    Have,
    #[default]
    Head,
    Number(i64),
    Change(i64),
    Label(String),
    Date(String),
}

impl DepotRevision {
    /// Parse the revision suffix of a file spec. Empty input means `#head`.
    pub fn parse(text: &str) -> Result<Self, DepotError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(DepotRevision::Head);
        }

        // Ranges keep only the upper bound.
        let upper = text.rsplit(',').next().unwrap_or(text).trim();

        let bad = |reason: &str| DepotError::Resolve {
            spec: text.to_string(),
            reason: reason.to_string(),
        };

        if let Some(rev) = upper.strip_prefix('#') {
            return match rev.to_ascii_lowercase().as_str() {
                "have" => Ok(DepotRevision::Have),
                "head" => Ok(DepotRevision::Head),
                _ => rev
                    .parse::<i64>()
                    .map(DepotRevision::Number)
                    .map_err(|_| bad("not a revision number")),
            };
        }

        if let Some(at) = upper.strip_prefix('@') {
            if at.is_empty() {
                return Err(bad("empty changelist/label"));
            }
            if let Ok(change) = at.parse::<i64>() {
                return Ok(DepotRevision::Change(change));
            }
            if at.contains('/') {
                return Ok(DepotRevision::Date(at.to_string()));
            }
            return Ok(DepotRevision::Label(at.to_string()));
        }

        Err(bad("expected '#' or '@' revision syntax"))
    }

    /// Split `//depot/path#rev` / `//depot/path@change` into the bare spec
    /// and its parsed revision.
    pub fn split_spec(spec: &str) -> Result<(String, Self), DepotError> {
        let cut = spec.find(['#', '@']);
        match cut {
            Some(index) => {
                let (path, rev) = spec.split_at(index);
                Ok((path.to_string(), DepotRevision::parse(rev)?))
            }
            None => Ok((spec.to_string(), DepotRevision::Head)),
        }
    }
}

impl fmt::Display for DepotRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepotRevision::Have => write!(f, "#have"),
            DepotRevision::Head => write!(f, "#head"),
            DepotRevision::Number(n) => write!(f, "#{n}"),
            DepotRevision::Change(c) => write!(f, "@{c}"),
            DepotRevision::Label(l) => write!(f, "@{l}"),
            DepotRevision::Date(d) => write!(f, "@{d}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Capability types
// ---------------------------------------------------------------------------

/// Connection parameters for one depot login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DepotConfig {
    pub server: DepotServer,
    pub workspace: DepotWorkspace,
    pub user: DepotUser,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

/// One concrete file at one concrete revision, as resolved by the depot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepotFile {
    pub depot_path: String,
    pub revision: i64,
    pub file_size: u64,
    /// The file is deleted at this revision (sync removes it locally).
    pub deleted: bool,
}

/// Structured result of an arbitrary depot command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepotCommandResult {
    pub output: Vec<String>,
    pub has_error: bool,
}

/// One live depot-client handle. Not safe for concurrent use by two threads;
/// the connection cache hands these out exclusively per request.
pub trait DepotClient: Send {
    /// Resolve a file spec against a target revision. Wildcard specs
    /// (`//depot/dir/...`) expand to every matching file.
    fn resolve(
        &mut self,
        spec: &str,
        revision: &DepotRevision,
    ) -> Result<Vec<DepotFile>, DepotError>;

    /// Fetch full content of one file at one revision.
    fn fetch(&mut self, depot_path: &str, revision: i64) -> Result<Vec<u8>, DepotError>;

    /// The revision this workspace currently "has", if any.
    fn have_revision(&mut self, depot_path: &str) -> Result<Option<i64>, DepotError>;

    /// Record have-revisions on the server without transferring content.
    fn flush_have(&mut self, files: &[(String, i64)]) -> Result<(), DepotError>;

    /// Map a depot path to its local workspace path.
    fn where_file(&mut self, depot_path: &str) -> Result<PathBuf, DepotError>;

    /// Absolute local root of this connection's workspace.
    fn client_root(&mut self) -> Result<PathBuf, DepotError>;

    /// Run an arbitrary depot command and report structured output.
    fn run(&mut self, command: &str, args: &[String]) -> Result<DepotCommandResult, DepotError>;
}

/// Creates connected [`DepotClient`] handles. Connecting is expensive
/// (handshake + login), which is why the sync layer caches the results.
pub trait DepotFactory: Send + Sync {
    fn connect(&self, config: &DepotConfig) -> Result<Box<dyn DepotClient>, DepotError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

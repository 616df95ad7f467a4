//! Domain types for the hollow sync service.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem
//! paths. Everything here crosses the wire as JSON, so all types derive
//! serde traits.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed depot server address (`host:port` form).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct DepotServer(pub String);

impl fmt::Display for DepotServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for DepotServer {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DepotServer {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A strongly-typed depot workspace (client) name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct DepotWorkspace(pub String);

impl fmt::Display for DepotWorkspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for DepotWorkspace {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DepotWorkspace {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A strongly-typed depot user name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct DepotUser(pub String);

impl fmt::Display for DepotUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for DepotUser {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DepotUser {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// The OS identity a request executes under (impersonation scoping).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Identity(pub String);

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// How file content reaches the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncMethod {
    /// Install placeholders; content is hydrated lazily on first access.
    #[default]
    Virtual,
    /// Fetch full content now (ordinary sync).
    Regular,
}

impl fmt::Display for SyncMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMethod::Virtual => write!(f, "virtual"),
            SyncMethod::Regular => write!(f, "regular"),
        }
    }
}

/// When have-revisions are recorded on the depot server.
///
/// This governs only server-side have-updates; the local populate store is
/// persisted per file under either mode. `Atomic` flushes each file as it
/// completes and is safe to terminate: a rerun skips already-flushed files
/// and retries the rest. `Single` batches one flush at the end of the run;
/// it is faster, but an interrupt loses the batched updates and a rerun
/// retransfers those files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FlushType {
    #[default]
    Atomic,
    Single,
}

impl fmt::Display for FlushType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushType::Atomic => write!(f, "atomic"),
            FlushType::Single => write!(f, "single"),
        }
    }
}

/// Aggregate outcome of a sync batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Success,
    Error,
}

/// Per-file outcome kind recorded in a [`SyncModification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Added,
    Updated,
    Deleted,
    UpToDate,
    /// Resolution or transfer failed for reasons without a dedicated kind.
    GenericError,
    /// The on-disk swap lost against a concurrent reader after all retries.
    Busy,
    NoSuchFile,
    PermissionDenied,
}

impl SyncAction {
    /// Whether this action makes the aggregate batch status `Error`.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            SyncAction::GenericError
                | SyncAction::Busy
                | SyncAction::NoSuchFile
                | SyncAction::PermissionDenied
        )
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SyncAction::Added => "added",
            SyncAction::Updated => "updated",
            SyncAction::Deleted => "deleted",
            SyncAction::UpToDate => "up-to-date",
            SyncAction::GenericError => "error",
            SyncAction::Busy => "busy",
            SyncAction::NoSuchFile => "no-such-file",
            SyncAction::PermissionDenied => "permission-denied",
        };
        write!(f, "{text}")
    }
}

// ---------------------------------------------------------------------------
// Request / result structs
// ---------------------------------------------------------------------------

/// Boolean sync behavior switches (see the CLI surface for their spellings).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SyncFlags {
    pub force: bool,
    pub quiet: bool,
    pub preview: bool,
    pub flush_only: bool,
    /// Return only the aggregate status. The per-file list is still computed
    /// (it settles the status) and then dropped, so a successful result can
    /// carry an empty `modifications` list for a non-empty file set.
    pub ignore_output: bool,
    pub clobber_writable: bool,
}

/// The identity a request executes under on the service side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ExecutionContext {
    pub identity: Identity,
}

/// A complete sync request: file specs plus every knob that shapes the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DepotSyncOptions {
    /// Depot file specs, each optionally suffixed with revision syntax.
    pub files: Vec<String>,
    pub method: SyncMethod,
    pub flush: FlushType,
    pub flags: SyncFlags,
    /// Files at or below this size are fetched resident even under
    /// `Virtual`; tiny files are not worth a hydration round trip.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_size: Option<u64>,
    /// Regex over depot paths that are fetched resident even under `Virtual`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub always_resident: Option<String>,
    pub context: ExecutionContext,
    pub server: DepotServer,
    pub workspace: DepotWorkspace,
    pub user: DepotUser,
}

/// One per-file record in a sync result, in input-spec order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncModification {
    pub action: SyncAction,
    pub depot_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SyncModification {
    pub fn new(action: SyncAction, depot_path: impl Into<String>) -> Self {
        Self {
            action,
            depot_path: depot_path.into(),
            revision: None,
            message: None,
        }
    }

    pub fn with_revision(mut self, revision: i64) -> Self {
        self.revision = Some(revision);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Structured outcome of a sync / resident / reconfigure batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DepotSyncResult {
    pub status: SyncStatus,
    pub modifications: Vec<SyncModification>,
}

impl DepotSyncResult {
    /// Build a result from ordered modifications; status is `Error` iff any
    /// per-file action is an error kind.
    pub fn from_modifications(modifications: Vec<SyncModification>) -> Self {
        let status = if modifications.iter().any(|m| m.action.is_error()) {
            SyncStatus::Error
        } else {
            SyncStatus::Success
        };
        Self {
            status,
            modifications,
        }
    }

    /// A result carrying exactly one error modification.
    pub fn single_error(action: SyncAction, path: impl Into<String>, message: String) -> Self {
        Self {
            status: SyncStatus::Error,
            modifications: vec![SyncModification::new(action, path).with_message(message)],
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == SyncStatus::Success
    }
}

/// Placeholder metadata bound to a single virtual file.
///
/// Exactly one of these exists per placeholder; it disappears once the file
/// becomes resident. The driver-facing populate contract reads these to
/// satisfy on-demand hydration; only the orchestrator writes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePopulateInfo {
    pub depot_path: String,
    pub server: DepotServer,
    pub client: DepotWorkspace,
    pub user: DepotUser,
    pub revision: i64,
    pub file_size: u64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_display() {
        assert_eq!(DepotServer::from("localhost:1666").to_string(), "localhost:1666");
        assert_eq!(DepotWorkspace::from("ws").to_string(), "ws");
        assert_eq!(Identity::from("svc").to_string(), "svc");
    }

    #[test]
    fn error_actions_flip_batch_status() {
        let mods = vec![
            SyncModification::new(SyncAction::Added, "//depot/a"),
            SyncModification::new(SyncAction::Busy, "//depot/b"),
        ];
        let result = DepotSyncResult::from_modifications(mods);
        assert_eq!(result.status, SyncStatus::Error);
    }

    #[test]
    fn clean_actions_keep_success() {
        let mods = vec![
            SyncModification::new(SyncAction::UpToDate, "//depot/a").with_revision(3),
            SyncModification::new(SyncAction::Updated, "//depot/b").with_revision(4),
        ];
        let result = DepotSyncResult::from_modifications(mods);
        assert!(result.succeeded());
    }

    #[test]
    fn options_serde_roundtrip() {
        let options = DepotSyncOptions {
            files: vec!["//depot/x/...".to_string()],
            method: SyncMethod::Virtual,
            flush: FlushType::Atomic,
            server: DepotServer::from("localhost:1666"),
            workspace: DepotWorkspace::from("ws"),
            user: DepotUser::from("alice"),
            ..Default::default()
        };
        let json = serde_json::to_string(&options).expect("serialize");
        let back: DepotSyncOptions = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(options, back);
    }
}

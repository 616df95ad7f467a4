//! Placeholder lifecycle primitives.
//!
//! A placeholder is a zero-byte file plus one [`FilePopulateInfo`] entry in
//! the workspace populate store. The store is a JSON document under
//! `<root>/.hollow/populate.json`; every save goes through the same atomic
//! `.tmp` + rename pattern as content writes, so readers never observe a
//! half-written store or a half-written file.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use sha2::{Digest, Sha256};

use hollow_core::types::FilePopulateInfo;

use crate::error::{io_err, SyncError};

/// Workspace metadata directory name.
pub const STORE_DIR: &str = ".hollow";
/// Populate store file name inside [`STORE_DIR`].
pub const STORE_FILE: &str = "populate.json";

/// Retry policy for on-disk swaps that lose against a concurrent exclusive
/// reader.
#[derive(Debug, Clone, Copy)]
pub struct RenameTunables {
    pub max_attempts: u32,
    pub wait: Duration,
}

impl Default for RenameTunables {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            wait: Duration::from_millis(100),
        }
    }
}

/// Visible state of one workspace file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Absent,
    /// Placeholder on disk, populate entry pending hydration.
    Virtual,
    /// Full content on disk, no populate entry.
    Resident,
}

// ---------------------------------------------------------------------------
// Populate store
// ---------------------------------------------------------------------------

/// Absolute path of the populate store for a client root.
pub fn store_path(root: &Path) -> PathBuf {
    root.join(STORE_DIR).join(STORE_FILE)
}

/// Store key for a local path: root-relative with forward slashes.
pub fn rel_key(root: &Path, local: &Path) -> Result<String, SyncError> {
    let relative = local
        .strip_prefix(root)
        .map_err(|_| SyncError::OutsideRoot {
            path: local.to_path_buf(),
        })?;
    Ok(relative.to_string_lossy().replace('\\', "/"))
}

/// The per-workspace placeholder ledger. One entry per placeholder; entries
/// disappear as files become resident.
#[derive(Debug)]
pub struct PopulateStore {
    path: PathBuf,
    entries: BTreeMap<String, FilePopulateInfo>,
    dirty: bool,
}

impl PopulateStore {
    /// Load the store for `root`. A missing store is an empty store.
    pub fn load(root: &Path) -> Result<Self, SyncError> {
        let path = store_path(root);
        let entries = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(io_err(&path, e)),
        };
        Ok(Self {
            path,
            entries,
            dirty: false,
        })
    }

    /// Persist the store atomically. No-op when nothing changed.
    pub fn save(&mut self) -> Result<(), SyncError> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let body = serde_json::to_vec_pretty(&self.entries)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body).map_err(|e| io_err(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| io_err(&self.path, e))?;
        self.dirty = false;
        Ok(())
    }

    pub fn get(&self, rel: &str) -> Option<&FilePopulateInfo> {
        self.entries.get(rel)
    }

    pub fn insert(&mut self, rel: String, info: FilePopulateInfo) {
        self.entries.insert(rel, info);
        self.dirty = true;
    }

    pub fn remove(&mut self, rel: &str) -> Option<FilePopulateInfo> {
        let removed = self.entries.remove(rel);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &FilePopulateInfo)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What the filesystem plus the store say about one file.
pub fn file_state(local: &Path, store: &PopulateStore, rel: &str) -> FileState {
    match (local.exists(), store.get(rel).is_some()) {
        (false, _) => FileState::Absent,
        (true, true) => FileState::Virtual,
        (true, false) => FileState::Resident,
    }
}

// ---------------------------------------------------------------------------
// Atomic content swap
// ---------------------------------------------------------------------------

/// Replace `path` with `content` atomically.
///
/// The full content lands in a sibling `.tmp` file first and is renamed into
/// place, so a concurrent open observes either the old bytes or the new
/// bytes, never a partial write. An existing file is probed with an
/// exclusive advisory lock first; a busy file is retried per `tunables` and
/// reported as [`SyncError::FileBusy`] when every attempt loses.
pub fn swap_file(path: &Path, content: &[u8], tunables: &RenameTunables) -> Result<(), SyncError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }

    let attempts = tunables.max_attempts.max(1);
    for attempt in 1..=attempts {
        match probe_exclusive(path)? {
            Probe::Clear(_guard) => {
                let tmp = tmp_sibling(path);
                fs::write(&tmp, content).map_err(|e| io_err(&tmp, e))?;
                fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
                return Ok(());
            }
            Probe::Busy => {
                tracing::debug!(path = %path.display(), attempt, "file busy, waiting to retry");
                std::thread::sleep(tunables.wait);
            }
        }
    }
    Err(SyncError::FileBusy {
        path: path.to_path_buf(),
        attempts,
    })
}

/// Remove `path` with the same busy-retry policy as [`swap_file`]. Removing
/// an absent file succeeds.
pub fn remove_file(path: &Path, tunables: &RenameTunables) -> Result<(), SyncError> {
    if !path.exists() {
        return Ok(());
    }
    let attempts = tunables.max_attempts.max(1);
    for attempt in 1..=attempts {
        match probe_exclusive(path)? {
            Probe::Clear(_guard) => {
                return match fs::remove_file(path) {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(io_err(path, e)),
                };
            }
            Probe::Busy => {
                tracing::debug!(path = %path.display(), attempt, "file busy, waiting to retry");
                std::thread::sleep(tunables.wait);
            }
        }
    }
    Err(SyncError::FileBusy {
        path: path.to_path_buf(),
        attempts,
    })
}

/// Outcome of probing a path for an exclusive advisory lock. The held file
/// handle keeps the lock through the rename so two writers cannot race the
/// same path; dropping it releases the lock.
enum Probe {
    /// Lockable; the guard (if any) is held until the swap lands.
    Clear(#[allow(dead_code)] Option<File>),
    Busy,
}

/// Try to take an exclusive advisory lock on `path`. An absent file is
/// trivially lockable.
fn probe_exclusive(path: &Path) -> Result<Probe, SyncError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Probe::Clear(None)),
        Err(e) => return Err(io_err(path, e)),
    };
    match file.try_lock_exclusive() {
        Ok(()) => Ok(Probe::Clear(Some(file))),
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(Probe::Busy),
        Err(e) => Err(io_err(path, e)),
    }
}

/// Hex SHA-256 of a content buffer; used to skip rewrites of unchanged files.
pub fn content_digest(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Digest of the bytes currently on disk, if the file is readable.
pub fn disk_digest(path: &Path) -> Option<String> {
    fs::read(path).ok().map(|bytes| content_digest(&bytes))
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

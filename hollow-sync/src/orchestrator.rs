//! Sync orchestration.
//!
//! One orchestrator serves every request kind that mutates a workspace:
//! `sync` (placeholders or full content), `make_resident` (bulk hydration)
//! and `reconfigure` (rebinding placeholder metadata). Each request resolves
//! its file specs on one depot connection, fans the per-file work out over
//! the bounded worker pool, and reports per-file modifications in input-spec
//! order no matter how the workers interleave.

use std::path::Path;
use std::sync::{Arc, Mutex};

use regex::Regex;

use hollow_core::depot::{DepotFile, DepotRevision};
use hollow_core::error::DepotError;
use hollow_core::types::{
    DepotServer, DepotSyncOptions, DepotSyncResult, DepotUser, DepotWorkspace, FilePopulateInfo,
    FlushType, SyncAction, SyncMethod, SyncModification,
};

use crate::cache::{ConnectionCache, ConnectionKey, ConnectionLease};
use crate::error::SyncError;
use crate::identity::{IdentityContext, ImpersonationScope};
use crate::placeholder::{
    content_digest, disk_digest, rel_key, remove_file, swap_file, PopulateStore, RenameTunables,
};
use crate::workers::run_ordered;

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Receives per-file progress lines while a request runs. The service
/// implementation streams these to the caller as log frames; local runs
/// print them directly.
pub trait ProgressSink: Send + Sync {
    fn log(&self, level: &str, line: &str);
}

/// Discards progress. Used by tests and by callers that only want the
/// structured result.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn log(&self, _level: &str, _line: &str) {}
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Request-level knobs sourced from the service settings.
#[derive(Debug, Clone, Copy)]
pub struct SyncTunables {
    /// Worker pool width; also the most depot connections one batch opens.
    pub max_connections: usize,
    pub rename: RenameTunables,
}

impl Default for SyncTunables {
    fn default() -> Self {
        Self {
            max_connections: 4,
            rename: RenameTunables::default(),
        }
    }
}

pub struct SyncOrchestrator {
    cache: Arc<ConnectionCache>,
    identities: Arc<IdentityContext>,
    tunables: SyncTunables,
}

/// Outcome of resolving one spec entry: either a settled modification or a
/// concrete file still needing work.
enum Planned {
    Done(SyncModification),
    File {
        file: DepotFile,
        local: std::path::PathBuf,
    },
}

impl SyncOrchestrator {
    pub fn new(
        cache: Arc<ConnectionCache>,
        identities: Arc<IdentityContext>,
        tunables: SyncTunables,
    ) -> Self {
        Self {
            cache,
            identities,
            tunables,
        }
    }

    pub fn cache(&self) -> &ConnectionCache {
        &self.cache
    }

    /// Run one sync batch and report per-file outcomes in input-spec order.
    ///
    /// Depot failures, busy files and unmapped paths settle as per-file error
    /// modifications; only workspace-level failures (store I/O, bad request
    /// configuration) abort the batch.
    pub fn sync(
        &self,
        options: &DepotSyncOptions,
        progress: &dyn ProgressSink,
    ) -> Result<DepotSyncResult, SyncError> {
        let _scope = ImpersonationScope::enter(&self.identities, &options.context.identity);
        let key = ConnectionKey::from_options(options);
        let always_resident = options
            .always_resident
            .as_deref()
            .filter(|pattern| !pattern.is_empty())
            .map(Regex::new)
            .transpose()?;

        let (root, planned) = self.resolve_batch(&key, options)?;
        if !options.flags.quiet {
            let verb = if options.flags.preview { "previewing" } else { "syncing" };
            let files = planned
                .iter()
                .filter(|p| matches!(p, Planned::File { .. }))
                .count();
            progress.log("info", &format!("{verb} {files} file(s) under {}", root.display()));
        }

        let store = Mutex::new(PopulateStore::load(&root)?);
        let pending_flush: Mutex<Vec<(String, i64)>> = Mutex::new(Vec::new());

        let jobs: Vec<_> = planned
            .into_iter()
            .map(|item| {
                let key = &key;
                let store = &store;
                let pending_flush = &pending_flush;
                let root = root.as_path();
                let always_resident = always_resident.as_ref();
                move || {
                    let (file, local) = match item {
                        Planned::Done(modification) => return Ok(modification),
                        Planned::File { file, local } => (file, local),
                    };
                    let resident_required = options.method == SyncMethod::Regular
                        || options
                            .client_size
                            .map(|limit| file.file_size <= limit)
                            .unwrap_or(false)
                        || always_resident
                            .map(|re| re.is_match(&file.depot_path))
                            .unwrap_or(false);
                    let modification = match self.sync_one(
                        key,
                        options,
                        root,
                        &file,
                        &local,
                        resident_required,
                        store,
                        pending_flush,
                    ) {
                        Ok(modification) => modification,
                        Err(error) => recoverable_modification(&file, error)?,
                    };
                    if !options.flags.quiet && !options.flags.ignore_output {
                        let level = if modification.action.is_error() { "error" } else { "info" };
                        progress.log(level, &describe(&modification));
                    }
                    Ok(modification)
                }
            })
            .collect();

        let modifications = run_ordered(self.tunables.max_connections.max(1), jobs)?;

        let pending = pending_flush.into_inner().unwrap_or_else(|p| p.into_inner());
        if !pending.is_empty() {
            let mut lease = self.cache.checkout(&key)?;
            lease.flush_have(&pending)?;
        }

        let mut result = DepotSyncResult::from_modifications(modifications);
        if options.flags.ignore_output {
            // Status is already settled; the caller asked not to pay for the
            // per-file list.
            result.modifications.clear();
        }
        if !options.flags.quiet {
            let level = if result.succeeded() { "info" } else { "error" };
            progress.log(level, &format!("sync finished: {:?}", result.status));
        }
        Ok(result)
    }

    /// Hydrate every placeholder whose depot path or workspace-relative path
    /// matches `pattern`.
    pub fn make_resident(
        &self,
        options: &DepotSyncOptions,
        pattern: &str,
        progress: &dyn ProgressSink,
    ) -> Result<DepotSyncResult, SyncError> {
        let _scope = ImpersonationScope::enter(&self.identities, &options.context.identity);
        let key = ConnectionKey::from_options(options);
        let filter = Regex::new(pattern)?;

        let root = {
            let mut lease = self.cache.checkout(&key)?;
            lease.client_root()?
        };
        let store = Mutex::new(PopulateStore::load(&root)?);
        let targets: Vec<(String, FilePopulateInfo)> = lock_store(&store)
            .entries()
            .filter(|(rel, info)| filter.is_match(&info.depot_path) || filter.is_match(rel))
            .map(|(rel, info)| (rel.clone(), info.clone()))
            .collect();

        if targets.is_empty() {
            return Ok(DepotSyncResult::from_modifications(vec![
                SyncModification::new(SyncAction::UpToDate, pattern)
                    .with_message("no matching placeholders"),
            ]));
        }
        if !options.flags.quiet {
            progress.log("info", &format!("hydrating {} placeholder(s)", targets.len()));
        }

        let jobs: Vec<_> = targets
            .into_iter()
            .map(|(rel, info)| {
                let store = &store;
                let root = root.as_path();
                move || {
                    let modification = match self.hydrate_one(root, &rel, &info, store, options) {
                        Ok(modification) => modification,
                        Err(SyncError::Depot(error)) => depot_modification(&info.depot_path, &error),
                        Err(SyncError::FileBusy { attempts, .. }) => {
                            SyncModification::new(SyncAction::Busy, info.depot_path.as_str())
                                .with_revision(info.revision)
                                .with_message(format!("file busy after {attempts} attempt(s)"))
                        }
                        Err(fatal) => return Err(fatal),
                    };
                    if !options.flags.quiet && !options.flags.ignore_output {
                        let level = if modification.action.is_error() { "error" } else { "info" };
                        progress.log(level, &describe(&modification));
                    }
                    Ok(modification)
                }
            })
            .collect();

        let modifications = run_ordered(self.tunables.max_connections.max(1), jobs)?;
        Ok(DepotSyncResult::from_modifications(modifications))
    }

    /// Rewrite placeholder depot bindings (server / workspace / user) without
    /// touching file content. Running it twice is a no-op the second time.
    pub fn reconfigure(
        &self,
        options: &DepotSyncOptions,
        target: &ReconfigureTarget,
        pattern: Option<&str>,
        progress: &dyn ProgressSink,
    ) -> Result<DepotSyncResult, SyncError> {
        let _scope = ImpersonationScope::enter(&self.identities, &options.context.identity);
        let key = ConnectionKey::from_options(options);
        let filter = pattern.map(Regex::new).transpose()?;

        let root = {
            let mut lease = self.cache.checkout(&key)?;
            lease.client_root()?
        };
        let mut store = PopulateStore::load(&root)?;

        let rels: Vec<String> = store
            .entries()
            .filter(|(rel, info)| {
                filter
                    .as_ref()
                    .map(|re| re.is_match(&info.depot_path) || re.is_match(rel))
                    .unwrap_or(true)
            })
            .map(|(rel, _)| rel.clone())
            .collect();

        if rels.is_empty() {
            return Ok(DepotSyncResult::from_modifications(vec![
                SyncModification::new(SyncAction::UpToDate, pattern.unwrap_or("..."))
                    .with_message("no placeholders to reconfigure"),
            ]));
        }

        let mut modifications = Vec::with_capacity(rels.len());
        for rel in rels {
            let Some(current) = store.get(&rel).cloned() else {
                continue;
            };
            let updated = target.apply(&current);
            if updated == current {
                modifications.push(
                    SyncModification::new(SyncAction::UpToDate, current.depot_path.as_str())
                        .with_revision(current.revision),
                );
                continue;
            }
            let mut modification =
                SyncModification::new(SyncAction::Updated, current.depot_path.as_str())
                    .with_revision(current.revision)
                    .with_message(format!("rebound to {}@{}", updated.server, updated.client));
            if options.flags.preview {
                modification = modification.with_message("preview");
            } else {
                store.insert(rel, updated);
            }
            modifications.push(modification);
        }
        if !options.flags.preview {
            store.save()?;
        }
        if !options.flags.quiet {
            progress.log("info", &format!("reconfigured {} placeholder(s)", modifications.len()));
        }
        Ok(DepotSyncResult::from_modifications(modifications))
    }

    // -- internals ----------------------------------------------------------

    /// Resolve every spec on one connection, preserving input order. Spec
    /// failures settle immediately as error modifications.
    fn resolve_batch(
        &self,
        key: &ConnectionKey,
        options: &DepotSyncOptions,
    ) -> Result<(std::path::PathBuf, Vec<Planned>), SyncError> {
        let mut lease = self.cache.checkout(key)?;
        let root = lease.client_root()?;
        let mut planned = Vec::new();
        for spec in &options.files {
            let resolved = DepotRevision::split_spec(spec)
                .and_then(|(path, revision)| lease.resolve(&path, &revision));
            match resolved {
                Ok(files) if files.is_empty() => planned.push(Planned::Done(
                    SyncModification::new(SyncAction::UpToDate, spec.as_str())
                        .with_message("no revisions to sync"),
                )),
                Ok(files) => {
                    for file in files {
                        match lease.where_file(&file.depot_path) {
                            Ok(local) => planned.push(Planned::File { file, local }),
                            Err(error) => planned
                                .push(Planned::Done(depot_modification(&file.depot_path, &error))),
                        }
                    }
                }
                Err(error) => planned.push(Planned::Done(depot_modification(spec, &error))),
            }
        }
        Ok((root, planned))
    }

    #[allow(clippy::too_many_arguments)]
    fn sync_one(
        &self,
        key: &ConnectionKey,
        options: &DepotSyncOptions,
        root: &Path,
        file: &DepotFile,
        local: &Path,
        resident_required: bool,
        store: &Mutex<PopulateStore>,
        pending_flush: &Mutex<Vec<(String, i64)>>,
    ) -> Result<SyncModification, SyncError> {
        let flags = options.flags;
        let target = file.revision;
        let rel = rel_key(root, local)?;

        let mut lease = self.cache.checkout(key)?;
        let have = lease.have_revision(&file.depot_path)?;
        let entry_revision = lock_store(store).get(&rel).map(|info| info.revision);
        let exists = local.exists();
        let desired_virtual =
            options.method == SyncMethod::Virtual && !resident_required && !file.deleted;

        if flags.flush_only {
            if !flags.force && have == Some(target) {
                return Ok(up_to_date(file));
            }
            if flags.preview {
                return Ok(settled_action(file, exists).with_message("flush (preview)"));
            }
            self.record_flush(options.flush, &mut lease, pending_flush, &file.depot_path, target)?;
            return Ok(settled_action(file, exists).with_message("flush only"));
        }

        if !flags.force && have == Some(target) {
            let consistent = if file.deleted {
                !exists && entry_revision.is_none()
            } else if desired_virtual {
                // A hydrated resident copy of the right revision is as good
                // as a placeholder.
                exists && entry_revision.map(|r| r == target).unwrap_or(true)
            } else {
                exists && entry_revision.is_none()
            };
            if consistent {
                return Ok(up_to_date(file));
            }
        }

        // A local file the depot never recorded belongs to the user, not to
        // sync; refuse to overwrite it unless explicitly told to.
        if !file.deleted
            && exists
            && entry_revision.is_none()
            && have.is_none()
            && !flags.clobber_writable
            && !flags.force
        {
            return Ok(
                SyncModification::new(SyncAction::GenericError, file.depot_path.as_str())
                    .with_revision(target)
                    .with_message("local file was never synced; pass --clobber to overwrite"),
            );
        }

        if flags.preview {
            return Ok(settled_action(file, exists)
                .with_revision(target)
                .with_message("preview"));
        }

        if file.deleted {
            remove_file(local, &self.tunables.rename)?;
            {
                let mut store = lock_store(store);
                store.remove(&rel);
                store.save()?;
            }
            self.record_flush(options.flush, &mut lease, pending_flush, &file.depot_path, target)?;
            return Ok(
                SyncModification::new(SyncAction::Deleted, file.depot_path.as_str())
                    .with_revision(target),
            );
        }

        if desired_virtual {
            // Placeholder install: zero bytes on disk, full metadata in the
            // populate store, no content transfer at all. The entry is
            // persisted before the swap: an interrupt in between leaves an
            // entry with no file, and a rerun completes it. The reverse
            // order would leave a file indistinguishable from user work.
            let info = FilePopulateInfo {
                depot_path: file.depot_path.clone(),
                server: key.server.clone(),
                client: key.workspace.clone(),
                user: key.user.clone(),
                revision: target,
                file_size: file.file_size,
            };
            {
                let mut store = lock_store(store);
                store.insert(rel, info);
                store.save()?;
            }
            swap_file(local, &[], &self.tunables.rename)?;
        } else {
            let content = lease.fetch(&file.depot_path, target)?;
            let unchanged = exists
                && entry_revision.is_none()
                && disk_digest(local).as_deref() == Some(content_digest(&content).as_str());
            if !unchanged {
                swap_file(local, &content, &self.tunables.rename)?;
            }
            let mut store = lock_store(store);
            store.remove(&rel);
            store.save()?;
        }
        self.record_flush(options.flush, &mut lease, pending_flush, &file.depot_path, target)?;

        let action = if exists { SyncAction::Updated } else { SyncAction::Added };
        Ok(SyncModification::new(action, file.depot_path.as_str()).with_revision(target))
    }

    fn hydrate_one(
        &self,
        root: &Path,
        rel: &str,
        info: &FilePopulateInfo,
        store: &Mutex<PopulateStore>,
        options: &DepotSyncOptions,
    ) -> Result<SyncModification, SyncError> {
        if options.flags.preview {
            return Ok(
                SyncModification::new(SyncAction::Updated, info.depot_path.as_str())
                    .with_revision(info.revision)
                    .with_message("preview"),
            );
        }

        // Placeholders carry their own depot binding; hydration honors it
        // even when the request was addressed elsewhere.
        let hydrate_key = ConnectionKey {
            server: info.server.clone(),
            workspace: info.client.clone(),
            user: info.user.clone(),
            identity: options.context.identity.clone(),
        };
        let mut lease = self.cache.checkout(&hydrate_key)?;
        let content = lease.fetch(&info.depot_path, info.revision)?;
        if content.len() as u64 != info.file_size {
            tracing::warn!(
                path = %info.depot_path,
                expected = info.file_size,
                actual = content.len(),
                "hydrated size differs from the populate record"
            );
        }
        let local = root.join(rel);
        swap_file(&local, &content, &self.tunables.rename)?;
        {
            let mut store = lock_store(store);
            store.remove(rel);
            store.save()?;
        }
        Ok(
            SyncModification::new(SyncAction::Updated, info.depot_path.as_str())
                .with_revision(info.revision),
        )
    }

    fn record_flush(
        &self,
        flush: FlushType,
        lease: &mut ConnectionLease<'_>,
        pending: &Mutex<Vec<(String, i64)>>,
        depot_path: &str,
        revision: i64,
    ) -> Result<(), SyncError> {
        match flush {
            FlushType::Atomic => lease.flush_have(&[(depot_path.to_string(), revision)])?,
            FlushType::Single => pending
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .push((depot_path.to_string(), revision)),
        }
        Ok(())
    }
}

/// New depot binding applied by `reconfigure`. `None` fields keep their
/// current value.
#[derive(Debug, Clone, Default)]
pub struct ReconfigureTarget {
    pub server: Option<DepotServer>,
    pub client: Option<DepotWorkspace>,
    pub user: Option<DepotUser>,
}

impl ReconfigureTarget {
    fn apply(&self, info: &FilePopulateInfo) -> FilePopulateInfo {
        let mut updated = info.clone();
        if let Some(server) = &self.server {
            updated.server = server.clone();
        }
        if let Some(client) = &self.client {
            updated.client = client.clone();
        }
        if let Some(user) = &self.user {
            updated.user = user.clone();
        }
        updated
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn lock_store(store: &Mutex<PopulateStore>) -> std::sync::MutexGuard<'_, PopulateStore> {
    store.lock().unwrap_or_else(|p| p.into_inner())
}

/// Map a per-file depot failure to its error modification kind.
pub(crate) fn depot_modification(path: &str, error: &DepotError) -> SyncModification {
    let action = match error {
        DepotError::NoSuchFile { .. } => SyncAction::NoSuchFile,
        DepotError::PermissionDenied { .. } => SyncAction::PermissionDenied,
        _ => SyncAction::GenericError,
    };
    SyncModification::new(action, path).with_message(error.to_string())
}

/// Settle recoverable per-file errors as modifications; fatal errors pass
/// through and abort the batch.
fn recoverable_modification(
    file: &DepotFile,
    error: SyncError,
) -> Result<SyncModification, SyncError> {
    match error {
        SyncError::Depot(error) => Ok(depot_modification(&file.depot_path, &error)),
        SyncError::FileBusy { attempts, .. } => Ok(SyncModification::new(
            SyncAction::Busy,
            file.depot_path.as_str(),
        )
        .with_revision(file.revision)
        .with_message(format!("file busy after {attempts} attempt(s)"))),
        SyncError::OutsideRoot { path } => Ok(SyncModification::new(
            SyncAction::GenericError,
            file.depot_path.as_str(),
        )
        .with_message(format!("maps outside the client root: {}", path.display()))),
        fatal => Err(fatal),
    }
}

fn up_to_date(file: &DepotFile) -> SyncModification {
    SyncModification::new(SyncAction::UpToDate, file.depot_path.as_str())
        .with_revision(file.revision)
}

fn settled_action(file: &DepotFile, exists: bool) -> SyncModification {
    let action = if file.deleted {
        SyncAction::Deleted
    } else if exists {
        SyncAction::Updated
    } else {
        SyncAction::Added
    };
    SyncModification::new(action, file.depot_path.as_str()).with_revision(file.revision)
}

fn describe(modification: &SyncModification) -> String {
    let mut line = format!("{}: {}", modification.action, modification.depot_path);
    if let Some(revision) = modification.revision {
        line.push_str(&format!("#{revision}"));
    }
    if let Some(message) = &modification.message {
        line.push_str(&format!(" ({message})"));
    }
    line
}

//! In-memory depot backend.
//!
//! A revisioned file store shared behind `Arc<Mutex<_>>` so every client the
//! factory hands out observes the same depot. Used by the test suites and by
//! `--local` runs; a networked VCS adapter implements the same traits.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;

use crate::depot::{
    DepotClient, DepotCommandResult, DepotConfig, DepotFactory, DepotFile, DepotRevision,
};
use crate::error::DepotError;

#[derive(Debug, Clone)]
struct StoredRevision {
    /// `None` marks the file deleted at this revision.
    content: Option<Vec<u8>>,
    change: i64,
    date: NaiveDate,
}

#[derive(Debug, Default)]
struct DepotState {
    files: BTreeMap<String, Vec<StoredRevision>>,
    /// (workspace, depot path) → recorded have-revision.
    have: HashMap<(String, String), i64>,
    /// workspace → local client root.
    roots: HashMap<String, PathBuf>,
    /// label → changelist it tags.
    labels: HashMap<String, i64>,
    /// depot path prefix → users denied read access.
    denied: HashMap<String, HashSet<String>>,
    next_change: i64,
    today: Option<NaiveDate>,
}

impl DepotState {
    fn submit(&mut self, depot_path: &str, content: Option<Vec<u8>>) -> i64 {
        self.next_change += 1;
        let change = self.next_change;
        let date = self
            .today
            .unwrap_or_else(|| chrono::Utc::now().date_naive());
        let revisions = self.files.entry(depot_path.to_string()).or_default();
        revisions.push(StoredRevision {
            content,
            change,
            date,
        });
        revisions.len() as i64
    }

    fn is_denied(&self, depot_path: &str, user: &str) -> bool {
        self.denied
            .iter()
            .any(|(prefix, users)| depot_path.starts_with(prefix) && users.contains(user))
    }
}

/// Factory plus depot-content builder for tests and local runs.
#[derive(Clone, Default)]
pub struct MemoryDepotFactory {
    state: Arc<Mutex<DepotState>>,
}

impl MemoryDepotFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DepotState> {
        // A poisoned depot mutex means a builder/test thread panicked; the
        // store itself is still structurally sound.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Map a workspace name to its local client root.
    pub fn map_workspace(&self, workspace: &str, root: &Path) {
        self.lock()
            .roots
            .insert(workspace.to_string(), root.to_path_buf());
    }

    /// Submit a new revision of `depot_path`; returns the revision number.
    pub fn add_file(&self, depot_path: &str, content: &[u8]) -> i64 {
        self.lock().submit(depot_path, Some(content.to_vec()))
    }

    /// Submit a deletion revision of `depot_path`.
    pub fn delete_file(&self, depot_path: &str) -> i64 {
        self.lock().submit(depot_path, None)
    }

    /// Tag the current head changelist with a label.
    pub fn tag_label(&self, label: &str) {
        let mut state = self.lock();
        let change = state.next_change;
        state.labels.insert(label.to_string(), change);
    }

    /// Deny read access on a depot path prefix to one user.
    pub fn deny(&self, depot_path_prefix: &str, user: &str) {
        self.lock()
            .denied
            .entry(depot_path_prefix.to_string())
            .or_default()
            .insert(user.to_string());
    }

    /// Pin the submit date used for subsequent revisions (date-revision tests).
    pub fn set_today(&self, date: NaiveDate) {
        self.lock().today = Some(date);
    }

    pub fn head_change(&self) -> i64 {
        self.lock().next_change
    }

    /// Test observation: the have-revision a workspace has recorded.
    pub fn recorded_have(&self, workspace: &str, depot_path: &str) -> Option<i64> {
        self.lock()
            .have
            .get(&(workspace.to_string(), depot_path.to_string()))
            .copied()
    }
}

impl DepotFactory for MemoryDepotFactory {
    fn connect(&self, config: &DepotConfig) -> Result<Box<dyn DepotClient>, DepotError> {
        if config.server.0.is_empty() {
            return Err(DepotError::Connect {
                server: String::new(),
                reason: "empty server address".to_string(),
            });
        }
        if config.user.0.is_empty() {
            return Err(DepotError::Connect {
                server: config.server.0.clone(),
                reason: "empty user".to_string(),
            });
        }
        Ok(Box::new(MemoryDepot {
            state: self.state.clone(),
            config: config.clone(),
        }))
    }
}

struct MemoryDepot {
    state: Arc<Mutex<DepotState>>,
    config: DepotConfig,
}

impl MemoryDepot {
    fn lock(&self) -> std::sync::MutexGuard<'_, DepotState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn pick_revision(
        &self,
        state: &DepotState,
        depot_path: &str,
        revisions: &[StoredRevision],
        target: &DepotRevision,
    ) -> Result<Option<i64>, DepotError> {
        let latest = revisions.len() as i64;
        let resolve_err = |reason: String| DepotError::Resolve {
            spec: format!("{depot_path}{target}"),
            reason,
        };

        let revision = match target {
            DepotRevision::Head => Some(latest),
            DepotRevision::Have => state
                .have
                .get(&(self.config.workspace.0.clone(), depot_path.to_string()))
                .copied(),
            DepotRevision::Number(n) => {
                if *n < 1 || *n > latest {
                    return Err(resolve_err(format!("no revision #{n} (head is #{latest})")));
                }
                Some(*n)
            }
            DepotRevision::Change(change) => newest_at(revisions, |r| r.change <= *change),
            DepotRevision::Label(label) => {
                let change = *state
                    .labels
                    .get(label)
                    .ok_or_else(|| resolve_err(format!("unknown label '{label}'")))?;
                newest_at(revisions, |r| r.change <= change)
            }
            DepotRevision::Date(text) => {
                let date = NaiveDate::parse_from_str(text, "%Y/%m/%d")
                    .map_err(|_| resolve_err(format!("bad date '{text}'")))?;
                newest_at(revisions, |r| r.date <= date)
            }
        };
        Ok(revision)
    }
}

fn newest_at(revisions: &[StoredRevision], keep: impl Fn(&StoredRevision) -> bool) -> Option<i64> {
    revisions
        .iter()
        .enumerate()
        .filter(|(_, r)| keep(r))
        .map(|(index, _)| index as i64 + 1)
        .next_back()
}

impl DepotClient for MemoryDepot {
    fn resolve(
        &mut self,
        spec: &str,
        revision: &DepotRevision,
    ) -> Result<Vec<DepotFile>, DepotError> {
        let state = self.lock();

        let matched: Vec<String> = if let Some(prefix) = spec.strip_suffix("...") {
            state
                .files
                .keys()
                .filter(|path| path.starts_with(prefix))
                .cloned()
                .collect()
        } else if state.files.contains_key(spec) {
            vec![spec.to_string()]
        } else {
            return Err(DepotError::NoSuchFile {
                path: spec.to_string(),
            });
        };
        if matched.is_empty() {
            return Err(DepotError::Resolve {
                spec: spec.to_string(),
                reason: "no files match".to_string(),
            });
        }

        let mut files = Vec::with_capacity(matched.len());
        for depot_path in matched {
            let revisions = &state.files[&depot_path];
            let Some(picked) = self.pick_revision(&state, &depot_path, revisions, revision)? else {
                // No have / nothing at that change or date; skip the file.
                continue;
            };
            let stored = &revisions[picked as usize - 1];
            files.push(DepotFile {
                depot_path,
                revision: picked,
                file_size: stored.content.as_ref().map(|c| c.len() as u64).unwrap_or(0),
                deleted: stored.content.is_none(),
            });
        }
        Ok(files)
    }

    fn fetch(&mut self, depot_path: &str, revision: i64) -> Result<Vec<u8>, DepotError> {
        let state = self.lock();
        if state.is_denied(depot_path, &self.config.user.0) {
            return Err(DepotError::PermissionDenied {
                path: depot_path.to_string(),
                user: self.config.user.0.clone(),
            });
        }
        let revisions = state
            .files
            .get(depot_path)
            .ok_or_else(|| DepotError::NoSuchFile {
                path: depot_path.to_string(),
            })?;
        // Revisions are 1-based; a populate entry edited by hand can carry 0
        // or worse, and that must surface as a missing revision, not a panic.
        if revision < 1 {
            return Err(DepotError::NoSuchFile {
                path: format!("{depot_path}#{revision}"),
            });
        }
        let stored = revisions
            .get(revision as usize - 1)
            .ok_or_else(|| DepotError::NoSuchFile {
                path: format!("{depot_path}#{revision}"),
            })?;
        stored.content.clone().ok_or_else(|| DepotError::NoSuchFile {
            path: format!("{depot_path}#{revision} (deleted)"),
        })
    }

    fn have_revision(&mut self, depot_path: &str) -> Result<Option<i64>, DepotError> {
        Ok(self
            .lock()
            .have
            .get(&(self.config.workspace.0.clone(), depot_path.to_string()))
            .copied())
    }

    fn flush_have(&mut self, files: &[(String, i64)]) -> Result<(), DepotError> {
        let mut state = self.lock();
        for (depot_path, revision) in files {
            state.have.insert(
                (self.config.workspace.0.clone(), depot_path.clone()),
                *revision,
            );
        }
        Ok(())
    }

    fn where_file(&mut self, depot_path: &str) -> Result<PathBuf, DepotError> {
        let state = self.lock();
        let root = state
            .roots
            .get(&self.config.workspace.0)
            .ok_or_else(|| DepotError::NotMapped {
                workspace: self.config.workspace.0.clone(),
            })?;

        let stripped = depot_path
            .strip_prefix("//")
            .ok_or_else(|| DepotError::Resolve {
                spec: depot_path.to_string(),
                reason: "depot paths start with //".to_string(),
            })?;
        // `//<depot>/a/b` maps under the client root as `a/b`.
        let relative = stripped.split_once('/').map(|(_, rest)| rest).unwrap_or("");
        if relative.is_empty() {
            return Err(DepotError::Resolve {
                spec: depot_path.to_string(),
                reason: "no path below the depot name".to_string(),
            });
        }
        Ok(root.join(relative))
    }

    fn client_root(&mut self) -> Result<PathBuf, DepotError> {
        let state = self.lock();
        state
            .roots
            .get(&self.config.workspace.0)
            .cloned()
            .ok_or_else(|| DepotError::NotMapped {
                workspace: self.config.workspace.0.clone(),
            })
    }

    fn run(&mut self, command: &str, args: &[String]) -> Result<DepotCommandResult, DepotError> {
        match command {
            "info" => Ok(DepotCommandResult {
                output: vec![
                    format!("Server address: {}", self.config.server),
                    format!("Client name: {}", self.config.workspace),
                    format!("User name: {}", self.config.user),
                ],
                has_error: false,
            }),
            other => Ok(DepotCommandResult {
                output: vec![format!("unknown command '{other}' (args: {args:?})")],
                has_error: true,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DepotServer, DepotUser, DepotWorkspace};

    fn client(factory: &MemoryDepotFactory, user: &str) -> Box<dyn DepotClient> {
        factory
            .connect(&DepotConfig {
                server: DepotServer::from("localhost:1666"),
                workspace: DepotWorkspace::from("ws"),
                user: DepotUser::from(user),
                password: None,
                host: None,
            })
            .expect("connect")
    }

    #[test]
    fn resolve_head_and_numbered_revisions() {
        let factory = MemoryDepotFactory::new();
        factory.add_file("//depot/a.txt", b"one");
        factory.add_file("//depot/a.txt", b"two");

        let mut depot = client(&factory, "alice");
        let head = depot
            .resolve("//depot/a.txt", &DepotRevision::Head)
            .expect("resolve");
        assert_eq!(head[0].revision, 2);

        let first = depot
            .resolve("//depot/a.txt", &DepotRevision::Number(1))
            .expect("resolve");
        assert_eq!(first[0].revision, 1);
        assert_eq!(depot.fetch("//depot/a.txt", 1).expect("fetch"), b"one");
    }

    #[test]
    fn fetch_rejects_out_of_range_revisions() {
        let factory = MemoryDepotFactory::new();
        factory.add_file("//depot/a.txt", b"one");

        let mut depot = client(&factory, "alice");
        for revision in [0, -3, 99] {
            assert!(matches!(
                depot.fetch("//depot/a.txt", revision),
                Err(DepotError::NoSuchFile { .. })
            ));
        }
    }

    #[test]
    fn wildcard_resolves_every_matching_file() {
        let factory = MemoryDepotFactory::new();
        factory.add_file("//depot/x/a.txt", b"a");
        factory.add_file("//depot/x/b.txt", b"b");
        factory.add_file("//depot/y/c.txt", b"c");

        let mut depot = client(&factory, "alice");
        let files = depot
            .resolve("//depot/x/...", &DepotRevision::Head)
            .expect("resolve");
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn have_and_flush_roundtrip() {
        let factory = MemoryDepotFactory::new();
        factory.add_file("//depot/a.txt", b"one");

        let mut depot = client(&factory, "alice");
        assert_eq!(depot.have_revision("//depot/a.txt").expect("have"), None);
        depot
            .flush_have(&[("//depot/a.txt".to_string(), 1)])
            .expect("flush");
        assert_eq!(depot.have_revision("//depot/a.txt").expect("have"), Some(1));
        assert_eq!(factory.recorded_have("ws", "//depot/a.txt"), Some(1));
    }

    #[test]
    fn denied_user_cannot_fetch() {
        let factory = MemoryDepotFactory::new();
        factory.add_file("//depot/secret/key.txt", b"hunter2");
        factory.deny("//depot/secret/", "mallory");

        let mut depot = client(&factory, "mallory");
        let err = depot.fetch("//depot/secret/key.txt", 1).unwrap_err();
        assert!(matches!(err, DepotError::PermissionDenied { .. }));

        let mut depot = client(&factory, "alice");
        assert!(depot.fetch("//depot/secret/key.txt", 1).is_ok());
    }

    #[test]
    fn labels_and_changes_pin_revisions() {
        let factory = MemoryDepotFactory::new();
        factory.add_file("//depot/a.txt", b"one");
        factory.tag_label("rel-1");
        factory.add_file("//depot/a.txt", b"two");

        let mut depot = client(&factory, "alice");
        let at_label = depot
            .resolve("//depot/a.txt", &DepotRevision::Label("rel-1".to_string()))
            .expect("resolve");
        assert_eq!(at_label[0].revision, 1);
    }

    #[test]
    fn deleted_revision_reports_deleted() {
        let factory = MemoryDepotFactory::new();
        factory.add_file("//depot/gone.txt", b"data");
        factory.delete_file("//depot/gone.txt");

        let mut depot = client(&factory, "alice");
        let head = depot
            .resolve("//depot/gone.txt", &DepotRevision::Head)
            .expect("resolve");
        assert!(head[0].deleted);
        assert!(depot.fetch("//depot/gone.txt", 2).is_err());
    }

    #[test]
    fn where_maps_under_client_root() {
        let factory = MemoryDepotFactory::new();
        factory.add_file("//depot/x/a.txt", b"a");
        factory.map_workspace("ws", Path::new("/work/ws"));

        let mut depot = client(&factory, "alice");
        let local = depot.where_file("//depot/x/a.txt").expect("where");
        assert_eq!(local, PathBuf::from("/work/ws/x/a.txt"));
    }
}

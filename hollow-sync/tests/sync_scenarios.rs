//! End-to-end orchestrator scenarios over the in-memory depot backend.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use hollow_core::depot::memory::MemoryDepotFactory;
use hollow_core::types::{
    DepotServer, DepotSyncOptions, DepotUser, DepotWorkspace, ExecutionContext,
    FilePopulateInfo, FlushType, Identity, SyncAction, SyncMethod, SyncStatus,
};
use hollow_sync::orchestrator::{NullProgress, ReconfigureTarget, SyncOrchestrator, SyncTunables};
use hollow_sync::placeholder::{file_state, FileState, PopulateStore};
use hollow_sync::{ConnectionCache, IdentityContext};

struct Rig {
    factory: MemoryDepotFactory,
    orchestrator: SyncOrchestrator,
    root: tempfile::TempDir,
}

fn rig() -> Rig {
    let factory = MemoryDepotFactory::new();
    let root = tempfile::tempdir().expect("tempdir");
    factory.map_workspace("ws", root.path());
    let cache = Arc::new(ConnectionCache::new(Arc::new(factory.clone())));
    let identities = Arc::new(IdentityContext::new(Identity::from("service")));
    let orchestrator = SyncOrchestrator::new(cache, identities, SyncTunables::default());
    Rig {
        factory,
        orchestrator,
        root,
    }
}

fn options(files: &[&str], method: SyncMethod) -> DepotSyncOptions {
    DepotSyncOptions {
        files: files.iter().map(|s| s.to_string()).collect(),
        method,
        flush: FlushType::Atomic,
        server: DepotServer::from("localhost:1666"),
        workspace: DepotWorkspace::from("ws"),
        user: DepotUser::from("alice"),
        context: ExecutionContext {
            identity: Identity::from("alice"),
        },
        ..Default::default()
    }
}

fn store(root: &Path) -> PopulateStore {
    PopulateStore::load(root).expect("load store")
}

#[test]
fn virtual_sync_installs_zero_byte_placeholders() {
    let rig = rig();
    rig.factory.add_file("//depot/proj/a.txt", b"alpha contents");
    rig.factory.add_file("//depot/proj/b.txt", b"beta contents");

    let result = rig
        .orchestrator
        .sync(&options(&["//depot/proj/..."], SyncMethod::Virtual), &NullProgress)
        .expect("sync");

    assert_eq!(result.status, SyncStatus::Success);
    assert_eq!(result.modifications.len(), 2);
    assert!(result
        .modifications
        .iter()
        .all(|m| m.action == SyncAction::Added));

    let local = rig.root.path().join("proj/a.txt");
    assert_eq!(fs::read(&local).expect("read").len(), 0);

    let store = store(rig.root.path());
    let info = store.get("proj/a.txt").expect("entry");
    assert_eq!(info.revision, 1);
    assert_eq!(info.file_size, b"alpha contents".len() as u64);
    assert_eq!(file_state(&local, &store, "proj/a.txt"), FileState::Virtual);

    // Have-revisions were recorded without any content transfer.
    assert_eq!(rig.factory.recorded_have("ws", "//depot/proj/a.txt"), Some(1));
}

#[test]
fn repeating_a_sync_is_a_no_op() {
    let rig = rig();
    rig.factory.add_file("//depot/proj/a.txt", b"alpha");
    let opts = options(&["//depot/proj/a.txt"], SyncMethod::Virtual);

    rig.orchestrator.sync(&opts, &NullProgress).expect("first");
    let second = rig.orchestrator.sync(&opts, &NullProgress).expect("second");

    assert_eq!(second.modifications.len(), 1);
    assert_eq!(second.modifications[0].action, SyncAction::UpToDate);
}

#[test]
fn regular_sync_writes_full_content() {
    let rig = rig();
    rig.factory.add_file("//depot/proj/a.txt", b"alpha contents");

    let result = rig
        .orchestrator
        .sync(&options(&["//depot/proj/a.txt"], SyncMethod::Regular), &NullProgress)
        .expect("sync");

    assert!(result.succeeded());
    let local = rig.root.path().join("proj/a.txt");
    assert_eq!(fs::read(&local).expect("read"), b"alpha contents");
    assert!(store(rig.root.path()).is_empty());
}

#[test]
fn always_resident_pattern_overrides_virtual() {
    let rig = rig();
    rig.factory.add_file("//depot/proj/code.rs", b"fn main() {}");
    rig.factory.add_file("//depot/proj/asset.bin", b"binary blob");

    let mut opts = options(&["//depot/proj/..."], SyncMethod::Virtual);
    opts.always_resident = Some(r"\.rs$".to_string());
    rig.orchestrator.sync(&opts, &NullProgress).expect("sync");

    assert_eq!(
        fs::read(rig.root.path().join("proj/code.rs")).expect("read"),
        b"fn main() {}"
    );
    assert_eq!(
        fs::read(rig.root.path().join("proj/asset.bin")).expect("read").len(),
        0
    );
    let store = store(rig.root.path());
    assert!(store.get("proj/code.rs").is_none());
    assert!(store.get("proj/asset.bin").is_some());
}

#[test]
fn small_files_under_the_size_threshold_sync_resident() {
    let rig = rig();
    rig.factory.add_file("//depot/proj/tiny.txt", b"hi");
    rig.factory
        .add_file("//depot/proj/large.txt", vec![b'x'; 4096].as_slice());

    let mut opts = options(&["//depot/proj/..."], SyncMethod::Virtual);
    opts.client_size = Some(16);
    rig.orchestrator.sync(&opts, &NullProgress).expect("sync");

    assert_eq!(fs::read(rig.root.path().join("proj/tiny.txt")).expect("read"), b"hi");
    let store = store(rig.root.path());
    assert!(store.get("proj/tiny.txt").is_none());
    assert!(store.get("proj/large.txt").is_some());
}

#[test]
fn per_file_errors_do_not_abort_the_batch() {
    let rig = rig();
    rig.factory.add_file("//depot/proj/ok.txt", b"fine");

    let result = rig
        .orchestrator
        .sync(
            &options(
                &["//depot/missing.txt", "//depot/proj/ok.txt"],
                SyncMethod::Virtual,
            ),
            &NullProgress,
        )
        .expect("sync");

    assert_eq!(result.status, SyncStatus::Error);
    assert_eq!(result.modifications.len(), 2);
    // Input-spec order is preserved even for settled errors.
    assert_eq!(result.modifications[0].action, SyncAction::NoSuchFile);
    assert_eq!(result.modifications[1].action, SyncAction::Added);
    assert!(rig.root.path().join("proj/ok.txt").exists());
}

#[test]
fn denied_files_report_permission_errors() {
    let rig = rig();
    rig.factory.add_file("//depot/secret/key.txt", b"hunter2");
    rig.factory.deny("//depot/secret/", "mallory");

    let mut opts = options(&["//depot/secret/key.txt"], SyncMethod::Regular);
    opts.user = DepotUser::from("mallory");
    opts.context.identity = Identity::from("mallory");

    let result = rig.orchestrator.sync(&opts, &NullProgress).expect("sync");
    assert_eq!(result.status, SyncStatus::Error);
    assert_eq!(result.modifications[0].action, SyncAction::PermissionDenied);
    assert!(!rig.root.path().join("secret/key.txt").exists());
}

#[test]
fn deleted_depot_files_are_removed_locally() {
    let rig = rig();
    rig.factory.add_file("//depot/proj/gone.txt", b"data");

    let opts = options(&["//depot/proj/gone.txt"], SyncMethod::Virtual);
    rig.orchestrator.sync(&opts, &NullProgress).expect("first");
    assert!(rig.root.path().join("proj/gone.txt").exists());

    rig.factory.delete_file("//depot/proj/gone.txt");
    let result = rig.orchestrator.sync(&opts, &NullProgress).expect("second");

    assert_eq!(result.modifications[0].action, SyncAction::Deleted);
    assert!(!rig.root.path().join("proj/gone.txt").exists());
    assert!(store(rig.root.path()).is_empty());
}

#[test]
fn preview_reports_without_touching_anything() {
    let rig = rig();
    rig.factory.add_file("//depot/proj/a.txt", b"alpha");

    let mut opts = options(&["//depot/proj/a.txt"], SyncMethod::Virtual);
    opts.flags.preview = true;
    let result = rig.orchestrator.sync(&opts, &NullProgress).expect("sync");

    assert_eq!(result.modifications[0].action, SyncAction::Added);
    assert!(!rig.root.path().join("proj/a.txt").exists());
    assert!(store(rig.root.path()).is_empty());
    assert_eq!(rig.factory.recorded_have("ws", "//depot/proj/a.txt"), None);
}

#[test]
fn flush_only_records_have_without_writing_files() {
    let rig = rig();
    rig.factory.add_file("//depot/proj/a.txt", b"alpha");

    let mut opts = options(&["//depot/proj/a.txt"], SyncMethod::Virtual);
    opts.flags.flush_only = true;
    let result = rig.orchestrator.sync(&opts, &NullProgress).expect("sync");

    assert!(result.succeeded());
    assert!(!rig.root.path().join("proj/a.txt").exists());
    assert_eq!(rig.factory.recorded_have("ws", "//depot/proj/a.txt"), Some(1));
}

#[test]
fn single_flush_batches_have_updates() {
    let rig = rig();
    for index in 0..8 {
        rig.factory
            .add_file(&format!("//depot/proj/f{index}.txt"), b"data");
    }
    let mut opts = options(&["//depot/proj/..."], SyncMethod::Virtual);
    opts.flush = FlushType::Single;

    let result = rig.orchestrator.sync(&opts, &NullProgress).expect("sync");
    assert!(result.succeeded());
    for index in 0..8 {
        assert_eq!(
            rig.factory
                .recorded_have("ws", &format!("//depot/proj/f{index}.txt")),
            Some(1)
        );
    }
}

#[test]
fn foreign_local_files_are_not_clobbered_by_default() {
    let rig = rig();
    rig.factory.add_file("//depot/proj/a.txt", b"depot copy");
    let local = rig.root.path().join("proj/a.txt");
    fs::create_dir_all(local.parent().expect("parent")).expect("mkdir");
    fs::write(&local, b"precious local work").expect("write");

    let opts = options(&["//depot/proj/a.txt"], SyncMethod::Regular);
    let result = rig.orchestrator.sync(&opts, &NullProgress).expect("sync");
    assert_eq!(result.status, SyncStatus::Error);
    assert_eq!(result.modifications[0].action, SyncAction::GenericError);
    assert_eq!(fs::read(&local).expect("read"), b"precious local work");

    let mut clobber = options(&["//depot/proj/a.txt"], SyncMethod::Regular);
    clobber.flags.clobber_writable = true;
    let result = rig.orchestrator.sync(&clobber, &NullProgress).expect("sync");
    assert!(result.succeeded());
    assert_eq!(fs::read(&local).expect("read"), b"depot copy");
}

#[test]
fn interrupted_resync_skips_already_flushed_files() {
    // 136 files; 50 were synced before the interruption. The rerun reports
    // exactly those 50 up to date and transfers the remaining 86.
    let rig = rig();
    for index in 0..136 {
        rig.factory
            .add_file(&format!("//depot/big/f{index:03}.txt"), b"payload");
    }

    let first: Vec<String> = (0..50)
        .map(|index| format!("//depot/big/f{index:03}.txt"))
        .collect();
    let first_refs: Vec<&str> = first.iter().map(String::as_str).collect();
    rig.orchestrator
        .sync(&options(&first_refs, SyncMethod::Virtual), &NullProgress)
        .expect("partial sync");

    let result = rig
        .orchestrator
        .sync(&options(&["//depot/big/..."], SyncMethod::Virtual), &NullProgress)
        .expect("resync");

    assert!(result.succeeded());
    assert_eq!(result.modifications.len(), 136);
    let up_to_date = result
        .modifications
        .iter()
        .filter(|m| m.action == SyncAction::UpToDate)
        .count();
    let added = result
        .modifications
        .iter()
        .filter(|m| m.action == SyncAction::Added)
        .count();
    assert_eq!(up_to_date, 50);
    assert_eq!(added, 86);
}

#[test]
fn make_resident_hydrates_matching_placeholders() {
    let rig = rig();
    rig.factory.add_file("//depot/proj/a.txt", b"alpha contents");
    rig.factory.add_file("//depot/proj/b.bin", b"binary blob");

    let opts = options(&["//depot/proj/..."], SyncMethod::Virtual);
    rig.orchestrator.sync(&opts, &NullProgress).expect("sync");

    let result = rig
        .orchestrator
        .make_resident(&opts, r"\.txt$", &NullProgress)
        .expect("resident");

    assert!(result.succeeded());
    assert_eq!(result.modifications.len(), 1);
    assert_eq!(
        fs::read(rig.root.path().join("proj/a.txt")).expect("read"),
        b"alpha contents"
    );
    // The unmatched placeholder is untouched.
    let store = store(rig.root.path());
    assert!(store.get("proj/a.txt").is_none());
    assert!(store.get("proj/b.bin").is_some());
}

#[test]
fn make_resident_without_matches_reports_up_to_date() {
    let rig = rig();
    let opts = options(&[], SyncMethod::Virtual);
    let result = rig
        .orchestrator
        .make_resident(&opts, r"\.nothing$", &NullProgress)
        .expect("resident");
    assert!(result.succeeded());
    assert_eq!(result.modifications[0].action, SyncAction::UpToDate);
}

#[test]
fn reconfigure_rebinds_placeholders_idempotently() {
    let rig = rig();
    rig.factory.add_file("//depot/proj/a.txt", b"alpha");

    let opts = options(&["//depot/proj/a.txt"], SyncMethod::Virtual);
    rig.orchestrator.sync(&opts, &NullProgress).expect("sync");

    let target = ReconfigureTarget {
        server: Some(DepotServer::from("mirror:1666")),
        client: None,
        user: Some(DepotUser::from("build")),
    };
    let first = rig
        .orchestrator
        .reconfigure(&opts, &target, None, &NullProgress)
        .expect("reconfigure");
    assert_eq!(first.modifications[0].action, SyncAction::Updated);

    let store = store(rig.root.path());
    let info = store.get("proj/a.txt").expect("entry");
    assert_eq!(info.server, DepotServer::from("mirror:1666"));
    assert_eq!(info.user, DepotUser::from("build"));
    assert_eq!(info.client, DepotWorkspace::from("ws"));

    let second = rig
        .orchestrator
        .reconfigure(&opts, &target, None, &NullProgress)
        .expect("reconfigure again");
    assert_eq!(second.modifications[0].action, SyncAction::UpToDate);
}

#[test]
fn busy_files_settle_as_busy_and_keep_their_bytes() {
    use fs2::FileExt;

    let rig = rig();
    rig.factory.add_file("//depot/proj/held.txt", b"new bytes");
    let local = rig.root.path().join("proj/held.txt");

    // Sync once so the file exists and is known, then pin it down.
    rig.orchestrator
        .sync(&options(&["//depot/proj/held.txt"], SyncMethod::Regular), &NullProgress)
        .expect("seed");
    rig.factory.add_file("//depot/proj/held.txt", b"rev two bytes");

    let holder = fs::File::open(&local).expect("open");
    holder.lock_exclusive().expect("lock");

    let cache = Arc::new(ConnectionCache::new(Arc::new(rig.factory.clone())));
    let identities = Arc::new(IdentityContext::new(Identity::from("service")));
    let fast = SyncTunables {
        max_connections: 2,
        rename: hollow_sync::RenameTunables {
            max_attempts: 2,
            wait: std::time::Duration::from_millis(5),
        },
    };
    let orchestrator = SyncOrchestrator::new(cache, identities, fast);

    let result = orchestrator
        .sync(&options(&["//depot/proj/held.txt"], SyncMethod::Regular), &NullProgress)
        .expect("sync");
    assert_eq!(result.status, SyncStatus::Error);
    assert_eq!(result.modifications[0].action, SyncAction::Busy);
    assert_eq!(fs::read(&local).expect("read"), b"new bytes");

    fs2::FileExt::unlock(&holder).expect("unlock");
    let result = orchestrator
        .sync(&options(&["//depot/proj/held.txt"], SyncMethod::Regular), &NullProgress)
        .expect("retry");
    assert!(result.succeeded());
    assert_eq!(fs::read(&local).expect("read"), b"rev two bytes");
}

#[test]
fn ignore_output_drops_the_modification_list() {
    let rig = rig();
    rig.factory.add_file("//depot/proj/a.txt", b"alpha");

    let mut opts = options(&["//depot/proj/a.txt"], SyncMethod::Virtual);
    opts.flags.ignore_output = true;
    let result = rig.orchestrator.sync(&opts, &NullProgress).expect("sync");

    assert!(result.succeeded());
    assert!(result.modifications.is_empty());
    assert!(rig.root.path().join("proj/a.txt").exists());
}

#[test]
fn an_install_interrupted_before_the_swap_completes_on_rerun() {
    // The populate entry is persisted before the placeholder swap, so an
    // interrupt between the two leaves an entry with no file on disk and no
    // have-record. Running the same request again must finish the install.
    let rig = rig();
    rig.factory.add_file("//depot/proj/a.txt", b"alpha");

    let mut seeded = store(rig.root.path());
    seeded.insert(
        "proj/a.txt".to_string(),
        FilePopulateInfo {
            depot_path: "//depot/proj/a.txt".to_string(),
            server: DepotServer::from("localhost:1666"),
            client: DepotWorkspace::from("ws"),
            user: DepotUser::from("alice"),
            revision: 1,
            file_size: 5,
        },
    );
    seeded.save().expect("save");

    let result = rig
        .orchestrator
        .sync(&options(&["//depot/proj/a.txt"], SyncMethod::Virtual), &NullProgress)
        .expect("sync");
    assert!(result.succeeded());
    assert_eq!(result.modifications[0].action, SyncAction::Added);

    let local = rig.root.path().join("proj/a.txt");
    assert_eq!(fs::read(&local).expect("read").len(), 0);
    assert_eq!(rig.factory.recorded_have("ws", "//depot/proj/a.txt"), Some(1));
    assert_eq!(
        file_state(&local, &store(rig.root.path()), "proj/a.txt"),
        FileState::Virtual
    );
}

#[test]
fn readers_never_observe_partial_content_during_hydration() {
    use std::sync::atomic::{AtomicBool, Ordering};

    let rig = rig();
    let expected = vec![b'h'; 256 * 1024];
    rig.factory.add_file("//depot/proj/big.bin", &expected);

    let opts = options(&["//depot/proj/big.bin"], SyncMethod::Virtual);
    rig.orchestrator.sync(&opts, &NullProgress).expect("sync");
    let local = rig.root.path().join("proj/big.bin");
    assert_eq!(fs::read(&local).expect("read").len(), 0);

    // Hydration goes through a sibling temp file and a rename, so a reader
    // sees either the empty placeholder or the full content, never a prefix.
    let stop = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let local = local.clone();
            let stop = Arc::clone(&stop);
            let expected = expected.clone();
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    let bytes = fs::read(&local).expect("read");
                    assert!(
                        bytes.is_empty() || bytes == expected,
                        "saw {} of {} bytes",
                        bytes.len(),
                        expected.len()
                    );
                }
            })
        })
        .collect();

    let result = rig
        .orchestrator
        .make_resident(&opts, r"big\.bin$", &NullProgress)
        .expect("resident");
    stop.store(true, Ordering::Relaxed);
    for reader in readers {
        reader.join().expect("reader thread");
    }

    assert!(result.succeeded());
    assert_eq!(fs::read(&local).expect("read"), expected);
    assert!(store(rig.root.path()).get("proj/big.bin").is_none());
}

#[test]
fn revision_pins_sync_older_content() {
    let rig = rig();
    rig.factory.add_file("//depot/proj/a.txt", b"one");
    rig.factory.add_file("//depot/proj/a.txt", b"two");

    let result = rig
        .orchestrator
        .sync(&options(&["//depot/proj/a.txt#1"], SyncMethod::Regular), &NullProgress)
        .expect("sync");
    assert!(result.succeeded());
    assert_eq!(result.modifications[0].revision, Some(1));
    assert_eq!(
        fs::read(rig.root.path().join("proj/a.txt")).expect("read"),
        b"one"
    );
}

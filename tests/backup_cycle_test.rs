//! Backup cycle integration tests
//!
//! Real tar.gz archives of directories on disk, uploaded to a local
//! filesystem store, driven through several cycles with a simulated clock.

use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::io::Read;
use std::time::Duration;
use volsnap::archive::TarGzArchiver;
use volsnap::backup::{BackupCycle, SkipCause};
use volsnap::clock::SimulatedClock;
use volsnap::config::{BackupConfig, RetryConfig};
use volsnap::io::SimulatedRng;
use volsnap::rotation::{ArchiveKind, ArchiveName, KeyLayout, PlannedOperation};
use volsnap::storage::{
    InMemoryObjectStore, LocalFsObjectStore, ObjectStore, SimulatedObjectStore,
    SimulatedStoreConfig,
};

// 2021-01-01T00:00:00Z
const START_MS: u64 = 1_609_459_200_000;
const DAY: Duration = Duration::from_secs(24 * 3600);

struct Dirs {
    host: tempfile::TempDir,
    scratch: tempfile::TempDir,
    store: tempfile::TempDir,
}

impl Dirs {
    fn new() -> Self {
        Dirs {
            host: tempfile::tempdir().unwrap(),
            scratch: tempfile::tempdir().unwrap(),
            store: tempfile::tempdir().unwrap(),
        }
    }

    fn add_volume(&self, name: &str, files: &[(&str, &str)]) {
        for (path, contents) in files {
            let full = self.host.path().join(name).join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, contents).unwrap();
        }
    }

    fn config(&self, volumes: &[&str], backup_interval: u32) -> BackupConfig {
        let mut config = BackupConfig::local(
            self.store.path().to_path_buf(),
            self.host.path().to_path_buf(),
            self.scratch.path().to_path_buf(),
        );
        config.directory_prefix = "backups".to_string();
        config.volumes = volumes.iter().map(|s| s.to_string()).collect();
        config.backup_interval = backup_interval;
        config.retry = RetryConfig::test();
        config.validate().unwrap();
        config
    }

    fn archiver(&self) -> TarGzArchiver {
        TarGzArchiver::new(self.host.path().to_path_buf(), self.scratch.path().to_path_buf())
    }
}

fn local_cycle(
    dirs: &Dirs,
    volumes: &[&str],
    backup_interval: u32,
) -> (
    LocalFsObjectStore,
    SimulatedClock,
    BackupCycle<LocalFsObjectStore, TarGzArchiver, SimulatedClock, SimulatedRng>,
) {
    let config = dirs.config(volumes, backup_interval);
    let store = LocalFsObjectStore::new(dirs.store.path().to_path_buf());
    let clock = SimulatedClock::new(START_MS);
    let cycle = BackupCycle::new(
        &config,
        store.clone(),
        dirs.archiver(),
        clock.clone(),
        SimulatedRng::new(42),
    );
    (store, clock, cycle)
}

async fn archives<S: ObjectStore>(store: &S, volume: &str) -> Vec<ArchiveName> {
    let layout = KeyLayout::new("backups");
    let listing = store.list(&layout.volume_prefix(volume), None).await.unwrap();
    listing
        .objects
        .iter()
        .filter_map(|meta| layout.parse(&meta.key))
        .collect()
}

fn unpack(data: &[u8]) -> HashMap<String, String> {
    let mut archive = tar::Archive::new(GzDecoder::new(data));
    let mut files = HashMap::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path().unwrap().to_string_lossy().into_owned();
        let mut contents = String::new();
        entry.read_to_string(&mut contents).unwrap();
        files.insert(path, contents);
    }
    files
}

fn count(names: &[ArchiveName], kind: ArchiveKind) -> usize {
    names.iter().filter(|n| n.kind == kind).count()
}

#[tokio::test]
async fn test_uploaded_snapshot_contains_volume_files() {
    let dirs = Dirs::new();
    dirs.add_volume("db", &[("data.txt", "hello"), ("sub/nested.txt", "world")]);
    let (store, _clock, mut cycle) = local_cycle(&dirs, &["db"], 3);

    let report = cycle.run_once().await.unwrap();
    assert_eq!(report.processed, vec!["db"]);
    assert!(report.is_clean());
    assert!(report.uploaded_bytes > 0);

    let names = archives(&store, "db").await;
    assert_eq!(names.len(), 1);
    assert_eq!(names[0].kind, ArchiveKind::Snapshot);
    assert_eq!(names[0].num, 1);
    assert_eq!(names[0].timestamp, "20210101T000000Z");

    let key = KeyLayout::new("backups").snapshot_key("db", &names[0].snapshot_id, 1, volsnap::Timestamp(START_MS));
    let files = unpack(&store.get(&key).await.unwrap());
    assert_eq!(files.get("db/data.txt").map(String::as_str), Some("hello"));
    assert_eq!(files.get("db/sub/nested.txt").map(String::as_str), Some("world"));

    // Staged archive removed
    assert!(!dirs.scratch.path().join("db.tar.gz").exists());
}

#[tokio::test]
async fn test_rotation_and_promotion_on_disk() {
    let dirs = Dirs::new();
    dirs.add_volume("db", &[("data.txt", "v1")]);
    let (store, clock, mut cycle) = local_cycle(&dirs, &["db"], 3);

    let mut first_id = String::new();
    for expected_num in 1..=3u32 {
        cycle.run_once().await.unwrap();
        let names = archives(&store, "db").await;
        assert_eq!(names.len(), 1, "one live snapshot after cycle {}", expected_num);
        assert_eq!(names[0].num, expected_num);
        if expected_num == 1 {
            first_id = names[0].snapshot_id.clone();
        } else {
            assert_eq!(names[0].snapshot_id, first_id);
        }
        clock.advance(DAY);
    }

    let report = cycle.run_once().await.unwrap();
    assert_eq!(report.promotions, 1);
    assert!(report.failed_operations.is_empty());

    let names = archives(&store, "db").await;
    assert_eq!(count(&names, ArchiveKind::Backup), 1);
    assert_eq!(count(&names, ArchiveKind::Snapshot), 1);

    let backup = names.iter().find(|n| n.kind == ArchiveKind::Backup).unwrap();
    assert_eq!(backup.snapshot_id, first_id);
    assert_eq!(backup.num, 3);
    assert_eq!(backup.timestamp, "20210104T000000Z");

    let snapshot = names.iter().find(|n| n.kind == ArchiveKind::Snapshot).unwrap();
    assert_ne!(snapshot.snapshot_id, first_id);
    assert_eq!(snapshot.num, 1);

    let doc = cycle.metadata().load().await.unwrap();
    let state = doc.get("db").unwrap();
    assert_eq!(state.current_snapshot_id, snapshot.snapshot_id);
    assert_eq!(state.snapshot_num, 1);
}

#[tokio::test]
async fn test_missing_volume_skipped_others_proceed() {
    let dirs = Dirs::new();
    dirs.add_volume("db", &[("data.txt", "x")]);
    let (store, _clock, mut cycle) = local_cycle(&dirs, &["ghost", "db"], 3);

    let report = cycle.run_once().await.unwrap();
    assert_eq!(report.processed, vec!["db"]);
    assert_eq!(report.skipped, vec![("ghost".to_string(), SkipCause::MissingOnHost)]);

    let doc = cycle.metadata().load().await.unwrap();
    assert!(doc.get("ghost").is_none());
    assert!(archives(&store, "ghost").await.is_empty());
    assert_eq!(archives(&store, "db").await.len(), 1);
}

#[tokio::test]
async fn test_volume_that_disappears_keeps_its_state() {
    let dirs = Dirs::new();
    dirs.add_volume("db", &[("data.txt", "x")]);
    let (store, clock, mut cycle) = local_cycle(&dirs, &["db"], 5);

    cycle.run_once().await.unwrap();
    let before = cycle.metadata().load().await.unwrap();
    clock.advance(DAY);

    std::fs::remove_dir_all(dirs.host.path().join("db")).unwrap();
    let report = cycle.run_once().await.unwrap();
    assert!(report.processed.is_empty());
    assert_eq!(report.skipped, vec![("db".to_string(), SkipCause::MissingOnHost)]);
    assert_eq!(cycle.metadata().load().await.unwrap(), before);
    clock.advance(DAY);

    dirs.add_volume("db", &[("data.txt", "back")]);
    cycle.run_once().await.unwrap();
    let after = cycle.metadata().load().await.unwrap();
    let state = after.get("db").unwrap();
    assert_eq!(state.snapshot_num, 2);
    assert_eq!(
        state.current_snapshot_id,
        before.get("db").unwrap().current_snapshot_id
    );

    let names = archives(&store, "db").await;
    assert_eq!(names.len(), 1);
    assert_eq!(names[0].num, 2);
}

#[tokio::test]
async fn test_state_persisted_when_promotion_fails() {
    let dirs = Dirs::new();
    dirs.add_volume("db", &[("data.txt", "x")]);
    let config = dirs.config(&["db"], 1);

    let store = SimulatedObjectStore::new(
        InMemoryObjectStore::new(),
        SimulatedRng::new(9),
        SimulatedStoreConfig {
            copy_fail_prob: 1.0,
            ..SimulatedStoreConfig::no_faults()
        },
    );
    let clock = SimulatedClock::new(START_MS);
    let mut cycle = BackupCycle::new(
        &config,
        store.clone(),
        dirs.archiver(),
        clock.clone(),
        SimulatedRng::new(42),
    );

    cycle.run_once().await.unwrap();
    let first_id = cycle
        .metadata()
        .load()
        .await
        .unwrap()
        .get("db")
        .unwrap()
        .current_snapshot_id
        .clone();
    clock.advance(DAY);

    let report = cycle.run_once().await.unwrap();
    assert_eq!(report.promotions, 0);
    assert_eq!(report.failed_operations.len(), 1);
    assert!(matches!(
        report.failed_operations[0].operation,
        PlannedOperation::Promote { .. }
    ));

    // The rollover is persisted even though the copy never happened
    let doc = cycle.metadata().load().await.unwrap();
    let state = doc.get("db").unwrap();
    assert_ne!(state.current_snapshot_id, first_id);
    assert_eq!(state.snapshot_num, 1);

    // The old snapshot survives because it was never copied
    let names = archives(store.inner(), "db").await;
    assert_eq!(count(&names, ArchiveKind::Backup), 0);
    assert_eq!(count(&names, ArchiveKind::Snapshot), 2);
    assert!(names.iter().any(|n| n.snapshot_id == first_id));
}

//! Deterministic Simulation Testing for snapshot rotation
//!
//! Runs many backup cycles against a fault-injecting object store and a
//! simulated archiver, all driven from one seed. After every cycle the
//! stored metafile is read back (bypassing fault injection) and compared
//! against a shadow model of the rotation state.
//!
//! ## Invariants Checked
//!
//! 1. The metafile always parses and validates
//! 2. `snapshot_num` stays within `[1, backup_interval]`
//! 3. A volume advances by exactly one step per successful cycle, and only
//!    when it was archived; a failed cycle leaves the metafile untouched
//! 4. Volumes absent from the host never get an entry or any object
//! 5. Every stored archive key parses under the key layout
//! 6. Fault-free runs only: exactly one live snapshot per volume, matching
//!    the metafile, and one backup per promotion

use crate::archive::SimulatedArchiver;
use crate::backup::cycle::{BackupCycle, CycleError, CycleReport, SkipCause};
use crate::clock::SimulatedClock;
use crate::config::BackupConfig;
use crate::io::simulation::SimulatedRng;
use crate::rotation::{ArchiveKind, KeyLayout, MetadataDocument, MetadataStore};
use crate::storage::{
    InMemoryObjectStore, ObjectStore, SimulatedObjectStore, SimulatedStoreConfig,
    SimulatedStoreStats,
};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

// 2021-01-01T00:00:00Z
const DST_START_MS: u64 = 1_609_459_200_000;
const DST_PREFIX: &str = "dst";

static HARNESS_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Configuration for a rotation DST run
#[derive(Debug, Clone)]
pub struct RotationDSTConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Fault injection for the object store
    pub store_config: SimulatedStoreConfig,
    pub backup_interval: u32,
    /// Volumes present on the simulated host
    pub volumes: Vec<String>,
    /// Volumes requested but never present
    pub ghost_volumes: Vec<String>,
    /// Probability that archiving a volume fails
    pub archive_fail_prob: f64,
    /// Simulated time between cycles
    pub cycle_spacing: Duration,
}

impl Default for RotationDSTConfig {
    fn default() -> Self {
        RotationDSTConfig {
            seed: 0,
            store_config: SimulatedStoreConfig::default(),
            backup_interval: 3,
            volumes: vec![
                "app-data".to_string(),
                "db-data".to_string(),
                "media".to_string(),
            ],
            ghost_volumes: vec!["retired".to_string()],
            archive_fail_prob: 0.02,
            cycle_spacing: Duration::from_secs(24 * 3600),
        }
    }
}

impl RotationDSTConfig {
    pub fn new(seed: u64) -> Self {
        RotationDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// No faults anywhere
    pub fn calm(seed: u64) -> Self {
        RotationDSTConfig {
            seed,
            store_config: SimulatedStoreConfig::no_faults(),
            archive_fail_prob: 0.0,
            ..Default::default()
        }
    }

    /// Default store fault rates
    pub fn moderate(seed: u64) -> Self {
        Self::new(seed)
    }

    /// High fault rates and a short interval so promotions happen often
    pub fn chaos(seed: u64) -> Self {
        RotationDSTConfig {
            seed,
            store_config: SimulatedStoreConfig::high_chaos(),
            backup_interval: 2,
            archive_fail_prob: 0.05,
            ..Default::default()
        }
    }

    fn is_fault_free(&self) -> bool {
        let s = &self.store_config;
        self.archive_fail_prob <= 0.0
            && s.put_fail_prob <= 0.0
            && s.get_fail_prob <= 0.0
            && s.get_corrupt_prob <= 0.0
            && s.timeout_prob <= 0.0
            && s.delete_fail_prob <= 0.0
            && s.copy_fail_prob <= 0.0
            && s.list_incomplete_prob <= 0.0
    }
}

/// Result of a DST run
#[derive(Debug, Clone)]
pub struct RotationDSTResult {
    /// Seed used
    pub seed: u64,
    pub cycles_run: u64,
    /// Cycles that ended with an error (expected under faults)
    pub cycles_failed: u64,
    /// Promotions recorded in the metafile
    pub promotions: u64,
    /// Planned operations that did not complete
    pub operations_failed: u64,
    pub archive_failures: u64,
    /// Store fault statistics
    pub store_stats: SimulatedStoreStats,
    /// Invariant violations found
    pub invariant_violations: Vec<String>,
}

impl RotationDSTResult {
    pub fn new(seed: u64) -> Self {
        RotationDSTResult {
            seed,
            cycles_run: 0,
            cycles_failed: 0,
            promotions: 0,
            operations_failed: 0,
            archive_failures: 0,
            store_stats: SimulatedStoreStats::default(),
            invariant_violations: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} cycles ({} failed), {} promotions, {} failed ops, {} archive failures, {} violations",
            self.seed,
            self.cycles_run,
            self.cycles_failed,
            self.promotions,
            self.operations_failed,
            self.archive_failures,
            self.invariant_violations.len()
        )
    }
}

/// Shadow copy of one volume's rotation state
#[derive(Debug, Clone)]
struct ModelVolume {
    snapshot_id: String,
    num: u32,
    promotions: u64,
}

/// Type alias for our simulated store
type DSTStore = SimulatedObjectStore<InMemoryObjectStore, SimulatedRng>;
type DSTCycle = BackupCycle<DSTStore, SimulatedArchiver<SimulatedRng>, SimulatedClock, SimulatedRng>;

/// Main DST harness for snapshot rotation
pub struct RotationDSTHarness {
    config: RotationDSTConfig,
    store: DSTStore,
    clock: SimulatedClock,
    cycle: DSTCycle,
    layout: KeyLayout,
    scratch_dir: PathBuf,
    model: HashMap<String, ModelVolume>,
    result: RotationDSTResult,
}

impl RotationDSTHarness {
    pub fn new(config: RotationDSTConfig) -> Self {
        let store = SimulatedObjectStore::new(
            InMemoryObjectStore::new(),
            SimulatedRng::new(config.seed.wrapping_add(1)), // Different seed for store
            config.store_config.clone(),
        );
        let clock = SimulatedClock::new(DST_START_MS);

        let scratch_dir = std::env::temp_dir().join(format!(
            "volsnap-dst-{}-{}-{}",
            std::process::id(),
            config.seed,
            HARNESS_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let archiver = SimulatedArchiver::new(
            scratch_dir.clone(),
            config.volumes.iter().cloned(),
            SimulatedRng::new(config.seed.wrapping_add(2)),
            config.archive_fail_prob,
        );

        let mut backup_config = BackupConfig::test();
        backup_config.directory_prefix = DST_PREFIX.to_string();
        backup_config.backup_interval = config.backup_interval;
        backup_config.volumes = config
            .volumes
            .iter()
            .chain(config.ghost_volumes.iter())
            .cloned()
            .collect();

        let cycle = BackupCycle::new(
            &backup_config,
            store.clone(),
            archiver,
            clock.clone(),
            SimulatedRng::new(config.seed),
        );

        RotationDSTHarness {
            result: RotationDSTResult::new(config.seed),
            layout: KeyLayout::new(DST_PREFIX),
            config,
            store,
            clock,
            cycle,
            scratch_dir,
            model: HashMap::new(),
        }
    }

    /// Run `cycles` backup cycles, checking invariants after each
    pub async fn run(&mut self, cycles: usize) {
        for _ in 0..cycles {
            let outcome = self.cycle.run_once().await;
            self.result.cycles_run += 1;
            self.check_cycle(&outcome).await;
            self.clock.advance(self.config.cycle_spacing);
        }
    }

    async fn check_cycle(&mut self, outcome: &Result<CycleReport, CycleError>) {
        let Some(stored) = self.read_stored_document().await else {
            return;
        };
        let cycle_no = self.result.cycles_run;

        for state in &stored.volumes {
            if state.snapshot_num < 1 || state.snapshot_num > self.config.backup_interval {
                self.violation(format!(
                    "cycle {}: '{}' has snapshot_num {} outside [1, {}]",
                    cycle_no, state.volume_name, state.snapshot_num, self.config.backup_interval
                ));
            }
            if !self.config.volumes.contains(&state.volume_name) {
                self.violation(format!(
                    "cycle {}: metafile has an entry for '{}' which is not on the host",
                    cycle_no, state.volume_name
                ));
            }
        }

        match outcome {
            Ok(report) => {
                self.result.operations_failed += report.failed_operations.len() as u64;
                self.check_ghosts_skipped(report);
                self.check_advance(&stored, &report.processed);
            }
            Err(_) => {
                self.result.cycles_failed += 1;
                self.check_advance(&stored, &[]);
            }
        }

        self.check_stored_keys().await;
    }

    /// Every volume in `processed` moved one step; everything else is as
    /// the model last saw it
    fn check_advance(&mut self, stored: &MetadataDocument, processed: &[String]) {
        let interval = self.config.backup_interval;
        let cycle_no = self.result.cycles_run;
        let mut violations = Vec::new();

        for volume in &self.config.volumes {
            let previous = self.model.get(volume).cloned();
            let current = stored.get(volume);

            if !processed.contains(volume) {
                let unchanged = match (&previous, current) {
                    (None, None) => true,
                    (Some(m), Some(s)) => m.snapshot_id == s.current_snapshot_id && m.num == s.snapshot_num,
                    _ => false,
                };
                if !unchanged {
                    violations.push(format!(
                        "cycle {}: '{}' changed without being processed ({:?} -> {:?})",
                        cycle_no, volume, previous, current
                    ));
                }
                continue;
            }

            let Some(current) = current else {
                violations.push(format!(
                    "cycle {}: '{}' processed but missing from metafile",
                    cycle_no, volume
                ));
                continue;
            };

            let next = match previous {
                None => {
                    if current.snapshot_num != 1 {
                        violations.push(format!(
                            "cycle {}: first snapshot of '{}' has num {}",
                            cycle_no, volume, current.snapshot_num
                        ));
                    }
                    ModelVolume {
                        snapshot_id: current.current_snapshot_id.clone(),
                        num: current.snapshot_num,
                        promotions: 0,
                    }
                }
                Some(m) if m.num < interval => {
                    if current.current_snapshot_id != m.snapshot_id || current.snapshot_num != m.num + 1 {
                        violations.push(format!(
                            "cycle {}: '{}' expected ({}, {}) got ({}, {})",
                            cycle_no,
                            volume,
                            m.snapshot_id,
                            m.num + 1,
                            current.current_snapshot_id,
                            current.snapshot_num
                        ));
                    }
                    ModelVolume {
                        num: current.snapshot_num,
                        ..m
                    }
                }
                Some(m) => {
                    if current.current_snapshot_id == m.snapshot_id || current.snapshot_num != 1 {
                        violations.push(format!(
                            "cycle {}: '{}' should have rolled over from ({}, {}) but is ({}, {})",
                            cycle_no,
                            volume,
                            m.snapshot_id,
                            m.num,
                            current.current_snapshot_id,
                            current.snapshot_num
                        ));
                    }
                    ModelVolume {
                        snapshot_id: current.current_snapshot_id.clone(),
                        num: current.snapshot_num,
                        promotions: m.promotions + 1,
                    }
                }
            };
            self.model.insert(volume.clone(), next);
        }

        for v in violations {
            self.violation(v);
        }
        self.result.promotions = self.model.values().map(|m| m.promotions).sum();
    }

    fn check_ghosts_skipped(&mut self, report: &CycleReport) {
        let unreported: Vec<String> = self
            .config
            .ghost_volumes
            .iter()
            .filter(|ghost| {
                !report
                    .skipped
                    .iter()
                    .any(|(v, cause)| v == *ghost && *cause == SkipCause::MissingOnHost)
            })
            .map(|ghost| {
                format!(
                    "cycle {}: ghost volume '{}' not reported as missing",
                    self.result.cycles_run, ghost
                )
            })
            .collect();
        for v in unreported {
            self.violation(v);
        }
    }

    async fn check_stored_keys(&mut self) {
        let keys = self.store.inner().keys();
        let metafile_key = self.layout.metafile_key();
        let cycle_no = self.result.cycles_run;
        let mut violations = Vec::new();
        let mut snapshots: HashMap<String, Vec<(String, u32)>> = HashMap::new();
        let mut backups: HashMap<String, u64> = HashMap::new();

        for key in keys.iter().filter(|k| **k != metafile_key) {
            let Some(name) = self.layout.parse(key) else {
                violations.push(format!("cycle {}: unparseable key {}", cycle_no, key));
                continue;
            };
            if self.config.ghost_volumes.contains(&name.volume) {
                violations.push(format!("cycle {}: object stored for ghost volume: {}", cycle_no, key));
            }
            match name.kind {
                ArchiveKind::Snapshot => snapshots
                    .entry(name.volume)
                    .or_default()
                    .push((name.snapshot_id, name.num)),
                ArchiveKind::Backup => *backups.entry(name.volume).or_default() += 1,
            }
        }

        if self.config.is_fault_free() {
            for (volume, model) in &self.model {
                let live = snapshots.get(volume).cloned().unwrap_or_default();
                if live != vec![(model.snapshot_id.clone(), model.num)] {
                    violations.push(format!(
                        "cycle {}: '{}' live snapshots {:?}, metafile says ({}, {})",
                        cycle_no, volume, live, model.snapshot_id, model.num
                    ));
                }
                let backup_count = backups.get(volume).copied().unwrap_or(0);
                if backup_count != model.promotions {
                    violations.push(format!(
                        "cycle {}: '{}' has {} backups after {} promotions",
                        cycle_no, volume, backup_count, model.promotions
                    ));
                }
            }
        }

        for v in violations {
            self.violation(v);
        }
    }

    /// Read the metafile straight from the backing store
    async fn read_stored_document(&mut self) -> Option<MetadataDocument> {
        let key = self.layout.metafile_key();
        match self.store.inner().get(&key).await {
            Ok(data) => match MetadataStore::<DSTStore>::decode(&data) {
                Ok(doc) => Some(doc),
                Err(e) => {
                    let msg = format!("cycle {}: stored metafile invalid: {}", self.result.cycles_run, e);
                    self.violation(msg);
                    None
                }
            },
            // The very first load may fail before the metafile is seeded
            Err(e) if e.kind() == ErrorKind::NotFound => Some(MetadataDocument::new()),
            Err(e) => {
                let msg = format!("cycle {}: backing store read failed: {}", self.result.cycles_run, e);
                self.violation(msg);
                None
            }
        }
    }

    fn violation(&mut self, message: String) {
        self.result.invariant_violations.push(message);
    }

    /// Keys currently in the backing store, sorted
    pub fn stored_keys(&self) -> Vec<String> {
        self.store.inner().keys()
    }

    /// Final bookkeeping; call once after `run`
    pub fn finish(&mut self) {
        self.result.store_stats = self.store.stats();
        self.result.archive_failures = self.cycle.archiver().failures();
    }

    /// Get the result
    pub fn result(&self) -> &RotationDSTResult {
        &self.result
    }

    /// Consume and return the result
    pub fn into_result(mut self) -> RotationDSTResult {
        self.finish();
        std::mem::replace(&mut self.result, RotationDSTResult::new(self.config.seed))
    }
}

impl Drop for RotationDSTHarness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.scratch_dir);
    }
}

/// Run a batch of DST tests with different seeds
pub async fn run_dst_batch(
    base_seed: u64,
    count: usize,
    cycles_per_run: usize,
    config_fn: impl Fn(u64) -> RotationDSTConfig,
) -> Vec<RotationDSTResult> {
    let mut results = Vec::with_capacity(count);

    for i in 0..count {
        let seed = base_seed + i as u64;
        let mut harness = RotationDSTHarness::new(config_fn(seed));
        harness.run(cycles_per_run).await;
        results.push(harness.into_result());
    }

    results
}

/// Summary of batch results
pub fn summarize_batch(results: &[RotationDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed_seeds: Vec<u64> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.seed)
        .collect();

    let total_cycles: u64 = results.iter().map(|r| r.cycles_run).sum();
    let failed_cycles: u64 = results.iter().map(|r| r.cycles_failed).sum();
    let total_promotions: u64 = results.iter().map(|r| r.promotions).sum();

    let mut summary = format!(
        "Batch: {}/{} passed, {} cycles ({} failed), {} promotions",
        passed, total, total_cycles, failed_cycles, total_promotions
    );

    if !failed_seeds.is_empty() {
        summary.push_str(&format!("\nFailed seeds: {:?}", failed_seeds));
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dst_harness_calm() {
        let mut harness = RotationDSTHarness::new(RotationDSTConfig::calm(42));
        harness.run(10).await;
        harness.finish();

        let result = harness.result();
        assert!(
            result.is_success(),
            "Calm mode should not have invariant violations: {}\n{:?}",
            result.summary(),
            result.invariant_violations
        );
        assert_eq!(result.cycles_failed, 0);
        // 3 volumes, interval 3, 10 cycles: rollovers at cycles 4, 7 and 10
        assert_eq!(result.promotions, 9);
    }

    #[tokio::test]
    async fn test_dst_harness_with_faults() {
        let mut harness = RotationDSTHarness::new(RotationDSTConfig::moderate(123));
        harness.run(30).await;

        let result = harness.into_result();
        assert!(
            result.is_success(),
            "{}\n{:?}",
            result.summary(),
            result.invariant_violations
        );
        assert_eq!(result.cycles_run, 30);
    }

    #[tokio::test]
    async fn test_dst_deterministic() {
        let seed = 12345;

        let mut first = RotationDSTHarness::new(RotationDSTConfig::chaos(seed));
        first.run(15).await;
        let keys1 = first.stored_keys();
        let result1 = first.into_result();

        let mut second = RotationDSTHarness::new(RotationDSTConfig::chaos(seed));
        second.run(15).await;
        let keys2 = second.stored_keys();
        let result2 = second.into_result();

        assert_eq!(keys1, keys2, "Same seed should produce the same store");
        assert_eq!(result1.cycles_failed, result2.cycles_failed);
        assert_eq!(result1.promotions, result2.promotions);
    }

    #[tokio::test]
    async fn test_interval_one_promotes_every_cycle() {
        let mut config = RotationDSTConfig::calm(7);
        config.backup_interval = 1;
        config.volumes = vec!["only".to_string()];
        config.ghost_volumes.clear();

        let mut harness = RotationDSTHarness::new(config);
        harness.run(5).await;
        let result = harness.into_result();

        assert!(result.is_success(), "{:?}", result.invariant_violations);
        assert_eq!(result.promotions, 4);
    }

    #[tokio::test]
    async fn test_dst_batch_calm() {
        let results = run_dst_batch(1000, 10, 12, RotationDSTConfig::calm).await;

        let summary = summarize_batch(&results);
        println!("{}", summary);

        assert!(
            results.iter().all(|r| r.is_success()),
            "All calm runs should pass: {}",
            summary
        );
    }
}

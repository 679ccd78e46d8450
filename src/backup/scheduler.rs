//! Cycle Scheduler
//!
//! Runs `BackupCycle::run_once` every `rotation_interval`. A cycle is always
//! awaited before the next tick is considered; ticks missed while a cycle
//! runs are skipped, never queued.

use crate::archive::Archiver;
use crate::backup::cycle::{BackupCycle, CycleError, CycleReport};
use crate::clock::Clock;
use crate::io::Rng;
use crate::storage::ObjectStore;
use std::future::Future;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

/// Counters kept across cycles
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    pub cycles_run: u64,
    pub cycles_failed: u64,
    pub total_uploaded_bytes: u64,
    pub total_promotions: u64,
}

impl SchedulerStats {
    fn record(&mut self, result: &Result<CycleReport, CycleError>) {
        self.cycles_run += 1;
        match result {
            Ok(report) => {
                self.total_uploaded_bytes += report.uploaded_bytes;
                self.total_promotions += report.promotions as u64;
            }
            Err(_) => self.cycles_failed += 1,
        }
    }
}

/// Drives cycles on a fixed interval
#[derive(Debug, Clone)]
pub struct Scheduler {
    rotation_interval: Duration,
    run_on_startup: bool,
}

impl Scheduler {
    pub fn new(rotation_interval: Duration, run_on_startup: bool) -> Self {
        debug_assert!(!rotation_interval.is_zero(), "rotation_interval must be positive");
        Scheduler {
            rotation_interval,
            run_on_startup,
        }
    }

    /// Run cycles until `shutdown` resolves
    ///
    /// A cycle in progress when shutdown is requested is allowed to finish.
    pub async fn run<S, A, C, R, F>(
        &self,
        cycle: &mut BackupCycle<S, A, C, R>,
        shutdown: F,
    ) -> SchedulerStats
    where
        S: ObjectStore + Clone,
        A: Archiver,
        C: Clock,
        R: Rng,
        F: Future<Output = ()>,
    {
        let mut stats = SchedulerStats::default();
        let start = if self.run_on_startup {
            Instant::now()
        } else {
            Instant::now() + self.rotation_interval
        };
        let mut ticker = interval_at(start, self.rotation_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::pin!(shutdown);
        info!(
            "Scheduler started: every {:?}, run on startup: {}",
            self.rotation_interval, self.run_on_startup
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping scheduler");
                    break;
                }
                _ = ticker.tick() => {
                    let result = cycle.run_once().await;
                    if let Err(e) = &result {
                        match e {
                            CycleError::Metadata(_) => error!("Backup cycle aborted: {}", e),
                            _ => warn!("Backup cycle failed: {}", e),
                        }
                    }
                    stats.record(&result);
                }
            }
        }

        info!(
            "Scheduler stopped after {} cycle(s), {} failed",
            stats.cycles_run, stats.cycles_failed
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::SimulatedArchiver;
    use crate::clock::SimulatedClock;
    use crate::config::BackupConfig;
    use crate::io::SimulatedRng;
    use crate::storage::InMemoryObjectStore;

    fn test_cycle(
        scratch: &std::path::Path,
    ) -> BackupCycle<InMemoryObjectStore, SimulatedArchiver<SimulatedRng>, SimulatedClock, SimulatedRng> {
        let mut config = BackupConfig::test();
        config.volumes = vec!["v".to_string()];
        let archiver = SimulatedArchiver::new(
            scratch.to_path_buf(),
            vec!["v".to_string()],
            SimulatedRng::new(1),
            0.0,
        );
        BackupCycle::new(
            &config,
            InMemoryObjectStore::new(),
            archiver,
            SimulatedClock::new(0),
            SimulatedRng::new(2),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_on_startup_and_each_interval() {
        let scratch = tempfile::tempdir().unwrap();
        let mut cycle = test_cycle(scratch.path());
        let scheduler = Scheduler::new(Duration::from_secs(60), true);

        let stats = scheduler
            .run(&mut cycle, tokio::time::sleep(Duration::from_secs(150)))
            .await;

        // t=0, t=60, t=120
        assert_eq!(stats.cycles_run, 3);
        assert_eq!(stats.cycles_failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_first_interval_without_startup_run() {
        let scratch = tempfile::tempdir().unwrap();
        let mut cycle = test_cycle(scratch.path());
        let scheduler = Scheduler::new(Duration::from_secs(60), false);

        let stats = scheduler
            .run(&mut cycle, tokio::time::sleep(Duration::from_secs(90)))
            .await;

        assert_eq!(stats.cycles_run, 1);
    }
}

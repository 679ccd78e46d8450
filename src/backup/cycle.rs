//! Backup Cycle
//!
//! One pass of the service:
//!
//! 1. List the volumes present on the host
//! 2. Load the metafile (a corrupt one aborts the cycle)
//! 3. Archive every requested volume that is present
//! 4. Plan with the rotation engine
//! 5. Execute the plan
//! 6. Persist the updated document, even if some operations failed
//! 7. Remove staged archives
//!
//! Volumes are processed sequentially and only one cycle runs at a time.

use crate::archive::{ArchiveArtifact, ArchiveError, Archiver};
use crate::backup::executor::{OperationOutcome, PlanExecutor};
use crate::clock::{Clock, Timestamp};
use crate::config::BackupConfig;
use crate::io::Rng;
use crate::rotation::{
    KeyLayout, MetadataDocument, MetadataError, MetadataStore, PlannedOperation, RotationEngine,
    SkipReason,
};
use crate::storage::ObjectStore;
use std::collections::{HashMap, HashSet};
use std::io::Error as IoError;
use std::time::Duration;
use tracing::{error, info, warn};

/// Error that ends a cycle early
#[derive(Debug)]
pub enum CycleError {
    /// Host volume listing failed
    Inventory(IoError),
    /// Metafile could not be loaded or saved
    Metadata(MetadataError),
    /// Cycle ran past its deadline
    DeadlineExceeded(Duration),
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleError::Inventory(e) => write!(f, "listing host volumes failed: {}", e),
            CycleError::Metadata(e) => write!(f, "metafile error: {}", e),
            CycleError::DeadlineExceeded(d) => write!(f, "cycle exceeded deadline of {:?}", d),
        }
    }
}

impl std::error::Error for CycleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CycleError::Inventory(e) => Some(e),
            CycleError::Metadata(e) => Some(e),
            CycleError::DeadlineExceeded(_) => None,
        }
    }
}

impl From<MetadataError> for CycleError {
    fn from(e: MetadataError) -> Self {
        CycleError::Metadata(e)
    }
}

/// Why a requested volume was not backed up this cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipCause {
    /// Requested but not present under the host volume root
    MissingOnHost,
    /// Present but the archive could not be produced
    ArchiveFailed(String),
    /// Requested more than once
    Duplicate,
}

/// A planned operation that did not complete
#[derive(Debug, Clone)]
pub struct FailedOperation {
    pub operation: PlannedOperation,
    pub error: String,
}

/// Summary of one cycle
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub started_at: Timestamp,
    /// Volumes whose rotation state advanced
    pub processed: Vec<String>,
    pub skipped: Vec<(String, SkipCause)>,
    pub failed_operations: Vec<FailedOperation>,
    /// Promotions that completed
    pub promotions: usize,
    pub uploaded_bytes: u64,
    pub objects_deleted: usize,
}

impl CycleReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.failed_operations.is_empty()
    }

    fn record(&mut self, outcome: OperationOutcome) {
        self.uploaded_bytes += outcome.bytes_uploaded;
        self.objects_deleted += outcome.objects_deleted;
        match outcome.error {
            None => {
                if matches!(outcome.operation, PlannedOperation::Promote { .. }) {
                    self.promotions += 1;
                }
            }
            Some(e) => self.failed_operations.push(FailedOperation {
                operation: outcome.operation,
                error: e.to_string(),
            }),
        }
    }
}

/// Wires inventory, archiving, planning, execution and persistence
pub struct BackupCycle<S, A, C, R>
where
    S: ObjectStore + Clone,
    A: Archiver,
    C: Clock,
    R: Rng,
{
    volumes: Vec<String>,
    engine: RotationEngine,
    metadata: MetadataStore<S>,
    executor: PlanExecutor<S>,
    archiver: A,
    clock: C,
    rng: R,
    cycle_deadline: Duration,
}

impl<S, A, C, R> BackupCycle<S, A, C, R>
where
    S: ObjectStore + Clone,
    A: Archiver,
    C: Clock,
    R: Rng,
{
    pub fn new(config: &BackupConfig, store: S, archiver: A, clock: C, rng: R) -> Self {
        let layout = KeyLayout::new(&config.directory_prefix);
        BackupCycle {
            volumes: config.volumes.clone(),
            engine: RotationEngine::new(config.backup_interval, layout.clone()),
            metadata: MetadataStore::new(store.clone(), &layout),
            executor: PlanExecutor::new(store, config.operation_timeout, config.retry.clone()),
            archiver,
            clock,
            rng,
            cycle_deadline: config.cycle_deadline,
        }
    }

    pub fn archiver(&self) -> &A {
        &self.archiver
    }

    pub fn metadata(&self) -> &MetadataStore<S> {
        &self.metadata
    }

    /// Run one cycle bounded by the cycle deadline
    pub async fn run_once(&mut self) -> Result<CycleReport, CycleError> {
        let deadline = self.cycle_deadline;
        match tokio::time::timeout(deadline, self.run_cycle()).await {
            Ok(result) => result,
            Err(_) => {
                error!("Backup cycle exceeded deadline of {:?}", deadline);
                Err(CycleError::DeadlineExceeded(deadline))
            }
        }
    }

    async fn run_cycle(&mut self) -> Result<CycleReport, CycleError> {
        let now = self.clock.now();
        let mut report = CycleReport {
            started_at: now,
            ..CycleReport::default()
        };
        info!("Starting backup cycle at {}", now);

        let on_host: HashSet<String> = self
            .archiver
            .available_volumes()
            .await
            .map_err(CycleError::Inventory)?
            .into_iter()
            .collect();
        let mut listing: Vec<&String> = on_host.iter().collect();
        listing.sort();
        info!("Contents of host volumes directory: {:?}", listing);

        let document = self.metadata.load().await?;

        let (artifacts, archive_failures) = self.archive_present(&on_host).await;
        let archived: HashSet<String> = artifacts.keys().cloned().collect();

        let outcome = self
            .engine
            .rotate(&document, &self.volumes, &archived, now, &mut self.rng);

        for skipped in &outcome.skipped {
            let cause = match skipped.reason {
                SkipReason::Duplicate => SkipCause::Duplicate,
                SkipReason::NotPresent => match archive_failures.get(&skipped.volume) {
                    Some(reason) => SkipCause::ArchiveFailed(reason.clone()),
                    None => SkipCause::MissingOnHost,
                },
            };
            report.skipped.push((skipped.volume.clone(), cause));
        }
        report.processed = Self::processed_volumes(&document, &outcome.document);

        for op_outcome in self.executor.execute(&outcome.plan, &artifacts).await {
            report.record(op_outcome);
        }

        let saved = self.metadata.save(&outcome.document).await;
        self.discard_artifacts(artifacts.values()).await;
        saved?;

        info!(
            "Backup cycle complete: {} processed, {} skipped, {} failed operation(s), {} promotion(s), {} bytes uploaded",
            report.processed.len(),
            report.skipped.len(),
            report.failed_operations.len(),
            report.promotions,
            report.uploaded_bytes
        );
        Ok(report)
    }

    /// Archive every requested volume found on the host
    ///
    /// Returns the staged artifacts and, for volumes that could not be
    /// archived, the reason.
    async fn archive_present(
        &self,
        on_host: &HashSet<String>,
    ) -> (HashMap<String, ArchiveArtifact>, HashMap<String, String>) {
        let mut artifacts = HashMap::new();
        let mut failures = HashMap::new();

        for volume in &self.volumes {
            if artifacts.contains_key(volume) || failures.contains_key(volume) {
                continue;
            }
            if !on_host.contains(volume) {
                error!("Volume '{}' is not in host's volume directory", volume);
                continue;
            }
            match self.archiver.archive(volume).await {
                Ok(artifact) => {
                    artifacts.insert(volume.clone(), artifact);
                }
                Err(e @ ArchiveError::SourceMissing(_)) => {
                    warn!("Volume '{}' disappeared before archiving: {}", volume, e);
                }
                Err(e) => {
                    error!("Failed to archive volume '{}': {}", volume, e);
                    failures.insert(volume.clone(), e.to_string());
                }
            }
        }

        (artifacts, failures)
    }

    /// Volumes whose entry changed between the loaded and planned documents
    fn processed_volumes(before: &MetadataDocument, after: &MetadataDocument) -> Vec<String> {
        after
            .volumes
            .iter()
            .filter(|v| before.get(&v.volume_name) != Some(*v))
            .map(|v| v.volume_name.clone())
            .collect()
    }

    async fn discard_artifacts<'a>(&self, artifacts: impl Iterator<Item = &'a ArchiveArtifact>) {
        for artifact in artifacts {
            self.archiver.discard(artifact).await;
        }
    }
}

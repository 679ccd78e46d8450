//! Plan Executor
//!
//! Carries out an `OperationPlan` against the object store. Every store
//! call runs under the per-operation timeout and is retried with
//! exponential backoff when the error looks transient. A failed operation
//! is logged and reported; later operations still run.

use crate::archive::ArchiveArtifact;
use crate::config::RetryConfig;
use crate::rotation::{OperationPlan, PlannedOperation};
use crate::storage::ObjectStore;
use std::collections::HashMap;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Why a planned operation did not complete
#[derive(Debug)]
pub enum ExecutionError {
    /// Store call failed after all attempts
    Store {
        step: &'static str,
        key: String,
        attempts: u32,
        source: IoError,
    },
    /// Promotion found no snapshot under the family prefix
    NothingToPromote { prefix: String },
    /// No archive was produced for the volume being uploaded
    MissingArtifact { volume: String },
    /// The staged archive could not be read
    ArtifactRead { volume: String, source: IoError },
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionError::Store {
                step,
                key,
                attempts,
                source,
            } => write!(f, "{} {} failed after {} attempt(s): {}", step, key, attempts, source),
            ExecutionError::NothingToPromote { prefix } => {
                write!(f, "no snapshot found under {} to promote", prefix)
            }
            ExecutionError::MissingArtifact { volume } => {
                write!(f, "no archive staged for volume {}", volume)
            }
            ExecutionError::ArtifactRead { volume, source } => {
                write!(f, "reading archive for {} failed: {}", volume, source)
            }
        }
    }
}

impl std::error::Error for ExecutionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExecutionError::Store { source, .. } | ExecutionError::ArtifactRead { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}

/// Result of one planned operation
#[derive(Debug)]
pub struct OperationOutcome {
    pub operation: PlannedOperation,
    /// `None` when the operation fully succeeded
    pub error: Option<ExecutionError>,
    pub bytes_uploaded: u64,
    pub objects_deleted: usize,
}

impl OperationOutcome {
    fn new(operation: PlannedOperation) -> Self {
        OperationOutcome {
            operation,
            error: None,
            bytes_uploaded: 0,
            objects_deleted: 0,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Errors that will not go away by trying again
pub fn is_retryable(error: &IoError) -> bool {
    !matches!(
        error.kind(),
        ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::InvalidInput
    )
}

/// Executes planned operations with timeout and retry
pub struct PlanExecutor<S: ObjectStore> {
    store: S,
    operation_timeout: Duration,
    retry: RetryConfig,
}

impl<S: ObjectStore + Clone> Clone for PlanExecutor<S> {
    fn clone(&self) -> Self {
        PlanExecutor {
            store: self.store.clone(),
            operation_timeout: self.operation_timeout,
            retry: self.retry.clone(),
        }
    }
}

impl<S: ObjectStore> PlanExecutor<S> {
    pub fn new(store: S, operation_timeout: Duration, retry: RetryConfig) -> Self {
        debug_assert!(retry.max_attempts >= 1, "retry.max_attempts must be at least 1");
        PlanExecutor {
            store,
            operation_timeout,
            retry,
        }
    }

    /// Run every operation in plan order
    ///
    /// `artifacts` maps volume name to the archive staged for it this cycle.
    pub async fn execute(
        &self,
        plan: &OperationPlan,
        artifacts: &HashMap<String, ArchiveArtifact>,
    ) -> Vec<OperationOutcome> {
        let mut outcomes = Vec::with_capacity(plan.len());

        for op in plan {
            let mut outcome = OperationOutcome::new(op.clone());
            match op {
                PlannedOperation::DeleteSnapshots { prefix, .. } => {
                    self.delete_family(prefix, &mut outcome).await;
                }
                PlannedOperation::Promote {
                    snapshot_prefix,
                    backup_key,
                    ..
                } => {
                    self.promote(snapshot_prefix, backup_key, &mut outcome).await;
                }
                PlannedOperation::Upload { volume, key } => {
                    self.upload(volume, key, artifacts.get(volume), &mut outcome)
                        .await;
                }
            }

            if let Some(e) = &outcome.error {
                error!("Operation failed [{}] {}: {}", op.volume(), op.kind(), e);
            }
            outcomes.push(outcome);
        }

        outcomes
    }

    async fn delete_family(&self, prefix: &str, outcome: &mut OperationOutcome) {
        match self
            .with_retry("delete", prefix, || self.store.delete_by_prefix(prefix))
            .await
        {
            Ok(deleted) => {
                debug!("Deleted {} object(s) under {}", deleted, prefix);
                outcome.objects_deleted = deleted;
            }
            Err(e) => outcome.error = Some(e),
        }
    }

    /// Copy the newest object of the family to `backup_key`, then remove
    /// the family
    ///
    /// A cycle that uploaded but never saved its metafile leaves an older
    /// object with the same id and number; the greatest key is the newest.
    ///
    /// If the copy fails the family is left in place so the only copy of
    /// that snapshot is not lost. A missing source is reported but the
    /// family delete still runs.
    async fn promote(&self, snapshot_prefix: &str, backup_key: &str, outcome: &mut OperationOutcome) {
        let source = match self
            .with_retry("find", snapshot_prefix, || {
                self.store.find_latest_key_with_prefix(snapshot_prefix)
            })
            .await
        {
            Ok(source) => source,
            Err(e) => {
                outcome.error = Some(e);
                return;
            }
        };

        match source {
            Some(source) => {
                if let Err(e) = self
                    .with_retry("copy", &source, || self.store.copy(&source, backup_key))
                    .await
                {
                    outcome.error = Some(e);
                    return;
                }
                info!("Promoted {} -> {}", source, backup_key);
            }
            None => {
                warn!("Nothing to promote under {}", snapshot_prefix);
                outcome.error = Some(ExecutionError::NothingToPromote {
                    prefix: snapshot_prefix.to_string(),
                });
            }
        }

        match self
            .with_retry("delete", snapshot_prefix, || {
                self.store.delete_by_prefix(snapshot_prefix)
            })
            .await
        {
            Ok(deleted) => outcome.objects_deleted = deleted,
            Err(e) => {
                outcome.error.get_or_insert(e);
            }
        }
    }

    async fn upload(
        &self,
        volume: &str,
        key: &str,
        artifact: Option<&ArchiveArtifact>,
        outcome: &mut OperationOutcome,
    ) {
        let Some(artifact) = artifact else {
            outcome.error = Some(ExecutionError::MissingArtifact {
                volume: volume.to_string(),
            });
            return;
        };

        // Streamed from disk by the store; only check it is still there
        if let Err(source) = tokio::fs::metadata(&artifact.path).await {
            outcome.error = Some(ExecutionError::ArtifactRead {
                volume: volume.to_string(),
                source,
            });
            return;
        }

        match self
            .with_retry("upload", key, || self.store.put_file(key, &artifact.path))
            .await
        {
            Ok(sent) => {
                info!("Uploaded {} ({} / {} bytes)", key, sent, artifact.size_bytes);
                outcome.bytes_uploaded = sent;
            }
            Err(e) => outcome.error = Some(e),
        }
    }

    /// Run `call` under the operation timeout, retrying transient failures
    async fn with_retry<T, F, Fut>(
        &self,
        step: &'static str,
        key: &str,
        mut call: F,
    ) -> Result<T, ExecutionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = IoResult<T>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.operation_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(IoError::new(
                    ErrorKind::TimedOut,
                    format!("timed out after {:?}", self.operation_timeout),
                )),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts && is_retryable(&e) => {
                    let backoff = self.retry.backoff_for(attempt);
                    warn!(
                        "{} {} failed (attempt {}/{}), retrying in {:?}: {}",
                        step, key, attempt, max_attempts, backoff, e
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(source) => {
                    return Err(ExecutionError::Store {
                        step,
                        key: key.to_string(),
                        attempts: attempt,
                        source,
                    })
                }
            }
        }
    }
}

//! Backup Service
//!
//! Ties the rotation engine to the outside world: archives host volumes,
//! executes the planned store operations and runs cycles on a schedule.
//!
//! ## Architecture
//!
//! ```text
//! Scheduler ──tick──► BackupCycle::run_once
//!                       ├─ Archiver        (host volumes -> staged .tar.gz)
//!                       ├─ RotationEngine  (document -> plan)
//!                       ├─ PlanExecutor    (plan -> ObjectStore, retried)
//!                       └─ MetadataStore   (document -> metafile)
//! ```

pub mod cycle;
pub mod dst;
pub mod executor;
pub mod scheduler;

pub use cycle::{BackupCycle, CycleError, CycleReport, FailedOperation, SkipCause};
pub use dst::{
    run_dst_batch, summarize_batch, RotationDSTConfig, RotationDSTHarness, RotationDSTResult,
};
pub use executor::{ExecutionError, OperationOutcome, PlanExecutor};
pub use scheduler::{Scheduler, SchedulerStats};

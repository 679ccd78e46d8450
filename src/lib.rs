pub mod io;
pub mod buggify;
pub mod clock;
pub mod config;
pub mod observability;
pub mod storage;
pub mod archive;
pub mod rotation;
pub mod backup;

pub use archive::{ArchiveArtifact, ArchiveError, Archiver, SimulatedArchiver, TarGzArchiver};
pub use backup::{BackupCycle, CycleError, CycleReport, Scheduler, SchedulerStats};
pub use clock::{Clock, SimulatedClock, SystemClock, Timestamp};
pub use config::{BackupConfig, ConfigError, ObjectStoreType};
pub use rotation::{KeyLayout, MetadataDocument, MetadataStore, OperationPlan, RotationEngine, VolumeState};
pub use storage::{create_store, InMemoryObjectStore, LocalFsObjectStore, ObjectStore};

//! Snapshot Rotation
//!
//! Keeps a bounded rolling history per volume. Each cycle the newest archive
//! replaces the volume's current snapshot; every `backup_interval` snapshots
//! the aging one is promoted into a permanent backup and a new rotation
//! starts under a fresh snapshot id.
//!
//! ## Architecture
//!
//! ```text
//! MetadataStore::load -> RotationEngine::rotate -> OperationPlan -> PlanExecutor
//!         ^                                                              |
//!         +------------------- MetadataStore::save <---------------------+
//! ```
//!
//! The metafile is the single source of truth; the engine never looks at
//! store listings to decide anything.

pub mod engine;
pub mod keys;
pub mod metadata;
pub mod metafile;

pub use engine::{
    OperationPlan, PlannedOperation, RotationEngine, RotationOutcome, SkipReason, SkippedVolume,
};
pub use keys::{generate_snapshot_id, ArchiveKind, ArchiveName, KeyLayout};
pub use metadata::{validate, CorruptMetadataError, MetadataDocument, VolumeState};
pub use metafile::{MetadataError, MetadataStore};

//! Snapshot Rotation Engine
//!
//! Pure planner: given the current metadata document and the volumes that
//! were archived this cycle, decide for each one whether the previous
//! snapshot is overwritten or promoted to a permanent backup, and produce
//! the ordered store operations that carry the decision out.
//!
//! ## Per-volume decision
//!
//! ```text
//! prev = snapshot_num; snapshot_num += 1
//! prev == 0                 -> upload
//! snapshot_num <= interval  -> delete SNAPSHOT_{id}_{prev}_*, upload
//! snapshot_num >  interval  -> copy to BACKUP_{id}_{prev}_{now}, delete family,
//!                              new id, snapshot_num = 1, upload
//! ```
//!
//! The engine performs no I/O and holds no state between calls. Time and
//! randomness come in as arguments so every plan can be replayed.

use crate::clock::Timestamp;
use crate::io::Rng;
use crate::rotation::keys::{generate_snapshot_id, KeyLayout};
use crate::rotation::metadata::{MetadataDocument, VolumeState};
use std::collections::HashSet;

/// A single store operation decided by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedOperation {
    /// Remove every object of the previous snapshot family
    DeleteSnapshots { volume: String, prefix: String },
    /// Copy the previous snapshot to a permanent backup, then remove its family
    Promote {
        volume: String,
        snapshot_prefix: String,
        backup_key: String,
    },
    /// Upload this cycle's archive for `volume`
    Upload { volume: String, key: String },
}

impl PlannedOperation {
    pub fn volume(&self) -> &str {
        match self {
            PlannedOperation::DeleteSnapshots { volume, .. }
            | PlannedOperation::Promote { volume, .. }
            | PlannedOperation::Upload { volume, .. } => volume,
        }
    }

    /// Short name for logs and reports
    pub fn kind(&self) -> &'static str {
        match self {
            PlannedOperation::DeleteSnapshots { .. } => "delete",
            PlannedOperation::Promote { .. } => "promote",
            PlannedOperation::Upload { .. } => "upload",
        }
    }
}

impl std::fmt::Display for PlannedOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlannedOperation::DeleteSnapshots { prefix, .. } => write!(f, "delete {}*", prefix),
            PlannedOperation::Promote {
                snapshot_prefix,
                backup_key,
                ..
            } => write!(f, "promote {}* -> {}", snapshot_prefix, backup_key),
            PlannedOperation::Upload { key, .. } => write!(f, "upload {}", key),
        }
    }
}

/// Ordered list of operations for one cycle
///
/// Operations for a volume are contiguous; deletes and promotions precede
/// that volume's upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationPlan {
    ops: Vec<PlannedOperation>,
}

impl OperationPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: PlannedOperation) {
        self.ops.push(op);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PlannedOperation> {
        self.ops.iter()
    }

    pub fn promotions(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, PlannedOperation::Promote { .. }))
            .count()
    }

    pub fn for_volume<'a>(&'a self, volume: &'a str) -> impl Iterator<Item = &'a PlannedOperation> + 'a {
        self.ops.iter().filter(move |op| op.volume() == volume)
    }
}

impl<'a> IntoIterator for &'a OperationPlan {
    type Item = &'a PlannedOperation;
    type IntoIter = std::slice::Iter<'a, PlannedOperation>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.iter()
    }
}

/// Why a requested volume was not rotated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Not among the volumes available this cycle
    NotPresent,
    /// Listed more than once in the request
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedVolume {
    pub volume: String,
    pub reason: SkipReason,
}

/// Result of planning one cycle
#[derive(Debug, Clone)]
pub struct RotationOutcome {
    /// Document to persist at the end of the cycle
    pub document: MetadataDocument,
    pub plan: OperationPlan,
    pub skipped: Vec<SkippedVolume>,
}

/// Decides snapshot overwrite vs promotion
#[derive(Debug, Clone)]
pub struct RotationEngine {
    backup_interval: u32,
    layout: KeyLayout,
}

impl RotationEngine {
    /// `backup_interval` is the number of snapshots per rotation (>= 1)
    pub fn new(backup_interval: u32, layout: KeyLayout) -> Self {
        debug_assert!(backup_interval >= 1, "backup_interval must be at least 1");
        RotationEngine {
            backup_interval: backup_interval.max(1),
            layout,
        }
    }

    pub fn backup_interval(&self) -> u32 {
        self.backup_interval
    }

    pub fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    /// Plan one cycle
    ///
    /// `requested` is processed in order. Volumes not in `present` are
    /// skipped and gain no state. The input document is not modified.
    pub fn rotate<R: Rng>(
        &self,
        doc: &MetadataDocument,
        requested: &[String],
        present: &HashSet<String>,
        now: Timestamp,
        rng: &mut R,
    ) -> RotationOutcome {
        let mut document = doc.clone();
        let mut plan = OperationPlan::new();
        let mut skipped = Vec::new();
        let mut processed: HashSet<&str> = HashSet::with_capacity(requested.len());

        for volume in requested {
            if !present.contains(volume) {
                skipped.push(SkippedVolume {
                    volume: volume.clone(),
                    reason: SkipReason::NotPresent,
                });
                continue;
            }
            if !processed.insert(volume.as_str()) {
                skipped.push(SkippedVolume {
                    volume: volume.clone(),
                    reason: SkipReason::Duplicate,
                });
                continue;
            }

            let state = Self::resolve_state(&mut document, volume, rng);
            self.rotate_volume(state, &mut plan, now, rng);
        }

        #[cfg(debug_assertions)]
        self.verify_outcome(&document, &processed);

        RotationOutcome {
            document,
            plan,
            skipped,
        }
    }

    /// Find the entry for `volume`, appending a fresh one if absent
    fn resolve_state<'d, R: Rng>(
        document: &'d mut MetadataDocument,
        volume: &str,
        rng: &mut R,
    ) -> &'d mut VolumeState {
        let index = match document.volumes.iter().position(|v| v.volume_name == volume) {
            Some(index) => index,
            None => {
                document
                    .volumes
                    .push(VolumeState::new(volume, generate_snapshot_id(rng)));
                document.volumes.len() - 1
            }
        };
        &mut document.volumes[index]
    }

    fn rotate_volume<R: Rng>(
        &self,
        state: &mut VolumeState,
        plan: &mut OperationPlan,
        now: Timestamp,
        rng: &mut R,
    ) {
        let volume = state.volume_name.clone();
        let previous_num = state.snapshot_num;
        let previous_id = state.current_snapshot_id.clone();

        state.snapshot_num = previous_num.saturating_add(1);

        if previous_num > 0 {
            let family = self
                .layout
                .snapshot_family_prefix(&volume, &previous_id, previous_num);

            if state.snapshot_num <= self.backup_interval {
                plan.push(PlannedOperation::DeleteSnapshots {
                    volume: volume.clone(),
                    prefix: family,
                });
            } else {
                plan.push(PlannedOperation::Promote {
                    volume: volume.clone(),
                    snapshot_prefix: family,
                    backup_key: self
                        .layout
                        .backup_key(&volume, &previous_id, previous_num, now),
                });
                state.current_snapshot_id = fresh_id(rng, &previous_id);
                state.snapshot_num = 1;
            }
        }

        plan.push(PlannedOperation::Upload {
            key: self.layout.snapshot_key(
                &volume,
                &state.current_snapshot_id,
                state.snapshot_num,
                now,
            ),
            volume,
        });
    }

    /// TigerStyle: Verify all invariants hold
    ///
    /// # Invariants
    /// - One entry per volume name
    /// - Every processed volume ends with snapshot_num in [1, backup_interval]
    #[cfg(debug_assertions)]
    fn verify_outcome(&self, document: &MetadataDocument, processed: &HashSet<&str>) {
        document.verify_invariants();
        for v in &document.volumes {
            if processed.contains(v.volume_name.as_str()) {
                debug_assert!(
                    v.snapshot_num >= 1 && v.snapshot_num <= self.backup_interval,
                    "Invariant violated: snapshot_num {} for '{}' outside [1, {}]",
                    v.snapshot_num,
                    v.volume_name,
                    self.backup_interval
                );
            }
        }
    }
}

/// New id guaranteed to differ from the one being retired
fn fresh_id<R: Rng>(rng: &mut R, previous: &str) -> String {
    loop {
        let id = generate_snapshot_id(rng);
        if id != previous {
            return id;
        }
    }
}

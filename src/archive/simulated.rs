//! Simulated archiver for deterministic testing
//!
//! Writes a small payload derived from the volume name and a per-volume
//! counter instead of walking a real directory. Failures are injected
//! through buggify.

use super::{artifact_path, check_volume_name, io_error, ArchiveArtifact, ArchiveError, Archiver};
use crate::buggify::faults::archive as faults;
use crate::io::Rng;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io::{Error as IoError, ErrorKind};
use std::path::PathBuf;
use std::sync::Arc;

struct SimulatedArchiverInner<R: Rng> {
    rng: R,
    generations: HashMap<String, u64>,
    failures: u64,
}

/// Archiver that never touches a host volume
pub struct SimulatedArchiver<R: Rng> {
    scratch_dir: PathBuf,
    /// Volumes that exist on the simulated host
    volumes: HashSet<String>,
    fail_prob: f64,
    state: Arc<Mutex<SimulatedArchiverInner<R>>>,
}

impl<R: Rng> SimulatedArchiver<R> {
    pub fn new(scratch_dir: PathBuf, volumes: impl IntoIterator<Item = String>, rng: R, fail_prob: f64) -> Self {
        SimulatedArchiver {
            scratch_dir,
            volumes: volumes.into_iter().collect(),
            fail_prob,
            state: Arc::new(Mutex::new(SimulatedArchiverInner {
                rng,
                generations: HashMap::new(),
                failures: 0,
            })),
        }
    }

    /// Number of injected failures so far
    pub fn failures(&self) -> u64 {
        self.state.lock().failures
    }

    /// Payload for the given volume and generation
    pub fn payload(volume: &str, generation: u64) -> Vec<u8> {
        format!("{}#{}", volume, generation).into_bytes()
    }

    /// Roll for a failure and bump the generation; the lock is released
    /// before any await
    fn next_generation(&self, volume: &str) -> Option<u64> {
        let mut s = self.state.lock();
        if crate::buggify!(&mut s.rng, faults::ARCHIVE_FAIL, self.fail_prob) {
            s.failures += 1;
            return None;
        }
        let generation = s.generations.entry(volume.to_string()).or_insert(0);
        *generation += 1;
        Some(*generation)
    }
}

impl<R: Rng> Archiver for SimulatedArchiver<R> {
    fn available_volumes<'a>(&'a self) -> BoxFuture<'a, std::io::Result<Vec<String>>> {
        Box::pin(async move {
            let mut names: Vec<String> = self.volumes.iter().cloned().collect();
            names.sort();
            Ok(names)
        })
    }

    fn archive<'a>(&'a self, volume: &'a str) -> BoxFuture<'a, Result<ArchiveArtifact, ArchiveError>> {
        Box::pin(async move {
            check_volume_name(volume)?;
            if !self.volumes.contains(volume) {
                return Err(ArchiveError::SourceMissing(PathBuf::from(volume)));
            }

            let generation = self.next_generation(volume).ok_or_else(|| {
                io_error(volume, IoError::new(ErrorKind::Other, "simulated archive failure"))
            })?;

            tokio::fs::create_dir_all(&self.scratch_dir)
                .await
                .map_err(|e| io_error(volume, e))?;
            let path = artifact_path(&self.scratch_dir, volume);
            let payload = Self::payload(volume, generation);
            tokio::fs::write(&path, &payload)
                .await
                .map_err(|e| io_error(volume, e))?;

            Ok(ArchiveArtifact {
                volume: volume.to_string(),
                path,
                size_bytes: payload.len() as u64,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::SimulatedRng;

    #[tokio::test]
    async fn test_generations_increase() {
        let scratch = tempfile::tempdir().unwrap();
        let archiver = SimulatedArchiver::new(
            scratch.path().to_path_buf(),
            vec!["v".to_string()],
            SimulatedRng::new(1),
            0.0,
        );

        let a = archiver.archive("v").await.unwrap();
        assert_eq!(std::fs::read(&a.path).unwrap(), SimulatedArchiver::<SimulatedRng>::payload("v", 1));
        let b = archiver.archive("v").await.unwrap();
        assert_eq!(std::fs::read(&b.path).unwrap(), SimulatedArchiver::<SimulatedRng>::payload("v", 2));
    }

    #[tokio::test]
    async fn test_unknown_volume_missing() {
        let scratch = tempfile::tempdir().unwrap();
        let archiver = SimulatedArchiver::new(
            scratch.path().to_path_buf(),
            Vec::new(),
            SimulatedRng::new(1),
            0.0,
        );
        assert!(matches!(
            archiver.archive("v").await,
            Err(ArchiveError::SourceMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_always_failing() {
        let scratch = tempfile::tempdir().unwrap();
        let archiver = SimulatedArchiver::new(
            scratch.path().to_path_buf(),
            vec!["v".to_string()],
            SimulatedRng::new(1),
            1.0,
        );
        assert!(matches!(archiver.archive("v").await, Err(ArchiveError::Io { .. })));
        assert_eq!(archiver.failures(), 1);
    }
}

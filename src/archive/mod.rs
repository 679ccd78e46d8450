//! Volume Archiving
//!
//! Turns a host volume directory into one `.tar.gz` file on scratch storage.
//! The rotation engine never sees archive contents; it only decides under
//! which key the finished artifact is uploaded.
//!
//! - `HostVolumes`: which volumes exist on this host
//! - `TarGzArchiver`: tar + gzip on the blocking pool
//! - `SimulatedArchiver`: deterministic stand-in with fault injection (DST)

pub mod simulated;
pub mod tar_gz;

pub use simulated::SimulatedArchiver;
pub use tar_gz::TarGzArchiver;

use futures::future::BoxFuture;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Error type for archive operations
#[derive(Debug)]
pub enum ArchiveError {
    /// Volume directory does not exist under the host root
    SourceMissing(PathBuf),
    /// Volume name cannot be used as a path component
    InvalidName(String),
    /// Reading the volume or writing the archive failed
    Io { volume: String, source: IoError },
}

impl std::fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiveError::SourceMissing(path) => {
                write!(f, "volume directory {} does not exist", path.display())
            }
            ArchiveError::InvalidName(name) => write!(f, "invalid volume name '{}'", name),
            ArchiveError::Io { volume, source } => {
                write!(f, "archiving '{}' failed: {}", volume, source)
            }
        }
    }
}

impl std::error::Error for ArchiveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ArchiveError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// A finished archive waiting in scratch storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveArtifact {
    pub volume: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Produces one compressed archive per volume
pub trait Archiver: Send + Sync + 'static {
    /// Names of the volumes present on the host right now
    fn available_volumes<'a>(&'a self) -> BoxFuture<'a, IoResult<Vec<String>>>;

    /// Archive `volume` into scratch storage
    fn archive<'a>(&'a self, volume: &'a str) -> BoxFuture<'a, Result<ArchiveArtifact, ArchiveError>>;

    /// Remove a staged artifact once it is no longer needed
    fn discard<'a>(&'a self, artifact: &'a ArchiveArtifact) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            match tokio::fs::remove_file(&artifact.path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", artifact.path.display(), e),
            }
        })
    }
}

/// Reject names that would escape the host or scratch directory
pub fn check_volume_name(volume: &str) -> Result<(), ArchiveError> {
    let bad = volume.is_empty()
        || volume == "."
        || volume == ".."
        || volume.contains('/')
        || volume.contains('\\');
    if bad {
        return Err(ArchiveError::InvalidName(volume.to_string()));
    }
    Ok(())
}

/// Scratch path for a volume's archive
pub fn artifact_path(scratch_dir: &Path, volume: &str) -> PathBuf {
    scratch_dir.join(format!("{}.tar.gz", volume))
}

/// Inventory of volumes present on the host
pub struct HostVolumes;

impl HostVolumes {
    /// Names of the directories directly below `root`, sorted
    pub async fn list(root: &Path) -> IoResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(root).await?;
        let mut names = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => warn!("Skipping non UTF-8 volume name {:?}", raw),
            }
        }

        names.sort();
        Ok(names)
    }
}

pub(crate) fn io_error(volume: &str, source: IoError) -> ArchiveError {
    ArchiveError::Io {
        volume: volume.to_string(),
        source,
    }
}

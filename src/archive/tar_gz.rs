//! tar + gzip archiver

use super::{
    artifact_path, check_volume_name, io_error, ArchiveArtifact, ArchiveError, Archiver, HostVolumes,
};
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::future::BoxFuture;
use std::fs::File;
use std::io::{Error as IoError, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Archives `{host_root}/{volume}` into `{scratch_dir}/{volume}.tar.gz`
#[derive(Debug, Clone)]
pub struct TarGzArchiver {
    host_root: PathBuf,
    scratch_dir: PathBuf,
}

impl TarGzArchiver {
    pub fn new(host_root: PathBuf, scratch_dir: PathBuf) -> Self {
        TarGzArchiver {
            host_root,
            scratch_dir,
        }
    }

    /// Blocking body, run on the blocking pool
    ///
    /// Entries are stored under `{volume}/` so the archive unpacks into a
    /// directory named after the volume. Symlinks are archived as links.
    fn write_archive(source: &Path, dest: &Path, volume: &str) -> std::io::Result<u64> {
        let file = File::create(dest)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.follow_symlinks(false);
        builder.append_dir_all(volume, source)?;

        let encoder = builder.into_inner()?;
        let file = encoder.finish()?;
        file.sync_all()?;

        Ok(std::fs::metadata(dest)?.len())
    }
}

impl Archiver for TarGzArchiver {
    fn available_volumes<'a>(&'a self) -> BoxFuture<'a, std::io::Result<Vec<String>>> {
        Box::pin(HostVolumes::list(&self.host_root))
    }

    fn archive<'a>(&'a self, volume: &'a str) -> BoxFuture<'a, Result<ArchiveArtifact, ArchiveError>> {
        Box::pin(async move {
            check_volume_name(volume)?;

            let source = self.host_root.join(volume);
            match tokio::fs::metadata(&source).await {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => return Err(ArchiveError::SourceMissing(source)),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(ArchiveError::SourceMissing(source))
                }
                Err(e) => return Err(io_error(volume, e)),
            }

            tokio::fs::create_dir_all(&self.scratch_dir)
                .await
                .map_err(|e| io_error(volume, e))?;

            let dest = artifact_path(&self.scratch_dir, volume);
            debug!("Archiving {} -> {}", source.display(), dest.display());

            let name = volume.to_string();
            let blocking_dest = dest.clone();
            let written = tokio::task::spawn_blocking(move || {
                Self::write_archive(&source, &blocking_dest, &name)
            })
            .await
            .unwrap_or_else(|e| Err(IoError::new(ErrorKind::Other, e.to_string())));

            let size_bytes = match written {
                Ok(size_bytes) => size_bytes,
                Err(e) => {
                    // Never handed out as an artifact, so nothing else removes it
                    match tokio::fs::remove_file(&dest).await {
                        Ok(()) => debug!("Removed partial archive {}", dest.display()),
                        Err(rm) if rm.kind() == ErrorKind::NotFound => {}
                        Err(rm) => warn!("Failed to remove partial archive {}: {}", dest.display(), rm),
                    }
                    return Err(io_error(volume, e));
                }
            };

            info!("Archived volume {} ({} bytes)", volume, size_bytes);

            Ok(ArchiveArtifact {
                volume: volume.to_string(),
                path: dest,
                size_bytes,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;

    fn unpacked_names(path: &Path) -> Vec<String> {
        let file = File::open(path).unwrap();
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        let mut names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_archive_volume() {
        let host = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let vol = host.path().join("db-data");
        std::fs::create_dir_all(vol.join("nested")).unwrap();
        std::fs::write(vol.join("a.txt"), b"hello").unwrap();
        std::fs::write(vol.join("nested/b.txt"), b"world").unwrap();

        let archiver = TarGzArchiver::new(host.path().to_path_buf(), scratch.path().to_path_buf());
        let artifact = archiver.archive("db-data").await.unwrap();

        assert_eq!(artifact.volume, "db-data");
        assert_eq!(artifact.path, scratch.path().join("db-data.tar.gz"));
        assert!(artifact.size_bytes > 0);

        let names = unpacked_names(&artifact.path);
        assert!(names.contains(&"db-data/a.txt".to_string()));
        assert!(names.contains(&"db-data/nested/b.txt".to_string()));
    }

    #[tokio::test]
    async fn test_missing_volume() {
        let host = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let archiver = TarGzArchiver::new(host.path().to_path_buf(), scratch.path().to_path_buf());

        let err = archiver.archive("ghost").await.unwrap_err();
        assert!(matches!(err, ArchiveError::SourceMissing(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_archive_leaves_no_partial_file() {
        let host = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let vol = host.path().join("v");
        std::fs::create_dir(&vol).unwrap();
        std::fs::write(vol.join("a.txt"), vec![7u8; 64 * 1024]).unwrap();
        // Sockets cannot be archived
        let _listener = std::os::unix::net::UnixListener::bind(vol.join("app.sock")).unwrap();

        let archiver = TarGzArchiver::new(host.path().to_path_buf(), scratch.path().to_path_buf());
        let err = archiver.archive("v").await.unwrap_err();

        assert!(matches!(err, ArchiveError::Io { .. }));
        assert!(!scratch.path().join("v.tar.gz").exists());
    }

    #[tokio::test]
    async fn test_discard_removes_artifact() {
        let host = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        std::fs::create_dir(host.path().join("v")).unwrap();
        let archiver = TarGzArchiver::new(host.path().to_path_buf(), scratch.path().join("stage"));

        let artifact = archiver.archive("v").await.unwrap();
        assert!(artifact.path.exists());
        archiver.discard(&artifact).await;
        assert!(!artifact.path.exists());
        // Second discard is a no-op
        archiver.discard(&artifact).await;
    }
}

//! Object Store Abstraction
//!
//! Trait-based abstraction over blob storage. Keys are bucket-absolute
//! strings; callers build them with `rotation::KeyLayout`.
//!
//! Implementations:
//! - `InMemoryObjectStore`: For unit tests and DST
//! - `LocalFsObjectStore`: For development and local testing
//! - `S3ObjectStore`: For production (feature-gated)

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Bytes read from disk per upload chunk (S3 multipart part size)
pub const UPLOAD_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Metadata for a stored object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Object key (path)
    pub key: String,
    /// Size in bytes
    pub size_bytes: u64,
    /// Creation timestamp (Unix ms)
    pub created_at_ms: u64,
    /// ETag or content hash (optional)
    pub etag: Option<String>,
}

/// Result of a list operation
#[derive(Debug, Clone, Default)]
pub struct ListResult {
    /// Objects matching the prefix
    pub objects: Vec<ObjectMeta>,
    /// Continuation token for pagination (if more results exist)
    pub continuation_token: Option<String>,
}

/// Object store abstraction trait
///
/// `delete_by_prefix` and `find_latest_key_with_prefix` are provided on top of
/// `list`; backends override them only when they have a native equivalent.
/// `put_file` defaults to reading the whole file and calling `put`; disk and
/// network backends override it to stream.
pub trait ObjectStore: Send + Sync + 'static {
    /// Put an object (create or overwrite)
    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> BoxFuture<'a, IoResult<()>>;

    /// Get an object's contents
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, IoResult<Vec<u8>>>;

    /// Check if an object exists
    fn exists<'a>(&'a self, key: &'a str) -> BoxFuture<'a, IoResult<bool>>;

    /// Delete an object. Deleting a missing key succeeds.
    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, IoResult<()>>;

    /// List objects whose key starts with `prefix` (plain string prefix,
    /// not restricted to path segment boundaries), sorted by key
    fn list<'a>(
        &'a self,
        prefix: &'a str,
        continuation_token: Option<&'a str>,
    ) -> BoxFuture<'a, IoResult<ListResult>>;

    /// Server-side copy; the source must exist
    fn copy<'a>(&'a self, from: &'a str, to: &'a str) -> BoxFuture<'a, IoResult<()>>;

    /// Get object metadata without downloading content
    fn head<'a>(&'a self, key: &'a str) -> BoxFuture<'a, IoResult<ObjectMeta>>;

    /// Delete every object whose key starts with `prefix`
    ///
    /// Attempts every matching key even when some deletes fail; returns the
    /// number deleted, or the first error encountered.
    fn delete_by_prefix<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, IoResult<usize>> {
        Box::pin(async move {
            let keys = list_all_keys(self, prefix).await?;

            let mut deleted = 0;
            let mut first_error = None;
            for key in &keys {
                match self.delete(key).await {
                    Ok(()) => deleted += 1,
                    Err(e) => {
                        tracing::warn!("Failed to delete {}: {}", key, e);
                        first_error.get_or_insert(e);
                    }
                }
            }

            match first_error {
                Some(e) => Err(e),
                None => Ok(deleted),
            }
        })
    }

    /// Greatest key starting with `prefix` across every listing page, if any
    ///
    /// Snapshot keys in one family differ only by their timestamp suffix,
    /// so the greatest key is the newest upload.
    fn find_latest_key_with_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> BoxFuture<'a, IoResult<Option<String>>> {
        Box::pin(async move {
            let keys = list_all_keys(self, prefix).await?;
            Ok(keys.into_iter().max())
        })
    }

    /// Upload the file at `path` under `key`; returns the bytes sent
    fn put_file<'a>(&'a self, key: &'a str, path: &'a Path) -> BoxFuture<'a, IoResult<u64>> {
        Box::pin(async move {
            let data = tokio::fs::read(path).await?;
            self.put(key, &data).await?;
            Ok(data.len() as u64)
        })
    }
}

/// Per-chunk upload progress, logged at debug level
#[derive(Debug)]
pub struct UploadProgress<'a> {
    key: &'a str,
    total: u64,
    sent: u64,
}

impl<'a> UploadProgress<'a> {
    pub fn new(key: &'a str, total: u64) -> Self {
        UploadProgress { key, total, sent: 0 }
    }

    pub fn advance(&mut self, bytes: usize) {
        self.sent += bytes as u64;
        tracing::debug!(
            "{}  {} / {}  ({:.2}%)",
            self.key,
            self.sent,
            self.total,
            self.percent()
        );
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.sent as f64 * 100.0 / self.total as f64
    }
}

/// Fill `buf` from `reader`, short only at end of file
pub(crate) async fn read_chunk<R>(reader: &mut R, buf: &mut [u8]) -> IoResult<usize>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Follow continuation tokens until the listing is exhausted
async fn list_all_keys<S: ObjectStore + ?Sized>(store: &S, prefix: &str) -> IoResult<Vec<String>> {
    let mut keys = Vec::new();
    let mut token: Option<String> = None;

    loop {
        let page = store.list(prefix, token.as_deref()).await?;
        keys.extend(page.objects.into_iter().map(|o| o.key));
        match page.continuation_token {
            Some(next) if token.as_deref() != Some(next.as_str()) => token = Some(next),
            _ => break,
        }
    }

    Ok(keys)
}

impl<T: ObjectStore + ?Sized> ObjectStore for Arc<T> {
    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> BoxFuture<'a, IoResult<()>> {
        (**self).put(key, data)
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, IoResult<Vec<u8>>> {
        (**self).get(key)
    }

    fn exists<'a>(&'a self, key: &'a str) -> BoxFuture<'a, IoResult<bool>> {
        (**self).exists(key)
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, IoResult<()>> {
        (**self).delete(key)
    }

    fn list<'a>(
        &'a self,
        prefix: &'a str,
        continuation_token: Option<&'a str>,
    ) -> BoxFuture<'a, IoResult<ListResult>> {
        (**self).list(prefix, continuation_token)
    }

    fn copy<'a>(&'a self, from: &'a str, to: &'a str) -> BoxFuture<'a, IoResult<()>> {
        (**self).copy(from, to)
    }

    fn head<'a>(&'a self, key: &'a str) -> BoxFuture<'a, IoResult<ObjectMeta>> {
        (**self).head(key)
    }

    fn delete_by_prefix<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, IoResult<usize>> {
        (**self).delete_by_prefix(prefix)
    }

    fn find_latest_key_with_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> BoxFuture<'a, IoResult<Option<String>>> {
        (**self).find_latest_key_with_prefix(prefix)
    }

    fn put_file<'a>(&'a self, key: &'a str, path: &'a Path) -> BoxFuture<'a, IoResult<u64>> {
        (**self).put_file(key, path)
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ============================================================================
// InMemoryObjectStore - For tests and DST
// ============================================================================

/// In-memory object store for unit tests and deterministic simulation
#[derive(Debug, Clone, Default)]
pub struct InMemoryObjectStore {
    data: Arc<RwLock<HashMap<String, StoredObject>>>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    created_at_ms: u64,
}

impl InMemoryObjectStore {
    /// Create a new in-memory object store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of stored objects (for testing)
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Check if empty (for testing)
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// All keys in sorted order (for testing)
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.data.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Clear all objects (for testing)
    pub fn clear(&self) {
        self.data.write().clear();
    }

    fn not_found(key: &str) -> IoError {
        IoError::new(ErrorKind::NotFound, format!("Key not found: {}", key))
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> BoxFuture<'a, IoResult<()>> {
        Box::pin(async move {
            let obj = StoredObject {
                data: data.to_vec(),
                created_at_ms: now_ms(),
            };
            self.data.write().insert(key.to_string(), obj);
            Ok(())
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, IoResult<Vec<u8>>> {
        Box::pin(async move {
            self.data
                .read()
                .get(key)
                .map(|obj| obj.data.clone())
                .ok_or_else(|| Self::not_found(key))
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> BoxFuture<'a, IoResult<bool>> {
        Box::pin(async move { Ok(self.data.read().contains_key(key)) })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, IoResult<()>> {
        Box::pin(async move {
            self.data.write().remove(key);
            Ok(())
        })
    }

    fn list<'a>(
        &'a self,
        prefix: &'a str,
        _continuation_token: Option<&'a str>,
    ) -> BoxFuture<'a, IoResult<ListResult>> {
        Box::pin(async move {
            let data = self.data.read();
            let mut objects: Vec<ObjectMeta> = data
                .iter()
                .filter(|(k, _)| k.starts_with(prefix))
                .map(|(k, v)| ObjectMeta {
                    key: k.clone(),
                    size_bytes: v.data.len() as u64,
                    created_at_ms: v.created_at_ms,
                    etag: None,
                })
                .collect();

            objects.sort_by(|a, b| a.key.cmp(&b.key));

            Ok(ListResult {
                objects,
                continuation_token: None,
            })
        })
    }

    fn copy<'a>(&'a self, from: &'a str, to: &'a str) -> BoxFuture<'a, IoResult<()>> {
        Box::pin(async move {
            let mut data = self.data.write();
            let source = data.get(from).cloned().ok_or_else(|| Self::not_found(from))?;
            data.insert(
                to.to_string(),
                StoredObject {
                    data: source.data,
                    created_at_ms: now_ms(),
                },
            );
            Ok(())
        })
    }

    fn head<'a>(&'a self, key: &'a str) -> BoxFuture<'a, IoResult<ObjectMeta>> {
        Box::pin(async move {
            self.data
                .read()
                .get(key)
                .map(|obj| ObjectMeta {
                    key: key.to_string(),
                    size_bytes: obj.data.len() as u64,
                    created_at_ms: obj.created_at_ms,
                    etag: None,
                })
                .ok_or_else(|| Self::not_found(key))
        })
    }
}

// ============================================================================
// LocalFsObjectStore - For development
// ============================================================================

/// Local filesystem object store for development and testing
#[derive(Debug, Clone)]
pub struct LocalFsObjectStore {
    base_path: PathBuf,
}

impl LocalFsObjectStore {
    /// Create a new local filesystem object store
    pub fn new(base_path: PathBuf) -> Self {
        LocalFsObjectStore { base_path }
    }

    /// Get the full path for a key
    fn full_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }

    /// Ensure parent directories exist
    async fn ensure_parent(path: &Path) -> IoResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Get the base path
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn meta_from_fs(key: String, metadata: &std::fs::Metadata) -> ObjectMeta {
        ObjectMeta {
            key,
            size_bytes: metadata.len(),
            created_at_ms: metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            etag: None,
        }
    }

    fn walk_dir(dir: &Path, base: &Path, prefix: &str, objects: &mut Vec<ObjectMeta>) -> IoResult<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();

            if path.is_dir() {
                Self::walk_dir(&path, base, prefix, objects)?;
            } else if path.is_file() {
                // In-flight `put_file` output
                if path.extension().is_some_and(|ext| ext == "part") {
                    continue;
                }
                let Ok(relative) = path.strip_prefix(base) else {
                    continue;
                };
                // Keys always use '/' regardless of platform separator
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");

                if key.starts_with(prefix) {
                    let metadata = std::fs::metadata(&path)?;
                    objects.push(Self::meta_from_fs(key, &metadata));
                }
            }
        }
        Ok(())
    }
}

impl ObjectStore for LocalFsObjectStore {
    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> BoxFuture<'a, IoResult<()>> {
        Box::pin(async move {
            let path = self.full_path(key);
            Self::ensure_parent(&path).await?;
            tokio::fs::write(&path, data).await
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, IoResult<Vec<u8>>> {
        Box::pin(async move { tokio::fs::read(self.full_path(key)).await })
    }

    fn exists<'a>(&'a self, key: &'a str) -> BoxFuture<'a, IoResult<bool>> {
        Box::pin(async move { tokio::fs::try_exists(self.full_path(key)).await })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, IoResult<()>> {
        Box::pin(async move {
            match tokio::fs::remove_file(self.full_path(key)).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()), // Already deleted
                Err(e) => Err(e),
            }
        })
    }

    fn list<'a>(
        &'a self,
        prefix: &'a str,
        _continuation_token: Option<&'a str>,
    ) -> BoxFuture<'a, IoResult<ListResult>> {
        Box::pin(async move {
            let base = self.base_path.clone();
            let prefix = prefix.to_string();

            tokio::task::spawn_blocking(move || {
                let prefix_path = base.join(&prefix);

                // A partial file name prefix searches its parent directory
                let search_dir = if prefix.is_empty() || prefix.ends_with('/') || prefix_path.is_dir() {
                    prefix_path
                } else {
                    prefix_path.parent().unwrap_or(&base).to_path_buf()
                };

                if !search_dir.exists() {
                    return Ok(ListResult::default());
                }

                let mut objects = Vec::new();
                Self::walk_dir(&search_dir, &base, &prefix, &mut objects)?;
                objects.sort_by(|a, b| a.key.cmp(&b.key));

                Ok(ListResult {
                    objects,
                    continuation_token: None,
                })
            })
            .await
            .map_err(|e| IoError::new(ErrorKind::Other, format!("list task failed: {}", e)))?
        })
    }

    fn copy<'a>(&'a self, from: &'a str, to: &'a str) -> BoxFuture<'a, IoResult<()>> {
        Box::pin(async move {
            let to_path = self.full_path(to);
            Self::ensure_parent(&to_path).await?;
            tokio::fs::copy(self.full_path(from), &to_path).await?;
            Ok(())
        })
    }

    fn head<'a>(&'a self, key: &'a str) -> BoxFuture<'a, IoResult<ObjectMeta>> {
        Box::pin(async move {
            let metadata = tokio::fs::metadata(self.full_path(key)).await?;
            Ok(Self::meta_from_fs(key.to_string(), &metadata))
        })
    }

    fn put_file<'a>(&'a self, key: &'a str, path: &'a Path) -> BoxFuture<'a, IoResult<u64>> {
        Box::pin(async move {
            let mut source = tokio::fs::File::open(path).await?;
            let total = source.metadata().await?.len();

            let dest = self.full_path(key);
            Self::ensure_parent(&dest).await?;
            // Written aside and renamed so a reader never sees a partial object
            let mut partial = dest.clone().into_os_string();
            partial.push(".part");
            let partial = PathBuf::from(partial);

            let copied = async {
                let mut out = tokio::fs::File::create(&partial).await?;
                let mut progress = UploadProgress::new(key, total);
                let chunk = usize::try_from(total).map_or(UPLOAD_CHUNK_SIZE, |t| t.clamp(1, UPLOAD_CHUNK_SIZE));
                let mut buf = vec![0u8; chunk];
                loop {
                    let n = read_chunk(&mut source, &mut buf).await?;
                    if n == 0 {
                        break;
                    }
                    out.write_all(&buf[..n]).await?;
                    progress.advance(n);
                }
                out.flush().await?;
                out.sync_all().await?;
                Ok::<u64, IoError>(progress.sent())
            }
            .await;

            match copied {
                Ok(sent) => {
                    tokio::fs::rename(&partial, &dest).await?;
                    Ok(sent)
                }
                Err(e) => {
                    let _ = tokio::fs::remove_file(&partial).await;
                    Err(e)
                }
            }
        })
    }
}

//! S3 Object Store Implementation
//!
//! Provides an S3-compatible object store for production use.
//! Uses the `object_store` crate from the Arrow ecosystem.
//!
//! Supports:
//! - AWS S3
//! - S3-compatible services (MinIO, Ceph RGW, Wasabi, ...)
//! - Custom endpoints

use crate::config::S3Config;
use crate::storage::object_store::{
    read_chunk, ListResult, ObjectMeta, ObjectStore, UploadProgress, UPLOAD_CHUNK_SIZE,
};
use futures::future::BoxFuture;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore as ObjectStoreTrait, WriteMultipart};
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::path::Path;
use std::sync::Arc;

/// Maximum keys returned per `list` page
const PAGE_SIZE: usize = 1000;

/// Multipart parts in flight per upload
const MAX_CONCURRENT_PARTS: usize = 4;

/// S3 Object Store for production deployments
#[derive(Clone)]
pub struct S3ObjectStore {
    store: Arc<dyn ObjectStoreTrait>,
    bucket: String,
}

impl S3ObjectStore {
    /// Build a client from explicit configuration
    pub fn new(config: &S3Config) -> IoResult<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region);

        // Use custom endpoint for S3-compatible services (MinIO)
        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        if let Some(access_key) = &config.access_key_id {
            builder = builder.with_access_key_id(access_key);
        }
        if let Some(secret_key) = &config.secret_access_key {
            builder = builder.with_secret_access_key(secret_key);
        }

        let store = builder.build().map_err(|e| {
            IoError::new(
                ErrorKind::InvalidInput,
                format!("Failed to create S3 store: {}", e),
            )
        })?;

        Ok(S3ObjectStore {
            store: Arc::new(store),
            bucket: config.bucket.clone(),
        })
    }

    /// Wrap an existing `object_store` implementation (for testing)
    pub fn from_store(store: Arc<dyn ObjectStoreTrait>, bucket: String) -> Self {
        S3ObjectStore { store, bucket }
    }

    /// Directory part of a string prefix
    ///
    /// `object_store` lists by whole path segments, so a partial file name
    /// prefix like `vol/SNAPSHOT_ab_1_` has to be listed from `vol/` and
    /// filtered afterwards.
    fn list_root(prefix: &str) -> Option<ObjectPath> {
        match prefix.rfind('/') {
            Some(idx) if idx > 0 => Some(ObjectPath::from(&prefix[..idx])),
            _ => None,
        }
    }

    /// Convert object_store errors to IoError
    fn map_error(err: object_store::Error) -> IoError {
        match &err {
            object_store::Error::NotFound { .. } => IoError::new(ErrorKind::NotFound, err.to_string()),
            object_store::Error::AlreadyExists { .. } => {
                IoError::new(ErrorKind::AlreadyExists, err.to_string())
            }
            object_store::Error::Precondition { .. } => {
                IoError::new(ErrorKind::InvalidInput, err.to_string())
            }
            object_store::Error::PermissionDenied { .. }
            | object_store::Error::Unauthenticated { .. } => {
                IoError::new(ErrorKind::PermissionDenied, err.to_string())
            }
            _ => IoError::new(ErrorKind::Other, err.to_string()),
        }
    }

    fn to_meta(meta: &object_store::ObjectMeta) -> ObjectMeta {
        ObjectMeta {
            key: meta.location.to_string(),
            size_bytes: meta.size as u64,
            created_at_ms: meta
                .last_modified
                .timestamp_millis()
                .try_into()
                .unwrap_or(0),
            etag: meta.e_tag.clone(),
        }
    }
}

impl std::fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl ObjectStore for S3ObjectStore {
    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> BoxFuture<'a, IoResult<()>> {
        Box::pin(async move {
            let path = ObjectPath::from(key);
            self.store
                .put(&path, bytes::Bytes::copy_from_slice(data).into())
                .await
                .map_err(Self::map_error)?;
            Ok(())
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, IoResult<Vec<u8>>> {
        Box::pin(async move {
            let path = ObjectPath::from(key);
            let result = self.store.get(&path).await.map_err(Self::map_error)?;
            let data = result.bytes().await.map_err(Self::map_error)?;
            Ok(data.to_vec())
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> BoxFuture<'a, IoResult<bool>> {
        Box::pin(async move {
            let path = ObjectPath::from(key);
            match self.store.head(&path).await {
                Ok(_) => Ok(true),
                Err(object_store::Error::NotFound { .. }) => Ok(false),
                Err(e) => Err(Self::map_error(e)),
            }
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, IoResult<()>> {
        Box::pin(async move {
            let path = ObjectPath::from(key);
            // S3 delete is idempotent - ignore not found errors
            match self.store.delete(&path).await {
                Ok(()) => Ok(()),
                Err(object_store::Error::NotFound { .. }) => Ok(()),
                Err(e) => Err(Self::map_error(e)),
            }
        })
    }

    fn list<'a>(
        &'a self,
        prefix: &'a str,
        continuation_token: Option<&'a str>,
    ) -> BoxFuture<'a, IoResult<ListResult>> {
        Box::pin(async move {
            use futures::TryStreamExt;

            let root = Self::list_root(prefix);
            let offset: usize = continuation_token
                .and_then(|t| t.parse().ok())
                .unwrap_or(0);

            let mut matching: Vec<ObjectMeta> = self
                .store
                .list(root.as_ref())
                .map_err(Self::map_error)
                .try_filter_map(|meta| {
                    let keep = meta.location.as_ref().starts_with(prefix);
                    futures::future::ready(Ok(keep.then(|| Self::to_meta(&meta))))
                })
                .try_collect()
                .await?;

            matching.sort_by(|a, b| a.key.cmp(&b.key));

            let total = matching.len();
            let objects: Vec<ObjectMeta> = matching.into_iter().skip(offset).take(PAGE_SIZE).collect();
            let next = offset + objects.len();

            Ok(ListResult {
                objects,
                continuation_token: (next < total).then(|| next.to_string()),
            })
        })
    }

    fn copy<'a>(&'a self, from: &'a str, to: &'a str) -> BoxFuture<'a, IoResult<()>> {
        Box::pin(async move {
            self.store
                .copy(&ObjectPath::from(from), &ObjectPath::from(to))
                .await
                .map_err(Self::map_error)
        })
    }

    fn head<'a>(&'a self, key: &'a str) -> BoxFuture<'a, IoResult<ObjectMeta>> {
        Box::pin(async move {
            let meta = self
                .store
                .head(&ObjectPath::from(key))
                .await
                .map_err(Self::map_error)?;
            Ok(Self::to_meta(&meta))
        })
    }

    /// Multipart upload, one `UPLOAD_CHUNK_SIZE` part at a time
    fn put_file<'a>(&'a self, key: &'a str, path: &'a Path) -> BoxFuture<'a, IoResult<u64>> {
        Box::pin(async move {
            let mut file = tokio::fs::File::open(path).await?;
            let total = file.metadata().await?.len();

            let upload = self
                .store
                .put_multipart(&ObjectPath::from(key))
                .await
                .map_err(Self::map_error)?;
            let mut writer = WriteMultipart::new_with_chunk_size(upload, UPLOAD_CHUNK_SIZE);
            let mut progress = UploadProgress::new(key, total);
            let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE];

            loop {
                let n = match read_chunk(&mut file, &mut buf).await {
                    Ok(n) => n,
                    Err(e) => {
                        if let Err(abort) = writer.abort().await {
                            tracing::warn!("Failed to abort upload of {}: {}", key, abort);
                        }
                        return Err(e);
                    }
                };
                if n == 0 {
                    break;
                }
                writer
                    .wait_for_capacity(MAX_CONCURRENT_PARTS)
                    .await
                    .map_err(Self::map_error)?;
                writer.write(&buf[..n]);
                progress.advance(n);
            }

            writer.finish().await.map_err(Self::map_error)?;
            Ok(progress.sent())
        })
    }
}

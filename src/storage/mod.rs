//! Object Storage
//!
//! Every archive, backup and the metafile live in a single object store
//! bucket. The rotation engine only ever talks to the `ObjectStore` trait.
//!
//! ## Backends
//!
//! - `InMemoryObjectStore`: tests and DST
//! - `LocalFsObjectStore`: development, keys map to files under a base dir
//! - `S3ObjectStore`: AWS S3 / MinIO (`s3` feature)
//! - `SimulatedObjectStore`: fault-injecting wrapper for any of the above

pub mod object_store;
pub mod simulated_store;
#[cfg(feature = "s3")]
pub mod s3_store;

pub use object_store::{
    InMemoryObjectStore, ListResult, LocalFsObjectStore, ObjectMeta, ObjectStore, UploadProgress,
    UPLOAD_CHUNK_SIZE,
};
pub use simulated_store::{SimulatedObjectStore, SimulatedStoreConfig, SimulatedStoreStats};
#[cfg(feature = "s3")]
pub use s3_store::S3ObjectStore;

use crate::config::{BackupConfig, ObjectStoreType};
use std::io::Result as IoResult;
use std::sync::Arc;

/// Build the store selected by `config.store_type`
pub fn create_store(config: &BackupConfig) -> IoResult<Arc<dyn ObjectStore>> {
    match config.store_type {
        ObjectStoreType::InMemory => Ok(Arc::new(InMemoryObjectStore::new())),
        ObjectStoreType::LocalFs => {
            let path = config.local_store_path();
            std::fs::create_dir_all(&path)?;
            Ok(Arc::new(LocalFsObjectStore::new(path)))
        }
        #[cfg(feature = "s3")]
        ObjectStoreType::S3 => {
            let s3 = config.s3.as_ref().ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "S3 store selected without S3 settings",
                )
            })?;
            Ok(Arc::new(S3ObjectStore::new(s3)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_local_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BackupConfig::test();
        config.store_type = ObjectStoreType::LocalFs;
        config.local_path = Some(dir.path().join("store"));

        let store = create_store(&config).unwrap();
        store.put("p/metafile", b"{}").await.unwrap();
        assert!(dir.path().join("store/p/metafile").exists());
    }

    #[cfg(feature = "s3")]
    #[test]
    fn test_s3_without_settings_fails() {
        let mut config = BackupConfig::test();
        config.store_type = ObjectStoreType::S3;
        config.s3 = None;
        let err = create_store(&config).err().unwrap();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }
}

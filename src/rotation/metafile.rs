//! Metafile persistence
//!
//! Loads and saves the `MetadataDocument` at `{prefix}/metafile`. The
//! document is read once at the start of a cycle and written once at the
//! end.
//!
//! ## DST Compatibility
//!
//! All I/O goes through the ObjectStore trait, enabling fault injection.

use crate::rotation::keys::KeyLayout;
use crate::rotation::metadata::{validate, CorruptMetadataError, MetadataDocument};
use crate::storage::ObjectStore;
use std::io::{Error as IoError, ErrorKind};
use tracing::{debug, info};

/// Error type for metafile operations
#[derive(Debug)]
pub enum MetadataError {
    /// I/O error from object store
    Io(IoError),
    /// Metafile is not valid JSON
    Json(serde_json::Error),
    /// Metafile parsed but has the wrong structure
    Corrupt(CorruptMetadataError),
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Io(e) => write!(f, "I/O error: {}", e),
            MetadataError::Json(e) => write!(f, "JSON error: {}", e),
            MetadataError::Corrupt(e) => write!(f, "Corrupt metafile: {}", e),
        }
    }
}

impl std::error::Error for MetadataError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MetadataError::Io(e) => Some(e),
            MetadataError::Json(e) => Some(e),
            MetadataError::Corrupt(e) => Some(e),
        }
    }
}

impl From<IoError> for MetadataError {
    fn from(e: IoError) -> Self {
        MetadataError::Io(e)
    }
}

impl From<serde_json::Error> for MetadataError {
    fn from(e: serde_json::Error) -> Self {
        MetadataError::Json(e)
    }
}

impl From<CorruptMetadataError> for MetadataError {
    fn from(e: CorruptMetadataError) -> Self {
        MetadataError::Corrupt(e)
    }
}

/// Reads and writes the metafile
pub struct MetadataStore<S: ObjectStore> {
    store: S,
    metafile_key: String,
}

impl<S: ObjectStore + Clone> Clone for MetadataStore<S> {
    fn clone(&self) -> Self {
        MetadataStore {
            store: self.store.clone(),
            metafile_key: self.metafile_key.clone(),
        }
    }
}

impl<S: ObjectStore> MetadataStore<S> {
    pub fn new(store: S, layout: &KeyLayout) -> Self {
        MetadataStore {
            store,
            metafile_key: layout.metafile_key(),
        }
    }

    pub fn metafile_key(&self) -> &str {
        &self.metafile_key
    }

    /// Load the document, seeding an empty one if the metafile is absent
    pub async fn load(&self) -> Result<MetadataDocument, MetadataError> {
        match self.store.get(&self.metafile_key).await {
            Ok(data) => Self::decode(&data),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No metafile at {}, seeding an empty one", self.metafile_key);
                let doc = MetadataDocument::new();
                self.save(&doc).await?;
                Ok(doc)
            }
            Err(e) => Err(MetadataError::Io(e)),
        }
    }

    /// Overwrite the metafile with `doc`
    pub async fn save(&self, doc: &MetadataDocument) -> Result<(), MetadataError> {
        #[cfg(debug_assertions)]
        doc.verify_invariants();

        let data = serde_json::to_vec_pretty(doc)?;
        self.store.put(&self.metafile_key, &data).await?;
        debug!(
            "Saved metafile {} ({} volumes, {} bytes)",
            self.metafile_key,
            doc.len(),
            data.len()
        );
        Ok(())
    }

    /// Parse and validate raw metafile bytes
    pub fn decode(data: &[u8]) -> Result<MetadataDocument, MetadataError> {
        let raw: serde_json::Value = serde_json::from_slice(data)?;
        Ok(validate(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rotation::metadata::VolumeState;
    use crate::storage::InMemoryObjectStore;

    fn setup() -> (InMemoryObjectStore, MetadataStore<InMemoryObjectStore>) {
        let store = InMemoryObjectStore::new();
        let meta = MetadataStore::new(store.clone(), &KeyLayout::new("backups"));
        (store, meta)
    }

    #[tokio::test]
    async fn test_load_seeds_empty_document() {
        let (store, meta) = setup();

        let doc = meta.load().await.unwrap();
        assert!(doc.is_empty());
        assert!(store.exists("backups/metafile").await.unwrap());

        let stored = store.get("backups/metafile").await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&stored).unwrap();
        assert_eq!(value, serde_json::json!({"volumes": []}));
    }

    #[tokio::test]
    async fn test_load_is_idempotent() {
        let (store, meta) = setup();

        let first = meta.load().await.unwrap();
        let bytes_after_first = store.get("backups/metafile").await.unwrap();
        let second = meta.load().await.unwrap();
        let bytes_after_second = store.get("backups/metafile").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(bytes_after_first, bytes_after_second);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let (_store, meta) = setup();
        let doc = MetadataDocument {
            volumes: vec![
                VolumeState {
                    volume_name: "b".to_string(),
                    current_snapshot_id: "00ff00ff".to_string(),
                    snapshot_num: 3,
                },
                VolumeState {
                    volume_name: "a".to_string(),
                    current_snapshot_id: "12345678".to_string(),
                    snapshot_num: 1,
                },
            ],
        };

        meta.save(&doc).await.unwrap();
        let loaded = meta.load().await.unwrap();
        assert_eq!(loaded, doc);
    }

    #[tokio::test]
    async fn test_corrupt_metafile_is_reported() {
        let (store, meta) = setup();
        store
            .put(
                "backups/metafile",
                br#"{"volumes": [{"volume_name": "a", "current_snapshot_id": "x"}]}"#,
            )
            .await
            .unwrap();

        let err = meta.load().await.unwrap_err();
        assert!(matches!(
            err,
            MetadataError::Corrupt(CorruptMetadataError::MissingKey { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_json_is_reported() {
        let (store, meta) = setup();
        store.put("backups/metafile", b"{not json").await.unwrap();

        let err = meta.load().await.unwrap_err();
        assert!(matches!(err, MetadataError::Json(_)));
    }
}

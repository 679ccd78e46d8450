//! Metadata Document
//!
//! The metafile is the only record of rotation state. Nothing is ever
//! inferred from store listings, so the document is checked structurally at
//! the deserialization boundary and a malformed one stops the cycle.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

const KEY_VOLUME_NAME: &str = "volume_name";
const KEY_SNAPSHOT_ID: &str = "current_snapshot_id";
const KEY_SNAPSHOT_NUM: &str = "snapshot_num";
const EXPECTED_KEYS: [&str; 3] = [KEY_VOLUME_NAME, KEY_SNAPSHOT_ID, KEY_SNAPSHOT_NUM];

/// Rotation state for one volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VolumeState {
    pub volume_name: String,
    /// Token naming the current rotation; replaced on promotion only
    pub current_snapshot_id: String,
    /// Snapshots taken in the current rotation
    pub snapshot_num: u32,
}

impl VolumeState {
    /// Fresh state for a volume seen for the first time
    pub fn new(volume_name: impl Into<String>, snapshot_id: impl Into<String>) -> Self {
        VolumeState {
            volume_name: volume_name.into(),
            current_snapshot_id: snapshot_id.into(),
            snapshot_num: 0,
        }
    }
}

/// Contents of the metafile
///
/// Entries keep insertion order; a volume is appended the first time it is
/// processed and never removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataDocument {
    pub volumes: Vec<VolumeState>,
}

impl MetadataDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, volume_name: &str) -> Option<&VolumeState> {
        self.volumes.iter().find(|v| v.volume_name == volume_name)
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    /// TigerStyle: Verify all invariants hold
    ///
    /// # Invariants
    /// - At most one entry per volume name
    #[cfg(debug_assertions)]
    pub fn verify_invariants(&self) {
        let mut seen = HashSet::new();
        for v in &self.volumes {
            debug_assert!(
                seen.insert(v.volume_name.as_str()),
                "Invariant violated: duplicate entry for volume '{}'",
                v.volume_name
            );
        }
    }
}

/// Structural defect in a metafile
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorruptMetadataError {
    /// Root is not a JSON object
    NotAnObject,
    /// Root has no `volumes` member
    MissingVolumes,
    /// `volumes` is present but not an array
    VolumesNotArray,
    /// An element of `volumes` is not an object
    EntryNotObject { index: usize },
    /// An entry lacks one of the three required keys
    MissingKey { index: usize, key: &'static str },
    /// An entry has a key outside the expected three
    UnexpectedKey { index: usize, key: String },
    /// A value has the wrong JSON type or range
    WrongType {
        index: usize,
        key: &'static str,
        expected: &'static str,
    },
    /// Two entries share a volume name
    DuplicateVolume(String),
}

impl std::fmt::Display for CorruptMetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CorruptMetadataError::NotAnObject => write!(f, "metafile is not a valid json object"),
            CorruptMetadataError::MissingVolumes => {
                write!(f, "metafile does not have a 'volumes' array in its root object")
            }
            CorruptMetadataError::VolumesNotArray => write!(f, "metafile 'volumes' is not an array"),
            CorruptMetadataError::EntryNotObject { index } => {
                write!(f, "volumes[{}] is not an object", index)
            }
            CorruptMetadataError::MissingKey { index, key } => {
                write!(f, "volumes[{}] is missing '{}' (3 elements expected)", index, key)
            }
            CorruptMetadataError::UnexpectedKey { index, key } => {
                write!(f, "volumes[{}] has unexpected key '{}'", index, key)
            }
            CorruptMetadataError::WrongType {
                index,
                key,
                expected,
            } => write!(f, "volumes[{}].{} must be {}", index, key, expected),
            CorruptMetadataError::DuplicateVolume(name) => {
                write!(f, "volume '{}' appears more than once", name)
            }
        }
    }
}

impl std::error::Error for CorruptMetadataError {}

/// Check a parsed metafile and convert it into a typed document
///
/// Every entry must carry exactly `volume_name`, `current_snapshot_id` and
/// `snapshot_num`; no repair is attempted.
pub fn validate(raw: &Value) -> Result<MetadataDocument, CorruptMetadataError> {
    let root = raw.as_object().ok_or(CorruptMetadataError::NotAnObject)?;
    let volumes = root
        .get("volumes")
        .ok_or(CorruptMetadataError::MissingVolumes)?
        .as_array()
        .ok_or(CorruptMetadataError::VolumesNotArray)?;

    let mut doc = MetadataDocument {
        volumes: Vec::with_capacity(volumes.len()),
    };
    let mut seen: HashSet<&str> = HashSet::with_capacity(volumes.len());

    for (index, entry) in volumes.iter().enumerate() {
        let obj = entry
            .as_object()
            .ok_or(CorruptMetadataError::EntryNotObject { index })?;

        for key in EXPECTED_KEYS {
            if !obj.contains_key(key) {
                return Err(CorruptMetadataError::MissingKey { index, key });
            }
        }
        if let Some(extra) = obj.keys().find(|k| !EXPECTED_KEYS.contains(&k.as_str())) {
            return Err(CorruptMetadataError::UnexpectedKey {
                index,
                key: extra.clone(),
            });
        }

        let volume_name = obj[KEY_VOLUME_NAME]
            .as_str()
            .ok_or(CorruptMetadataError::WrongType {
                index,
                key: KEY_VOLUME_NAME,
                expected: "a string",
            })?;
        let snapshot_id = obj[KEY_SNAPSHOT_ID]
            .as_str()
            .ok_or(CorruptMetadataError::WrongType {
                index,
                key: KEY_SNAPSHOT_ID,
                expected: "a string",
            })?;
        let snapshot_num = obj[KEY_SNAPSHOT_NUM]
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or(CorruptMetadataError::WrongType {
                index,
                key: KEY_SNAPSHOT_NUM,
                expected: "a non-negative integer",
            })?;

        if !seen.insert(volume_name) {
            return Err(CorruptMetadataError::DuplicateVolume(volume_name.to_string()));
        }

        doc.volumes.push(VolumeState {
            volume_name: volume_name.to_string(),
            current_snapshot_id: snapshot_id.to_string(),
            snapshot_num,
        });
    }

    #[cfg(debug_assertions)]
    doc.verify_invariants();

    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_document() {
        let raw = json!({
            "volumes": [
                {"volume_name": "db-data", "current_snapshot_id": "a1b2c3d4", "snapshot_num": 2},
                {"volume_name": "web-data", "current_snapshot_id": "ffee0011", "snapshot_num": 0}
            ]
        });
        let doc = validate(&raw).unwrap();
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.volumes[0].volume_name, "db-data");
        assert_eq!(doc.get("web-data").unwrap().current_snapshot_id, "ffee0011");
    }

    #[test]
    fn test_empty_volumes_is_valid() {
        let doc = validate(&json!({"volumes": []})).unwrap();
        assert!(doc.is_empty());
    }

    #[test]
    fn test_rejects_non_object_root() {
        assert_eq!(validate(&json!([1, 2])), Err(CorruptMetadataError::NotAnObject));
        assert_eq!(validate(&json!("volumes")), Err(CorruptMetadataError::NotAnObject));
    }

    #[test]
    fn test_rejects_missing_volumes() {
        assert_eq!(
            validate(&json!({"vols": []})),
            Err(CorruptMetadataError::MissingVolumes)
        );
        assert_eq!(
            validate(&json!({"volumes": {}})),
            Err(CorruptMetadataError::VolumesNotArray)
        );
    }

    #[test]
    fn test_rejects_too_few_keys() {
        let raw = json!({"volumes": [{"volume_name": "a", "current_snapshot_id": "x"}]});
        assert_eq!(
            validate(&raw),
            Err(CorruptMetadataError::MissingKey {
                index: 0,
                key: KEY_SNAPSHOT_NUM
            })
        );
    }

    #[test]
    fn test_rejects_extra_key() {
        let raw = json!({"volumes": [{
            "volume_name": "a",
            "current_snapshot_id": "x",
            "snapshot_num": 1,
            "extra": true
        }]});
        assert_eq!(
            validate(&raw),
            Err(CorruptMetadataError::UnexpectedKey {
                index: 0,
                key: "extra".to_string()
            })
        );
    }

    #[test]
    fn test_rejects_wrong_types() {
        let raw = json!({"volumes": [{"volume_name": 5, "current_snapshot_id": "x", "snapshot_num": 1}]});
        assert!(matches!(
            validate(&raw),
            Err(CorruptMetadataError::WrongType { key: KEY_VOLUME_NAME, .. })
        ));

        let raw = json!({"volumes": [{"volume_name": "a", "current_snapshot_id": "x", "snapshot_num": -1}]});
        assert!(matches!(
            validate(&raw),
            Err(CorruptMetadataError::WrongType { key: KEY_SNAPSHOT_NUM, .. })
        ));

        let raw = json!({"volumes": [{"volume_name": "a", "current_snapshot_id": "x", "snapshot_num": 1.5}]});
        assert!(matches!(
            validate(&raw),
            Err(CorruptMetadataError::WrongType { key: KEY_SNAPSHOT_NUM, .. })
        ));
    }

    #[test]
    fn test_rejects_entry_not_object() {
        let raw = json!({"volumes": ["db-data"]});
        assert_eq!(
            validate(&raw),
            Err(CorruptMetadataError::EntryNotObject { index: 0 })
        );
    }

    #[test]
    fn test_rejects_duplicate_volume() {
        let raw = json!({"volumes": [
            {"volume_name": "a", "current_snapshot_id": "x", "snapshot_num": 1},
            {"volume_name": "a", "current_snapshot_id": "y", "snapshot_num": 2}
        ]});
        assert_eq!(
            validate(&raw),
            Err(CorruptMetadataError::DuplicateVolume("a".to_string()))
        );
    }

    #[test]
    fn test_serialized_shape() {
        let doc = MetadataDocument {
            volumes: vec![VolumeState {
                volume_name: "a".to_string(),
                current_snapshot_id: "deadbeef".to_string(),
                snapshot_num: 3,
            }],
        };
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(
            value,
            json!({"volumes": [{"volume_name": "a", "current_snapshot_id": "deadbeef", "snapshot_num": 3}]})
        );
        assert_eq!(validate(&value).unwrap(), doc);
    }
}

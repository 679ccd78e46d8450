//! Object key layout
//!
//! ```text
//! {prefix}/metafile
//! {prefix}/{volume}/SNAPSHOT_{id}_{num}_{timestamp}.tar.gz
//! {prefix}/{volume}/BACKUP_{id}_{num}_{timestamp}.tar.gz
//! ```
//!
//! A snapshot *family* is every object sharing `SNAPSHOT_{id}_{num}_`. The
//! trailing underscore keeps `_1_` from matching `_10_`.

use crate::clock::Timestamp;
use crate::io::Rng;

pub const METAFILE_NAME: &str = "metafile";
pub const SNAPSHOT_TAG: &str = "SNAPSHOT";
pub const BACKUP_TAG: &str = "BACKUP";
pub const ARCHIVE_EXTENSION: &str = ".tar.gz";

/// Hex digits in a snapshot id
pub const SNAPSHOT_ID_LEN: usize = 8;

/// Builds every key the service reads or writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    prefix: String,
}

impl KeyLayout {
    pub fn new(directory_prefix: &str) -> Self {
        KeyLayout {
            prefix: directory_prefix.trim_matches('/').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn metafile_key(&self) -> String {
        format!("{}/{}", self.prefix, METAFILE_NAME)
    }

    /// Every object of a volume lives below this prefix
    pub fn volume_prefix(&self, volume: &str) -> String {
        format!("{}/{}/", self.prefix, volume)
    }

    pub fn snapshot_key(&self, volume: &str, snapshot_id: &str, num: u32, at: Timestamp) -> String {
        format!(
            "{}{}{}",
            self.snapshot_family_prefix(volume, snapshot_id, num),
            at.to_key_string(),
            ARCHIVE_EXTENSION
        )
    }

    /// Prefix matching every upload made for `(snapshot_id, num)`
    pub fn snapshot_family_prefix(&self, volume: &str, snapshot_id: &str, num: u32) -> String {
        format!(
            "{}{}_{}_{}_",
            self.volume_prefix(volume),
            SNAPSHOT_TAG,
            snapshot_id,
            num
        )
    }

    pub fn backup_key(&self, volume: &str, snapshot_id: &str, num: u32, at: Timestamp) -> String {
        format!(
            "{}{}_{}_{}_{}{}",
            self.volume_prefix(volume),
            BACKUP_TAG,
            snapshot_id,
            num,
            at.to_key_string(),
            ARCHIVE_EXTENSION
        )
    }

    /// Strip the directory prefix, giving the key relative to the prefix
    /// namespace (`{volume}/SNAPSHOT_...`)
    pub fn relative<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(key)
    }
}

/// Whether a stored archive is a rotating snapshot or a promoted backup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Snapshot,
    Backup,
}

/// Parsed form of a snapshot or backup key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveName {
    pub kind: ArchiveKind,
    pub volume: String,
    pub snapshot_id: String,
    pub num: u32,
    pub timestamp: String,
}

impl KeyLayout {
    /// Parse a key written by `snapshot_key` or `backup_key`
    ///
    /// Returns `None` for the metafile and for anything outside the prefix.
    pub fn parse(&self, key: &str) -> Option<ArchiveName> {
        let rest = key
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix('/')?;
        let (volume, file) = rest.split_once('/')?;
        let stem = file.strip_suffix(ARCHIVE_EXTENSION)?;

        let mut parts = stem.splitn(4, '_');
        let kind = match parts.next()? {
            SNAPSHOT_TAG => ArchiveKind::Snapshot,
            BACKUP_TAG => ArchiveKind::Backup,
            _ => return None,
        };
        let snapshot_id = parts.next()?;
        let num = parts.next()?.parse().ok()?;
        let timestamp = parts.next()?;
        if volume.is_empty() || snapshot_id.is_empty() || timestamp.is_empty() {
            return None;
        }

        Some(ArchiveName {
            kind,
            volume: volume.to_string(),
            snapshot_id: snapshot_id.to_string(),
            num,
            timestamp: timestamp.to_string(),
        })
    }
}

/// Fresh random snapshot id (lowercase hex)
pub fn generate_snapshot_id<R: Rng>(rng: &mut R) -> String {
    format!("{:08x}", rng.next_u64() & 0xffff_ffff)
}

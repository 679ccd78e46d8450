//! Service Configuration
//!
//! `BackupConfig` is built once at startup and passed by reference to every
//! component. Only this module looks at the process environment.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | Config_File | - | Optional TOML file, read before the variables below |
//! | Store_Type | s3 | memory, localfs, or s3 |
//! | Local_Store_Path | /data/volsnap | LocalFs base directory |
//! | S3_Bucket_Name | - | S3 bucket name (required for s3) |
//! | S3_Region | us-east-1 | S3 region |
//! | S3_Endpoint | - | Custom endpoint (MinIO, Wasabi, ...) |
//! | S3_Access_Key | - | S3 credentials |
//! | S3_Secret_Key | - | S3 credentials |
//! | S3_Directory_Name | docker_backups | Key prefix for every object |
//! | Volumes_To_Backup | - | Comma separated volume names (required) |
//! | Host_Volume_Root | /HostVolumeData | Directory holding the volumes |
//! | Scratch_Dir | /tmp/volsnap | Where archives are staged before upload |
//! | Rotation_Interval | 24 | Hours between cycles |
//! | Backup_Interval | 7 | Snapshots per rotation before promotion |
//! | Run_On_Startup | true | Run a cycle immediately on start |
//! | Operation_Timeout_Secs | 300 | Per store operation timeout |
//! | Cycle_Deadline_Secs | 21600 | Whole cycle deadline |
//! | Retry_Max_Attempts | 3 | Attempts per store operation |
//! | Log_Level | INFO | trace, debug, info, warn, error |
//! | Log_Format | text | text or json |

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_DIRECTORY_PREFIX: &str = "docker_backups";
const DEFAULT_HOST_VOLUME_ROOT: &str = "/HostVolumeData";
const DEFAULT_SCRATCH_DIR: &str = "/tmp/volsnap";
const DEFAULT_LOCAL_STORE_PATH: &str = "/data/volsnap";
#[cfg(feature = "s3")]
const DEFAULT_S3_REGION: &str = "us-east-1";
const DEFAULT_ROTATION_INTERVAL_HOURS: u64 = 24;
const DEFAULT_BACKUP_INTERVAL: u32 = 7;

// Explicit limits with _MAX suffix
const BACKUP_INTERVAL_MAX: u32 = 10_000;
const ROTATION_INTERVAL_HOURS_MAX: u64 = 24 * 366;
const RETRY_ATTEMPTS_MAX: u32 = 20;

/// Errors raised while loading or validating configuration
#[derive(Debug)]
pub enum ConfigError {
    /// `Volumes_To_Backup` unset or empty
    NoVolumes,
    /// A numeric setting did not parse
    InvalidNumber { key: String, value: String },
    /// A boolean setting did not parse
    InvalidBool { key: String, value: String },
    /// `Store_Type` names an unknown or disabled backend
    UnknownStoreType(String),
    /// S3 store selected without a bucket
    MissingBucket,
    /// Config file could not be read or parsed
    File { path: PathBuf, message: String },
    /// A value is out of its allowed range
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NoVolumes => write!(f, "No volumes were specified"),
            ConfigError::InvalidNumber { key, value } => {
                write!(f, "{} must be a non-negative integer, got '{}'", key, value)
            }
            ConfigError::InvalidBool { key, value } => {
                write!(f, "{} must be true or false, got '{}'", key, value)
            }
            ConfigError::UnknownStoreType(t) => write!(f, "Unknown store type: {}", t),
            ConfigError::MissingBucket => write!(f, "S3_Bucket_Name required for S3 store type"),
            ConfigError::File { path, message } => {
                write!(f, "Config file {}: {}", path.display(), message)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Type of object store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectStoreType {
    /// In-memory store (for tests)
    InMemory,
    /// Local filesystem
    LocalFs,
    /// Amazon S3 or compatible
    #[cfg(feature = "s3")]
    S3,
}

impl ObjectStoreType {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_lowercase().as_str() {
            "memory" | "inmemory" => Ok(ObjectStoreType::InMemory),
            "localfs" | "local" => Ok(ObjectStoreType::LocalFs),
            #[cfg(feature = "s3")]
            "s3" => Ok(ObjectStoreType::S3),
            other => Err(ConfigError::UnknownStoreType(other.to_string())),
        }
    }
}

impl Default for ObjectStoreType {
    fn default() -> Self {
        #[cfg(feature = "s3")]
        {
            ObjectStoreType::S3
        }
        #[cfg(not(feature = "s3"))]
        {
            ObjectStoreType::LocalFs
        }
    }
}

/// S3 configuration
#[cfg(feature = "s3")]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    /// S3 bucket name
    pub bucket: String,
    /// AWS region
    pub region: String,
    /// Custom endpoint (for S3-compatible services like MinIO)
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    #[serde(skip_serializing)]
    pub secret_access_key: Option<String>,
}

#[cfg(feature = "s3")]
impl Default for S3Config {
    fn default() -> Self {
        S3Config {
            bucket: String::new(),
            region: DEFAULT_S3_REGION.to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

/// Retry policy for individual store operations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first (1 disables retries)
    pub max_attempts: u32,
    #[serde(with = "duration_millis")]
    pub initial_backoff: Duration,
    #[serde(with = "duration_millis")]
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// Fast retries for tests
    pub fn test() -> Self {
        RetryConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        }
    }

    /// Backoff before retry number `attempt` (1-based), doubling each time
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive, e.g. `INFO` or `volsnap=debug`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "INFO".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Main configuration for the backup service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Object store type
    pub store_type: ObjectStoreType,
    /// Local filesystem path (for LocalFs store)
    pub local_path: Option<PathBuf>,
    /// S3 configuration (for S3 store)
    #[cfg(feature = "s3")]
    pub s3: Option<S3Config>,
    /// Key prefix for all objects in the store
    pub directory_prefix: String,
    /// Volume names requested for backup
    pub volumes: Vec<String>,
    /// Directory whose children are the host's volumes
    pub host_volume_root: PathBuf,
    /// Staging directory for archives
    pub scratch_dir: PathBuf,
    /// Time between cycles
    #[serde(with = "duration_secs")]
    pub rotation_interval: Duration,
    /// Snapshots taken per rotation before the aging one is promoted
    pub backup_interval: u32,
    /// Run one cycle as soon as the scheduler starts
    pub run_on_startup: bool,
    /// Timeout for a single store operation
    #[serde(with = "duration_secs")]
    pub operation_timeout: Duration,
    /// Deadline for a whole cycle
    #[serde(with = "duration_secs")]
    pub cycle_deadline: Duration,
    pub retry: RetryConfig,
    pub log: LogConfig,
}

impl Default for BackupConfig {
    fn default() -> Self {
        BackupConfig {
            store_type: ObjectStoreType::default(),
            local_path: None,
            #[cfg(feature = "s3")]
            s3: None,
            directory_prefix: DEFAULT_DIRECTORY_PREFIX.to_string(),
            volumes: Vec::new(),
            host_volume_root: PathBuf::from(DEFAULT_HOST_VOLUME_ROOT),
            scratch_dir: PathBuf::from(DEFAULT_SCRATCH_DIR),
            rotation_interval: Duration::from_secs(DEFAULT_ROTATION_INTERVAL_HOURS * 3600),
            backup_interval: DEFAULT_BACKUP_INTERVAL,
            run_on_startup: true,
            operation_timeout: Duration::from_secs(300),
            cycle_deadline: Duration::from_secs(6 * 3600),
            retry: RetryConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl BackupConfig {
    /// Create config for local development
    pub fn local(store_path: PathBuf, host_volume_root: PathBuf, scratch_dir: PathBuf) -> Self {
        BackupConfig {
            store_type: ObjectStoreType::LocalFs,
            local_path: Some(store_path),
            host_volume_root,
            scratch_dir,
            ..BackupConfig::default()
        }
    }

    /// Create config for testing (in-memory store, fast timeouts)
    pub fn test() -> Self {
        BackupConfig {
            store_type: ObjectStoreType::InMemory,
            directory_prefix: "test".to_string(),
            backup_interval: 2,
            rotation_interval: Duration::from_millis(50),
            run_on_startup: true,
            operation_timeout: Duration::from_secs(5),
            cycle_deadline: Duration::from_secs(30),
            retry: RetryConfig::test(),
            ..BackupConfig::default()
        }
    }

    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup
    ///
    /// If `Config_File` is set the TOML file is parsed first; every other
    /// variable that is present overrides the file.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = match get("Config_File") {
            Some(path) => Self::from_toml_file(Path::new(path.trim()))?,
            None => BackupConfig::default(),
        };

        if let Some(v) = get("Store_Type") {
            config.store_type = ObjectStoreType::parse(&v)?;
        }
        if let Some(v) = get("Local_Store_Path") {
            config.local_path = Some(PathBuf::from(v));
        }

        #[cfg(feature = "s3")]
        {
            let bucket = get("S3_Bucket_Name");
            let region = get("S3_Region");
            let endpoint = get("S3_Endpoint");
            let access_key = get("S3_Access_Key");
            let secret_key = get("S3_Secret_Key");
            let any_set = bucket.is_some()
                || region.is_some()
                || endpoint.is_some()
                || access_key.is_some()
                || secret_key.is_some();
            if any_set {
                let s3 = config.s3.get_or_insert_with(S3Config::default);
                if let Some(v) = bucket {
                    s3.bucket = v;
                }
                if let Some(v) = region {
                    s3.region = v;
                }
                if endpoint.is_some() {
                    s3.endpoint = endpoint;
                }
                if access_key.is_some() {
                    s3.access_key_id = access_key;
                }
                if secret_key.is_some() {
                    s3.secret_access_key = secret_key;
                }
            }
        }

        if let Some(v) = get("S3_Directory_Name") {
            config.directory_prefix = v;
        }
        if let Some(v) = lookup("Volumes_To_Backup") {
            config.volumes = parse_volume_list(&v);
        }
        if let Some(v) = get("Host_Volume_Root") {
            config.host_volume_root = PathBuf::from(v);
        }
        if let Some(v) = get("Scratch_Dir") {
            config.scratch_dir = PathBuf::from(v);
        }
        if let Some(v) = get("Rotation_Interval") {
            let hours = parse_u64("Rotation_Interval", &v)?;
            config.rotation_interval = Duration::from_secs(hours.saturating_mul(3600));
        }
        if let Some(v) = get("Backup_Interval") {
            let interval = parse_u64("Backup_Interval", &v)?;
            config.backup_interval = u32::try_from(interval).map_err(|_| {
                ConfigError::Invalid(format!("Backup_Interval too large: {}", interval))
            })?;
        }
        if let Some(v) = get("Run_On_Startup") {
            config.run_on_startup = parse_bool("Run_On_Startup", &v)?;
        }
        if let Some(v) = get("Operation_Timeout_Secs") {
            config.operation_timeout = Duration::from_secs(parse_u64("Operation_Timeout_Secs", &v)?);
        }
        if let Some(v) = get("Cycle_Deadline_Secs") {
            config.cycle_deadline = Duration::from_secs(parse_u64("Cycle_Deadline_Secs", &v)?);
        }
        if let Some(v) = get("Retry_Max_Attempts") {
            let attempts = parse_u64("Retry_Max_Attempts", &v)?;
            config.retry.max_attempts = u32::try_from(attempts).unwrap_or(u32::MAX);
        }
        if let Some(v) = get("Log_Level") {
            config.log.level = v.trim().to_string();
        }
        if let Some(v) = get("Log_Format") {
            config.log.format = match v.trim().to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" | "plain" => LogFormat::Text,
                other => {
                    return Err(ConfigError::Invalid(format!("unknown Log_Format '{}'", other)))
                }
            };
        }

        config.directory_prefix = config.directory_prefix.trim_matches('/').to_string();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::File {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::File {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.volumes.is_empty() {
            return Err(ConfigError::NoVolumes);
        }
        if self.backup_interval == 0 || self.backup_interval > BACKUP_INTERVAL_MAX {
            return Err(ConfigError::Invalid(format!(
                "backup_interval must be in [1, {}], got {}",
                BACKUP_INTERVAL_MAX, self.backup_interval
            )));
        }
        if self.directory_prefix.is_empty() {
            return Err(ConfigError::Invalid("directory prefix must not be empty".to_string()));
        }
        if self.rotation_interval.is_zero()
            || self.rotation_interval > Duration::from_secs(ROTATION_INTERVAL_HOURS_MAX * 3600)
        {
            return Err(ConfigError::Invalid(format!(
                "rotation interval must be in (0, {}h], got {:?}",
                ROTATION_INTERVAL_HOURS_MAX, self.rotation_interval
            )));
        }
        if self.operation_timeout.is_zero() || self.cycle_deadline.is_zero() {
            return Err(ConfigError::Invalid("timeouts must be positive".to_string()));
        }
        if self.retry.max_attempts == 0 || self.retry.max_attempts > RETRY_ATTEMPTS_MAX {
            return Err(ConfigError::Invalid(format!(
                "retry attempts must be in [1, {}], got {}",
                RETRY_ATTEMPTS_MAX, self.retry.max_attempts
            )));
        }
        #[cfg(feature = "s3")]
        if self.store_type == ObjectStoreType::S3 {
            match &self.s3 {
                Some(s3) if !s3.bucket.trim().is_empty() => {}
                _ => return Err(ConfigError::MissingBucket),
            }
        }
        Ok(())
    }

    /// Base directory for the LocalFs backend
    pub fn local_store_path(&self) -> PathBuf {
        self.local_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCAL_STORE_PATH))
    }
}

/// Split `a, b ,,c` into `["a", "b", "c"]`, dropping duplicates
fn parse_volume_list(raw: &str) -> Vec<String> {
    let mut volumes: Vec<String> = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !volumes.iter().any(|v| v == name) {
            volumes.push(name.to_string());
        }
    }
    volumes
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Serde helper for Duration as whole seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde helper for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_minimal_local_config() {
        let config = BackupConfig::from_lookup(lookup_from(&[
            ("Store_Type", "localfs"),
            ("Volumes_To_Backup", "db-data, web-data"),
        ]))
        .unwrap();

        assert_eq!(config.store_type, ObjectStoreType::LocalFs);
        assert_eq!(config.volumes, vec!["db-data", "web-data"]);
        assert_eq!(config.directory_prefix, DEFAULT_DIRECTORY_PREFIX);
        assert_eq!(config.host_volume_root, PathBuf::from("/HostVolumeData"));
        assert_eq!(config.rotation_interval, Duration::from_secs(24 * 3600));
        assert_eq!(config.log.level, "INFO");
    }

    #[test]
    fn test_no_volumes_is_fatal() {
        let err = BackupConfig::from_lookup(lookup_from(&[("Store_Type", "memory")])).unwrap_err();
        assert!(matches!(err, ConfigError::NoVolumes));

        let err = BackupConfig::from_lookup(lookup_from(&[
            ("Store_Type", "memory"),
            ("Volumes_To_Backup", " , ,"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::NoVolumes));
    }

    #[test]
    fn test_volume_list_dedup_preserves_order() {
        assert_eq!(parse_volume_list("b,a,b, c"), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_invalid_numbers_and_bools() {
        let err = BackupConfig::from_lookup(lookup_from(&[
            ("Store_Type", "memory"),
            ("Volumes_To_Backup", "v"),
            ("Backup_Interval", "-1"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { .. }));

        let err = BackupConfig::from_lookup(lookup_from(&[
            ("Store_Type", "memory"),
            ("Volumes_To_Backup", "v"),
            ("Run_On_Startup", "maybe"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBool { .. }));
    }

    #[test]
    fn test_zero_backup_interval_rejected() {
        let err = BackupConfig::from_lookup(lookup_from(&[
            ("Store_Type", "memory"),
            ("Volumes_To_Backup", "v"),
            ("Backup_Interval", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rotation_interval_bounds() {
        let huge = u64::MAX.to_string();
        for hours in ["0", "8785", huge.as_str()] {
            let err = BackupConfig::from_lookup(lookup_from(&[
                ("Store_Type", "memory"),
                ("Volumes_To_Backup", "v"),
                ("Rotation_Interval", hours),
            ]))
            .unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{} hours accepted", hours);
        }

        let config = BackupConfig::from_lookup(lookup_from(&[
            ("Store_Type", "memory"),
            ("Volumes_To_Backup", "v"),
            ("Rotation_Interval", "8784"),
        ]))
        .unwrap();
        assert_eq!(config.rotation_interval, Duration::from_secs(8784 * 3600));
    }

    #[test]
    fn test_unknown_store_type() {
        let err = BackupConfig::from_lookup(lookup_from(&[
            ("Store_Type", "ftp"),
            ("Volumes_To_Backup", "v"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownStoreType(_)));
    }

    #[cfg(feature = "s3")]
    #[test]
    fn test_s3_settings() {
        let config = BackupConfig::from_lookup(lookup_from(&[
            ("Volumes_To_Backup", "v"),
            ("S3_Bucket_Name", "backups"),
            ("S3_Endpoint", "http://minio:9000"),
            ("S3_Access_Key", "ak"),
            ("S3_Secret_Key", "sk"),
            ("S3_Directory_Name", "/host-a/"),
        ]))
        .unwrap();

        assert_eq!(config.store_type, ObjectStoreType::S3);
        let s3 = config.s3.unwrap();
        assert_eq!(s3.bucket, "backups");
        assert_eq!(s3.region, DEFAULT_S3_REGION);
        assert_eq!(s3.endpoint.as_deref(), Some("http://minio:9000"));
        assert_eq!(s3.access_key_id.as_deref(), Some("ak"));
        assert_eq!(config.directory_prefix, "host-a");
    }

    #[cfg(feature = "s3")]
    #[test]
    fn test_s3_requires_bucket() {
        let err = BackupConfig::from_lookup(lookup_from(&[("Volumes_To_Backup", "v")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingBucket));
    }

    #[test]
    fn test_toml_file_overridden_by_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("volsnap.toml");
        std::fs::write(
            &path,
            r#"
store_type = "LocalFs"
directory_prefix = "from-file"
volumes = ["a", "b"]
backup_interval = 4
rotation_interval = 60

[log]
level = "debug"
format = "json"
"#,
        )
        .unwrap();

        let path_str = path.to_string_lossy().to_string();
        let config = BackupConfig::from_lookup(lookup_from(&[
            ("Config_File", path_str.as_str()),
            ("Backup_Interval", "9"),
        ]))
        .unwrap();

        assert_eq!(config.store_type, ObjectStoreType::LocalFs);
        assert_eq!(config.directory_prefix, "from-file");
        assert_eq!(config.volumes, vec!["a", "b"]);
        assert_eq!(config.backup_interval, 9);
        assert_eq!(config.rotation_interval, Duration::from_secs(60));
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn test_missing_config_file() {
        let err = BackupConfig::from_lookup(lookup_from(&[
            ("Config_File", "/definitely/not/here.toml"),
            ("Volumes_To_Backup", "v"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::File { .. }));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let retry = RetryConfig {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };
        assert_eq!(retry.backoff_for(1), Duration::from_millis(100));
        assert_eq!(retry.backoff_for(2), Duration::from_millis(200));
        assert_eq!(retry.backoff_for(3), Duration::from_millis(350));
        assert_eq!(retry.backoff_for(30), Duration::from_millis(350));
    }

    #[test]
    fn test_config_serialization() {
        let config = BackupConfig::test();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: BackupConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.backup_interval, config.backup_interval);
        assert_eq!(parsed.retry.initial_backoff, config.retry.initial_backoff);
    }
}

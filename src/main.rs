//! volsnap daemon
//!
//! Archives Docker host volumes on a schedule and keeps a rotating set of
//! snapshots plus permanent backups in an object store.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | Volumes_To_Backup | - | Comma-separated volume names (required) |
//! | Store_Type | s3 | memory, localfs, or s3 |
//! | Local_Store_Path | /data/volsnap | LocalFs path |
//! | S3_Bucket_Name | - | S3 bucket name |
//! | S3_Directory_Name | docker_backups | Key prefix inside the bucket |
//! | S3_Endpoint | - | MinIO / custom endpoint URL |
//! | S3_Region | us-east-1 | S3 region |
//! | S3_Access_Key | - | S3 credentials |
//! | S3_Secret_Key | - | S3 credentials |
//! | Host_Volume_Root | /HostVolumeData | Where host volumes are mounted |
//! | Scratch_Dir | /tmp/volsnap | Staging area for archives |
//! | Rotation_Interval | 24 | Hours between cycles |
//! | Backup_Interval | 7 | Snapshots per rotation before promotion |
//! | Run_On_Startup | true | Run a cycle immediately |
//! | Operation_Timeout_Secs | 300 | Per store operation |
//! | Cycle_Deadline_Secs | 21600 | Whole cycle |
//! | Retry_Max_Attempts | 3 | Attempts per store operation |
//! | Log_Level | INFO | Log level (RUST_LOG overrides) |
//! | Log_Format | text | text or json |
//! | Config_File | - | TOML file read before the variables above |

use std::process::ExitCode;
use tracing::{error, info, warn};
use volsnap::archive::HostVolumes;
use volsnap::config::{BackupConfig, ConfigError, LogConfig};
use volsnap::io::ProductionRng;
use volsnap::observability::init_tracing;
use volsnap::{create_store, BackupCycle, Scheduler, SystemClock, TarGzArchiver};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match BackupConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            // Tracing is not configured yet; fall back to defaults to report
            if let Err(init) = init_tracing(&LogConfig::default()) {
                eprintln!("CRITICAL: failed to initialize logging: {}", init);
            }
            match e {
                ConfigError::NoVolumes => error!("CRITICAL: No volumes were specified"),
                other => error!("CRITICAL: invalid configuration: {}", other),
            }
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_tracing(&config.log) {
        eprintln!("CRITICAL: failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    info!("volsnap starting");
    info!("  Store: {:?}", config.store_type);
    info!("  Prefix: {}", config.directory_prefix);
    info!("  Volumes: {:?}", config.volumes);
    info!(
        "  Rotation: every {:?}, promote after {} snapshot(s)",
        config.rotation_interval, config.backup_interval
    );

    match HostVolumes::list(&config.host_volume_root).await {
        Ok(names) => info!(
            "Contents of host volumes directory {}: {:?}",
            config.host_volume_root.display(),
            names
        ),
        Err(e) => warn!(
            "Could not list host volumes directory {}: {}",
            config.host_volume_root.display(),
            e
        ),
    }

    let store = match create_store(&config) {
        Ok(store) => store,
        Err(e) => {
            error!("CRITICAL: failed to create object store client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let archiver = TarGzArchiver::new(config.host_volume_root.clone(), config.scratch_dir.clone());
    let mut cycle = BackupCycle::new(
        &config,
        store,
        archiver,
        SystemClock::new(),
        ProductionRng::new(),
    );

    let scheduler = Scheduler::new(config.rotation_interval, config.run_on_startup);
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let stats = scheduler.run(&mut cycle, shutdown).await;
    info!(
        "volsnap stopped: {} cycle(s), {} failed, {} promotion(s), {} bytes uploaded",
        stats.cycles_run, stats.cycles_failed, stats.total_promotions, stats.total_uploaded_bytes
    );
    ExitCode::SUCCESS
}

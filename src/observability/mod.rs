//! Logging setup
//!
//! One global `tracing` subscriber for the daemon. `RUST_LOG` wins when set,
//! otherwise the configured level is used.

use crate::config::{LogConfig, LogFormat};
use tracing_subscriber::{fmt, EnvFilter};

/// Error returned when a global subscriber is already installed or the
/// filter directive does not parse
pub type InitError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Build the filter from `RUST_LOG` or the configured level
pub fn build_filter(config: &LogConfig) -> Result<EnvFilter, InitError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(config.level.to_lowercase())?),
    }
}

/// Install the global subscriber
pub fn init_tracing(config: &LogConfig) -> Result<(), InitError> {
    let filter = build_filter(config)?;

    match config.format {
        LogFormat::Text => fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .try_init(),
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .try_init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_accepts_uppercase_level() {
        let config = LogConfig {
            level: "WARN".to_string(),
            format: LogFormat::Text,
        };
        assert!(build_filter(&config).is_ok());
    }

    #[test]
    fn test_filter_accepts_target_directives() {
        let config = LogConfig {
            level: "volsnap=debug,object_store=warn".to_string(),
            format: LogFormat::Json,
        };
        assert!(build_filter(&config).is_ok());
    }
}

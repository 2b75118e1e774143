// src/utils/config.rs
//! Recorder configuration
//!
//! Loaded from an optional `recorder.toml` file, then overridden by
//! `RECORDER__*` environment variables (e.g. `RECORDER__FLUSH_INTERVAL_MS=500`).

use crate::recording::compressor::CompressionLevel;
use crate::storage::OpenMode;
use crate::utils::errors::{RecorderError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default config file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "recorder.toml";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "RECORDER";

/// Recorder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Container file path
    pub path: PathBuf,

    /// Minimum gap between flush completions (milliseconds)
    pub flush_interval_ms: u64,

    /// Truncate or append to an existing container at open
    pub open_mode: OpenMode,

    /// Compression for newly created tables
    pub compression: CompressionLevel,

    /// Emit logs as JSON lines
    pub log_json: bool,

    /// Prometheus listen address, e.g. "127.0.0.1:9000"
    pub metrics_addr: Option<String>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("recording.db"),
            flush_interval_ms: 2000,
            open_mode: OpenMode::Truncate,
            compression: CompressionLevel::None,
            log_json: false,
            metrics_addr: None,
        }
    }
}

impl RecorderConfig {
    /// Load from `recorder.toml` (if present) and the environment
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from the given file (if present) and the environment
    pub fn load_from<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        debug!("Loading recorder configuration from {:?}", file);

        let config: RecorderConfig = Config::builder()
            .add_source(File::from(file).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.flush_interval_ms == 0 {
            return Err(RecorderError::Config(
                "flush_interval_ms must be positive".to_string(),
            ));
        }

        if self.path.as_os_str().is_empty() {
            return Err(RecorderError::Config("path must not be empty".to_string()));
        }

        if let Some(addr) = &self.metrics_addr {
            addr.parse::<SocketAddr>().map_err(|e| {
                RecorderError::Config(format!("Invalid metrics_addr '{}': {}", addr, e))
            })?;
        }

        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn metrics_socket(&self) -> Option<SocketAddr> {
        self.metrics_addr.as_deref().and_then(|a| a.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = RecorderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.flush_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = RecorderConfig {
            flush_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(RecorderError::Config(_))));
    }

    #[test]
    fn test_bad_metrics_addr_rejected() {
        let config = RecorderConfig {
            metrics_addr: Some("not-an-addr".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "path = \"frames.db\"\nflush_interval_ms = 250\nopen_mode = \"append\"\ncompression = \"fast\""
        )
        .unwrap();

        let config = RecorderConfig::load_from(file.path()).unwrap();
        assert_eq!(config.path, PathBuf::from("frames.db"));
        assert_eq!(config.flush_interval_ms, 250);
        assert_eq!(config.open_mode, OpenMode::Append);
        assert_eq!(config.compression, CompressionLevel::Fast);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RecorderConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.flush_interval_ms, 2000);
    }
}

//! Application configuration management.
//!
//! Handles loading, saving, and validating the pipeline's settings: the
//! scratch directory for session artifacts, the artifact size cap, the
//! session TTL, and the per-stage deadlines.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Default maximum artifact size: 50 MB.
pub const DEFAULT_MAX_ARTIFACT_BYTES: u64 = 50 * 1024 * 1024;

/// Default session timeout: 5 minutes of inactivity.
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 300;

/// Default download stage deadline.
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 120;

/// Default conversion stage deadline.
pub const DEFAULT_CONVERT_TIMEOUT_SECS: u64 = 120;

/// Default delivery stage deadline.
pub const DEFAULT_DELIVER_TIMEOUT_SECS: u64 = 60;

/// Pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    /// Writable scratch directory for session artifacts.
    pub scratch_dir: PathBuf,
    /// Maximum artifact size in bytes; downloads exceeding it are aborted.
    #[serde(default = "default_max_artifact_bytes")]
    pub max_artifact_bytes: u64,
    /// Seconds of inactivity after which a session expires.
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,
    /// Deadline for the download stage, in seconds.
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,
    /// Deadline for the conversion stage, in seconds.
    #[serde(default = "default_convert_timeout")]
    pub convert_timeout_secs: u64,
    /// Deadline for the delivery stage, in seconds.
    #[serde(default = "default_deliver_timeout")]
    pub deliver_timeout_secs: u64,
}

const fn default_max_artifact_bytes() -> u64 {
    DEFAULT_MAX_ARTIFACT_BYTES
}

const fn default_session_timeout() -> u64 {
    DEFAULT_SESSION_TIMEOUT_SECS
}

const fn default_download_timeout() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

const fn default_convert_timeout() -> u64 {
    DEFAULT_CONVERT_TIMEOUT_SECS
}

const fn default_deliver_timeout() -> u64 {
    DEFAULT_DELIVER_TIMEOUT_SECS
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir().join("vidgram"),
            max_artifact_bytes: DEFAULT_MAX_ARTIFACT_BYTES,
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            convert_timeout_secs: DEFAULT_CONVERT_TIMEOUT_SECS,
            deliver_timeout_secs: DEFAULT_DELIVER_TIMEOUT_SECS,
        }
    }
}

impl AppConfig {
    /// Replace zero values with their defaults.
    pub fn validate(&mut self) {
        if self.max_artifact_bytes == 0 {
            warn!("max_artifact_bytes of 0 replaced with default");
            self.max_artifact_bytes = DEFAULT_MAX_ARTIFACT_BYTES;
        }
        if self.session_timeout_secs == 0 {
            warn!("session_timeout_secs of 0 replaced with default");
            self.session_timeout_secs = DEFAULT_SESSION_TIMEOUT_SECS;
        }
        if self.download_timeout_secs == 0 {
            self.download_timeout_secs = DEFAULT_DOWNLOAD_TIMEOUT_SECS;
        }
        if self.convert_timeout_secs == 0 {
            self.convert_timeout_secs = DEFAULT_CONVERT_TIMEOUT_SECS;
        }
        if self.deliver_timeout_secs == 0 {
            self.deliver_timeout_secs = DEFAULT_DELIVER_TIMEOUT_SECS;
        }
    }

    /// Session TTL as a [`Duration`].
    #[must_use]
    pub const fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    /// Download stage deadline as a [`Duration`].
    #[must_use]
    pub const fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// Conversion stage deadline as a [`Duration`].
    #[must_use]
    pub const fn convert_timeout(&self) -> Duration {
        Duration::from_secs(self.convert_timeout_secs)
    }

    /// Delivery stage deadline as a [`Duration`].
    #[must_use]
    pub const fn deliver_timeout(&self) -> Duration {
        Duration::from_secs(self.deliver_timeout_secs)
    }

    /// Worst-case duration of one Processing attempt: the sum of the stage
    /// deadlines. The session sweep adds this on top of the TTL before it
    /// will reclaim a `Processing` session, so it cannot reset an attempt
    /// that is still inside its deadlines.
    #[must_use]
    pub const fn processing_grace(&self) -> Duration {
        Duration::from_secs(
            self.download_timeout_secs + self.convert_timeout_secs + self.deliver_timeout_secs,
        )
    }
}

/// Loads and saves the configuration as JSON at a fixed path.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    /// Create a manager for the given config file path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the managed config file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the configuration, falling back to defaults when the file does
    /// not exist. Values are validated after loading.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default(&self) -> Result<AppConfig> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no config file, using defaults");
            return Ok(AppConfig::default());
        }

        let contents = fs::read_to_string(&self.path).map_err(|e| {
            Error::Configuration(format!(
                "cannot read config at {}: {e}",
                self.path.display()
            ))
        })?;
        let mut config: AppConfig = serde_json::from_str(&contents).map_err(|e| {
            Error::Configuration(format!(
                "cannot parse config at {}: {e}",
                self.path.display()
            ))
        })?;
        config.validate();
        info!(path = %self.path.display(), "loaded configuration");
        Ok(config)
    }

    /// Save the configuration as pretty-printed JSON, creating parent
    /// directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let contents = serde_json::to_string_pretty(config)?;
        fs::write(&self.path, contents)?;
        debug!(path = %self.path.display(), "saved configuration");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.max_artifact_bytes, 50 * 1024 * 1024);
        assert_eq!(config.session_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_processing_grace_covers_all_stage_deadlines() {
        let config = AppConfig::default();
        assert_eq!(
            config.processing_grace(),
            config.download_timeout() + config.convert_timeout() + config.deliver_timeout()
        );
    }

    #[test]
    fn test_validate_replaces_zero_values() {
        let mut config = AppConfig {
            max_artifact_bytes: 0,
            session_timeout_secs: 0,
            ..AppConfig::default()
        };
        config.validate();
        assert_eq!(config.max_artifact_bytes, DEFAULT_MAX_ARTIFACT_BYTES);
        assert_eq!(config.session_timeout_secs, DEFAULT_SESSION_TIMEOUT_SECS);
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = TempDir::new().expect("tempdir");
        let manager = ConfigManager::new(dir.path().join("config.json"));
        let config = manager.load_or_default().expect("defaults");
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_save_and_reload_round_trip() {
        let dir = TempDir::new().expect("tempdir");
        let manager = ConfigManager::new(dir.path().join("nested").join("config.json"));

        let config = AppConfig {
            scratch_dir: PathBuf::from("/var/tmp/vidgram"),
            max_artifact_bytes: 10 * 1024 * 1024,
            ..AppConfig::default()
        };
        manager.save(&config).expect("save");

        let loaded = manager.load_or_default().expect("load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"scratch_dir": "/tmp/elsewhere"}"#).expect("write");

        let config = ConfigManager::new(&path).load_or_default().expect("load");
        assert_eq!(config.scratch_dir, PathBuf::from("/tmp/elsewhere"));
        assert_eq!(config.max_artifact_bytes, DEFAULT_MAX_ARTIFACT_BYTES);
    }

    #[test]
    fn test_malformed_file_is_a_configuration_error() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").expect("write");

        let err = ConfigManager::new(&path)
            .load_or_default()
            .expect_err("must fail");
        assert!(matches!(err, Error::Configuration(_)));
    }
}

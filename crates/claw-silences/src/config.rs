//! Configuration for the silencing subsystem.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SilenceError};

/// Configuration for the silence coordinator and its background workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SilenceConfig {
    /// How often the expiry worker runs (in seconds).
    pub gc_interval_secs: u64,
    /// How long expired silences are kept before purging (in seconds).
    pub gc_retention_secs: u64,
    /// Maximum records expired or purged per phase per run.
    pub gc_batch_size: usize,
    /// How often the sync worker rebuilds the cache (in seconds).
    pub sync_interval_secs: u64,
    /// Upper bound on silences loaded by a single sync.
    pub sync_max_silences: usize,
    /// How long `stop` waits for the workers (in seconds).
    pub shutdown_timeout_secs: u64,
    /// Silences evaluated between cancellation checks when filtering alerts.
    pub cancellation_check_interval: usize,
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            gc_interval_secs: 300,
            gc_retention_secs: 86_400, // 24 hours
            gc_batch_size: 1000,
            sync_interval_secs: 60,
            sync_max_silences: 10_000,
            shutdown_timeout_secs: 30,
            cancellation_check_interval: 64,
        }
    }
}

impl SilenceConfig {
    /// Smallest accepted worker interval (in seconds).
    pub const MIN_INTERVAL_SECS: u64 = 1;

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            SilenceError::InvalidConfig {
                reason: format!(
                    "failed to read config file '{}': {}",
                    path.as_ref().display(),
                    e
                ),
            }
        })?;

        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string; absent fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or the values fail validation.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `SilenceError::InvalidConfig` if any value is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.gc_interval_secs < Self::MIN_INTERVAL_SECS {
            return Err(config_error(format!(
                "gc_interval_secs must be at least {}",
                Self::MIN_INTERVAL_SECS
            )));
        }

        if self.sync_interval_secs < Self::MIN_INTERVAL_SECS {
            return Err(config_error(format!(
                "sync_interval_secs must be at least {}",
                Self::MIN_INTERVAL_SECS
            )));
        }

        if self.gc_batch_size == 0 {
            return Err(config_error("gc_batch_size must be positive"));
        }

        if self.sync_max_silences == 0 {
            return Err(config_error("sync_max_silences must be positive"));
        }

        if self.shutdown_timeout_secs == 0 {
            return Err(config_error("shutdown_timeout_secs must be positive"));
        }

        if self.cancellation_check_interval == 0 {
            return Err(config_error("cancellation_check_interval must be positive"));
        }

        Ok(())
    }

    /// Returns the expiry worker interval.
    #[must_use]
    pub const fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }

    /// Returns the retention window for expired silences.
    #[must_use]
    pub const fn gc_retention(&self) -> Duration {
        Duration::from_secs(self.gc_retention_secs)
    }

    /// Returns the sync worker interval.
    #[must_use]
    pub const fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// Returns the shutdown timeout.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn config_error(reason: impl Into<String>) -> SilenceError {
    SilenceError::InvalidConfig {
        reason: reason.into(),
    }
}

//! Engine configuration.
//!
//! Stored as JSON; every field has a default so a partial (or missing) file
//! yields a working configuration. The default database lives under the
//! platform data directory, e.g. `~/.local/share/pocketlog/pocketlog.sqlite3`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

/// Application name used for data directory paths
const APP_NAME: &str = "pocketlog";

const DATABASE_FILE: &str = "pocketlog.sqlite3";

/// Retry budget for a queued operation before it is parked.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Periodic drain cadence while online (15 minutes).
pub const DEFAULT_DRAIN_INTERVAL_SECS: u64 = 15 * 60;

/// Upper bound for a single remote call, so one hung request cannot stall a drain.
pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 30;

/// Largest accepted interval, timeout or TTL (one year).
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub database_path: Option<PathBuf>,
    pub max_attempts: u32,
    pub drain_interval_secs: u64,
    pub remote_timeout_secs: u64,
    pub category_totals_ttl_secs: u64,
    pub analysis_ttl_secs: u64,
    pub calorie_summary_ttl_secs: u64,
    pub api_base_url: Option<String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            drain_interval_secs: DEFAULT_DRAIN_INTERVAL_SECS,
            remote_timeout_secs: DEFAULT_REMOTE_TIMEOUT_SECS,
            category_totals_ttl_secs: 5 * 60,
            analysis_ttl_secs: 15 * 60,
            calorie_summary_ttl_secs: 5 * 60,
            api_base_url: None,
        }
    }
}

impl CoreConfig {
    /// Load from a JSON file, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_attempts == 0 {
            return Err(CoreError::Config("max_attempts must be at least 1".into()));
        }
        if self.drain_interval_secs == 0 {
            return Err(CoreError::Config("drain_interval_secs must be positive".into()));
        }
        if self.remote_timeout_secs == 0 {
            return Err(CoreError::Config("remote_timeout_secs must be positive".into()));
        }
        for (name, secs) in [
            ("drain_interval_secs", self.drain_interval_secs),
            ("remote_timeout_secs", self.remote_timeout_secs),
            ("category_totals_ttl_secs", self.category_totals_ttl_secs),
            ("analysis_ttl_secs", self.analysis_ttl_secs),
            ("calorie_summary_ttl_secs", self.calorie_summary_ttl_secs),
        ] {
            if secs > MAX_DURATION_SECS {
                return Err(CoreError::Config(format!(
                    "{name} must be at most {MAX_DURATION_SECS}, got {secs}"
                )));
            }
        }
        Ok(())
    }

    /// Configured database path, or the platform default.
    pub fn resolved_database_path(&self) -> Result<PathBuf, CoreError> {
        if let Some(path) = &self.database_path {
            return Ok(path.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| CoreError::Config("could not determine data directory".into()))?;
        Ok(data_dir.join(APP_NAME).join(DATABASE_FILE))
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }

    pub fn category_totals_ttl(&self) -> chrono::Duration {
        ttl(self.category_totals_ttl_secs)
    }

    pub fn analysis_ttl(&self) -> chrono::Duration {
        ttl(self.analysis_ttl_secs)
    }

    pub fn calorie_summary_ttl(&self) -> chrono::Duration {
        ttl(self.calorie_summary_ttl_secs)
    }
}

/// Saturates instead of panicking for values `validate` would reject.
fn ttl(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

//! Configuration loading and management.
//!
//! The core consumes these values; it never computes them. Precedence,
//! lowest to highest: built-in defaults, `config.toml` in the platform
//! config directory, an explicit `--config` file, `VIGIL_*` environment
//! variables.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Duration;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use vigil_core::MonitorConfig;

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,
    /// Input inactivity before the user counts as idle, in seconds.
    pub idle_threshold_secs: u32,
    /// Ceiling on a single session's duration, in seconds.
    pub max_session_secs: u32,
    /// Ceiling on one application's reported total per day, in seconds.
    pub max_daily_secs: u32,
    /// Days of history the retention sweep keeps.
    pub retention_days: u32,
    /// Spacing of the tracking tick, in seconds.
    pub poll_interval_secs: u32,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("idle_threshold_secs", &self.idle_threshold_secs)
            .field("max_session_secs", &self.max_session_secs)
            .field("max_daily_secs", &self.max_daily_secs)
            .field("retention_days", &self.retention_days)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("vigil.db"),
            idle_threshold_secs: 300,
            max_session_secs: 6 * 60 * 60,
            max_daily_secs: 24 * 60 * 60,
            retention_days: 90,
            poll_interval_secs: 15,
        }
    }
}

impl Config {
    /// Loads configuration from default locations.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(None)
    }

    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("VIGIL_"));

        figment.extract()
    }

    /// Monitor tuning derived from the configured values.
    #[must_use]
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            idle_threshold: Duration::seconds(i64::from(self.idle_threshold_secs)),
            max_session: self.max_session(),
            tick_interval: Duration::seconds(i64::from(self.poll_interval_secs)),
        }
    }

    /// Per-session duration ceiling.
    #[must_use]
    pub fn max_session(&self) -> Duration {
        Duration::seconds(i64::from(self.max_session_secs))
    }

    /// Per-application daily reporting ceiling.
    #[must_use]
    pub fn max_daily(&self) -> Duration {
        Duration::seconds(i64::from(self.max_daily_secs))
    }
}

/// Returns the platform-specific config directory for vigil.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("vigil"))
}

/// Returns the platform-specific data directory for vigil.
///
/// On Linux: `~/.local/share/vigil`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("vigil"))
}

//! TOML settings file model.
//!
//! ```toml
//! [lock]
//! timeout_secs = 10.0
//! poll_interval_ms = 20
//! stale_timeout_secs = 60.0
//! lock_dir = "/run/myapp/locks"
//! redis_url = "redis://cache:6379/"
//! ```

use crate::constants;
use crate::models::options::LockOptions;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub lock: LockSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LockSettings {
    #[serde(default)]
    pub timeout_secs: Option<f64>,

    #[serde(default = "default_true")]
    pub blocking: bool,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_true")]
    pub fifo: bool,

    #[serde(default)]
    pub stale_timeout_secs: Option<f64>,

    /// Directory for bare lock names (falls back to `FIFO_LOCK_DIR`, then the temp dir).
    #[serde(default)]
    pub lock_dir: Option<PathBuf>,

    #[serde(default)]
    pub redis_url: Option<String>,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            blocking: true,
            poll_interval_ms: default_poll_interval_ms(),
            fifo: true,
            stale_timeout_secs: None,
            lock_dir: None,
            redis_url: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    constants::DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn secs(value: Option<f64>) -> Option<Duration> {
    // negative or NaN values disable the setting instead of panicking
    value.and_then(|v| Duration::try_from_secs_f64(v).ok())
}

impl LockSettings {
    pub fn to_options(&self) -> LockOptions {
        LockOptions {
            timeout: secs(self.timeout_secs),
            blocking: self.blocking,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            fifo: self.fifo,
            stale_timeout: secs(self.stale_timeout_secs),
            warn_hook: None,
        }
    }

    pub fn redis_url(&self) -> &str {
        self.redis_url
            .as_deref()
            .unwrap_or(constants::DEFAULT_REDIS_URL)
    }
}

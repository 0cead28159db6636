//! Runtime configuration.
//!
//! Loaded from `~/.config/vitals/config.json`. A missing file or a field the
//! file does not set falls back to the defaults below; a file that fails to
//! parse is reported and ignored rather than aborting startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Scrollback lines retained before the oldest are evicted.
    #[serde(default = "default_retention_cap")]
    pub retention_cap: usize,

    /// Time a cancelled process gets to exit after SIGTERM before SIGKILL.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Override for the session log directory.
    #[serde(default)]
    pub logs_dir: Option<PathBuf>,

    /// Render/input poll cadence in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

fn default_retention_cap() -> usize {
    crate::scrollback::DEFAULT_RETENTION_CAP
}

fn default_grace_period_ms() -> u64 {
    crate::runner::DEFAULT_GRACE_PERIOD.as_millis() as u64
}

fn default_tick_ms() -> u64 {
    50
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retention_cap: default_retention_cap(),
            grace_period_ms: default_grace_period_ms(),
            logs_dir: None,
            tick_ms: default_tick_ms(),
        }
    }
}

impl Config {
    /// `~/.config/vitals/config.json` (platform equivalent via `dirs`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("vitals").join("config.json"))
    }

    /// Load from `path`, or from the default location when `path` is `None`.
    /// Any problem reading or parsing yields the defaults.
    pub fn load(path: Option<&Path>) -> Self {
        let path = match path.map(PathBuf::from).or_else(Self::default_path) {
            Some(path) => path,
            None => return Self::default(),
        };
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("ignoring malformed config {:?}: {}", path, e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("could not read config {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

//! Server configuration, read from environment variables at startup.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_DB_PATH: &str = ".gridshare_db";

/// Seconds between sled snapshots of a room while it is being edited
pub const DEFAULT_SNAPSHOT_SECS: u64 = 30;

/// Seconds an empty room stays in memory before it is evicted
pub const DEFAULT_EVICT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: String,
    pub db_path: PathBuf,
    pub snapshot_interval: Duration,
    pub evict_after: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Unparseable numbers fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let secs = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };

        Self {
            addr: lookup("GRIDSHARE_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string()),
            db_path: lookup("GRIDSHARE_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            snapshot_interval: Duration::from_secs(secs(
                "GRIDSHARE_SNAPSHOT_SECS",
                DEFAULT_SNAPSHOT_SECS,
            )),
            evict_after: Duration::from_secs(secs("GRIDSHARE_EVICT_SECS", DEFAULT_EVICT_SECS)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

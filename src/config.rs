use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;

use crate::engine::EngineError;
use crate::time;

/// Runtime settings, read from `SPOTBOOK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub default_zone: Tz,
    pub sweep_interval: Duration,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            default_zone: time::DEFAULT_ZONE,
            sweep_interval: Duration::from_secs(60),
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, EngineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparsable numbers fall back to defaults;
    /// an unknown zone is an error.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, EngineError> {
        let defaults = Self::default();
        let default_zone = match get("SPOTBOOK_DEFAULT_ZONE") {
            Some(id) => time::parse_zone(&id)?,
            None => defaults.default_zone,
        };
        Ok(Self {
            data_dir: get("SPOTBOOK_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            default_zone,
            sweep_interval: get("SPOTBOOK_SWEEP_INTERVAL_SECS")
                .and_then(|s| s.parse().ok())
                .filter(|&secs: &u64| secs > 0)
                .map_or(defaults.sweep_interval, Duration::from_secs),
            compact_threshold: get("SPOTBOOK_COMPACT_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.compact_threshold),
            metrics_port: get("SPOTBOOK_METRICS_PORT").and_then(|s| s.parse().ok()),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("spotbook.wal")
    }
}

//! Configuration management for the courier broker

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Broker configuration
///
/// Loaded from an optional TOML file (see [`Config::load`]), with every field
/// falling back to a default that matches the reference deployment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host to bind the HTTP/WebSocket listener on
    pub listen_host: String,

    /// Port to bind on
    pub listen_port: u16,

    /// Shared authentication token, compared exactly against the `token`
    /// field of every sync/push exchange and the producer endpoints.
    /// Empty string disables authentication.
    pub auth_token: String,

    /// Seconds since last contact before a device is considered stale and
    /// excluded from "most recent" resolution
    pub device_fresh_secs: u64,

    /// Default time-to-live for enqueued actions, in seconds
    pub default_ttl_secs: u64,

    /// Maximum pending actions per device; the oldest entry is dropped
    /// once the cap is exceeded
    pub max_queue: usize,

    /// Maximum retained diagnostic log lines per device
    pub max_logs: usize,

    /// Seconds an unconsumed result is retained before being purged
    pub result_retention_secs: u64,

    /// Upper bound for long-poll sync requests, in milliseconds.
    /// A `wait_ms` above this is clamped; a sync request never suspends longer.
    pub long_poll_max_ms: u64,

    /// Interval between expiry sweeps (queued action TTLs, stale results,
    /// expired KV rows), in seconds
    pub sweep_interval_secs: u64,

    /// Data directory for the key-value store database.
    /// Defaults to the XDG data dir.
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            listen_port: 8955,
            auth_token: String::new(),
            device_fresh_secs: 120,
            default_ttl_secs: 300,
            max_queue: 200,
            max_logs: 300,
            result_retention_secs: 600,
            long_poll_max_ms: 25_000,
            sweep_interval_secs: 30,
            data_dir: default_data_dir(),
        }
    }
}

impl Config {
    /// Load configuration from the default location
    ///
    /// Reads `courier.toml` from the XDG config directory if present,
    /// otherwise returns the defaults.
    ///
    /// # Errors
    ///
    /// Returns error if an existing config file cannot be read or parsed
    pub fn load() -> Result<Self> {
        match default_config_path() {
            Some(path) if path.is_file() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        Ok(config)
    }

    /// The broker's auth token, if one is configured
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        let token = self.auth_token.trim();
        if token.is_empty() { None } else { Some(token) }
    }
}

/// Default path for `courier.toml`
///
/// Uses `~/.config/courier/courier.toml` on Linux
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "courier", "courier")
        .map(|d| d.config_dir().join("courier.toml"))
}

/// Default data directory for the key-value store
///
/// Uses `~/.local/share/courier/` on Linux
#[must_use]
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "courier", "courier")
        .map_or_else(|| PathBuf::from(".courier"), |d| d.data_dir().to_path_buf())
}

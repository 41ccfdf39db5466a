//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/heliograph/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/heliograph/` (~/.config/heliograph/)
//! - State blob: `$XDG_DATA_HOME/heliograph/` (~/.local/share/heliograph/)
//! - Logs: `$XDG_STATE_HOME/heliograph/` (~/.local/state/heliograph/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Collector identity and endpoint
    #[serde(default)]
    pub client: ClientConfig,

    /// Heartbeat and delivery timing
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Optional location fields attached to every request
    #[serde(default)]
    pub geo: Option<GeoConfig>,

    /// Local state storage overrides
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Collector identity and endpoint configuration
#[derive(Debug, Deserialize, Default, Clone)]
pub struct ClientConfig {
    /// Application key issued by the collector
    #[serde(default)]
    pub app_key: String,

    /// Collector base URL (e.g. `https://stats.example.com`)
    #[serde(default)]
    pub server_url: String,

    /// Explicit device identifier; generated and persisted when absent
    pub device_id: Option<String>,

    /// Application version reported in metrics snapshots
    pub app_version: Option<String>,
}

/// Heartbeat and delivery timing configuration
#[derive(Debug, Deserialize, Clone)]
pub struct HeartbeatConfig {
    /// Heartbeat tick interval in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Seconds to wait after a failed delivery before retrying
    #[serde(default = "default_fail_timeout")]
    pub fail_timeout_secs: u64,

    /// Seconds between automatic session-duration reports
    #[serde(default = "default_session_update")]
    pub session_update_secs: u64,

    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            fail_timeout_secs: default_fail_timeout(),
            session_update_secs: default_session_update(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_interval_ms() -> u64 {
    500
}

fn default_fail_timeout() -> u64 {
    60
}

fn default_session_update() -> u64 {
    60
}

fn default_request_timeout() -> u64 {
    30
}

/// Optional location fields
///
/// Attached verbatim to every outbound request when present. Nothing is
/// collected automatically.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct GeoConfig {
    /// ISO country code
    pub country_code: Option<String>,
    /// City name
    pub city: Option<String>,
    /// Externally visible IP address
    pub ip_address: Option<String>,
}

/// Local state storage configuration
#[derive(Debug, Deserialize, Default, Clone)]
pub struct StorageConfig {
    /// Override path for the state blob file
    pub path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Validate configuration for use against a live collector.
    ///
    /// The client itself tolerates a missing app key (requests are dropped
    /// with a logged error); this is for front ends that want to fail fast.
    pub fn validate(&self) -> Result<()> {
        if self.client.app_key.is_empty() {
            return Err(Error::Config("client.app_key is required".to_string()));
        }
        if self.client.server_url.is_empty() {
            return Err(Error::Config("client.server_url is required".to_string()));
        }
        if !self.client.server_url.starts_with("http://")
            && !self.client.server_url.starts_with("https://")
        {
            return Err(Error::Config(
                "client.server_url must be an http(s) URL".to_string(),
            ));
        }
        if self.heartbeat.interval_ms == 0 {
            return Err(Error::Config(
                "heartbeat.interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.heartbeat.fail_timeout_secs == 0 {
            return Err(Error::Config(
                "heartbeat.fail_timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/heliograph/config.toml` (~/.config/heliograph/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("heliograph").join("config.toml")
    }

    /// Returns the data directory path (for the state blob)
    ///
    /// `$XDG_DATA_HOME/heliograph/` (~/.local/share/heliograph/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("heliograph")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/heliograph/` (~/.local/state/heliograph/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("heliograph")
    }

    /// Returns the state blob file path, honoring the storage override
    ///
    /// `$XDG_DATA_HOME/heliograph/state.json` (~/.local/share/heliograph/state.json)
    pub fn storage_path(&self) -> PathBuf {
        self.storage
            .path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("state.json"))
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/heliograph/heliograph.log` (~/.local/state/heliograph/heliograph.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("heliograph.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}

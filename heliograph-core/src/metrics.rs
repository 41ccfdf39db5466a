//! Metrics snapshots attached to session-begin and crash requests.
//!
//! The collector expects underscore-prefixed metric names (`_os`,
//! `_os_version`, `_app_version`); any extra pairs supplied by the host
//! application are merged in verbatim.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A snapshot of the reporting environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    /// Operating system (linux, macos, windows)
    #[serde(rename = "_os")]
    pub os: String,

    /// Operating system version, best effort
    #[serde(rename = "_os_version")]
    pub os_version: String,

    /// Host application version
    #[serde(rename = "_app_version")]
    pub app_version: String,

    /// Extra application-supplied metric pairs, sent verbatim
    #[serde(flatten)]
    pub custom: BTreeMap<String, String>,
}

impl MetricsSnapshot {
    /// Collect a snapshot from the current environment.
    ///
    /// `app_version` comes from configuration; it defaults to "0.0" when the
    /// host application did not set one.
    pub fn collect(app_version: Option<&str>) -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            os_version: detect_os_version(),
            app_version: app_version.unwrap_or("0.0").to_string(),
            custom: BTreeMap::new(),
        }
    }

    /// Merge extra application-supplied metric pairs into the snapshot.
    pub fn with_custom(mut self, custom: BTreeMap<String, String>) -> Self {
        self.custom.extend(custom);
        self
    }
}

#[cfg(target_os = "linux")]
fn detect_os_version() -> String {
    std::fs::read_to_string("/proc/sys/kernel/osrelease")
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(target_os = "macos")]
fn detect_os_version() -> String {
    use std::process::Command;
    Command::new("sw_vers")
        .arg("-productVersion")
        .output()
        .ok()
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn detect_os_version() -> String {
    "unknown".to_string()
}

//! Crash report payloads.
//!
//! A crash request carries the error description, fatality flag, optional
//! captured logs, the seconds the client has been running, and the same
//! metrics snapshot that accompanies a session begin. The enqueue path for
//! crashes always ends in a synchronous state flush so the report survives
//! an immediate process exit.

use serde::{Deserialize, Serialize};

use crate::metrics::MetricsSnapshot;

/// Payload of a `crash` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrashReport {
    /// Error description or stack trace
    #[serde(rename = "_error")]
    pub error: String,

    /// Whether the process is terminating because of this error
    #[serde(rename = "_fatal")]
    pub fatal: bool,

    /// Captured log lines leading up to the crash
    #[serde(rename = "_logs", skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,

    /// Seconds the client had been running when the crash occurred
    #[serde(rename = "_run", skip_serializing_if = "Option::is_none")]
    pub run_secs: Option<u64>,

    /// Environment snapshot, merged verbatim
    #[serde(flatten)]
    pub metrics: MetricsSnapshot,
}

impl CrashReport {
    /// Build a report around the current environment snapshot.
    pub fn new(
        error: impl Into<String>,
        fatal: bool,
        logs: Option<String>,
        run_secs: Option<u64>,
        metrics: MetricsSnapshot,
    ) -> Self {
        Self {
            error: error.into(),
            fatal,
            logs,
            run_secs,
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_merges_metrics() {
        let report = CrashReport::new(
            "thread 'main' panicked at src/main.rs:10",
            true,
            Some("last log line".to_string()),
            Some(42),
            MetricsSnapshot::collect(Some("1.2.3")),
        );

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["_error"], "thread 'main' panicked at src/main.rs:10");
        assert_eq!(json["_fatal"], true);
        assert_eq!(json["_logs"], "last log line");
        assert_eq!(json["_run"], 42);
        assert_eq!(json["_app_version"], "1.2.3");
        assert_eq!(json["_os"], std::env::consts::OS);
    }

    #[test]
    fn test_optional_fields_omitted() {
        let report = CrashReport::new("boom", false, None, None, MetricsSnapshot::collect(None));
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("_logs").is_none());
        assert!(json.get("_run").is_none());
    }
}

//! Outbound request envelopes and the wire encoder.
//!
//! Every record leaving the client is wrapped in a [`Request`] envelope at
//! insertion time: identity (`app_key`, `device_id`), clock fields
//! (`timestamp`, `hour`, `dow`) and optional configured location fields.
//! The body is one of a closed set of request kinds; a single encoder turns
//! any kind into the urlencoded query the collector's `/i` endpoint expects,
//! with structured sub-values JSON-encoded.

use chrono::{DateTime, Datelike, Local, Timelike};
use serde::{Deserialize, Serialize};

use crate::crash::CrashReport;
use crate::error::Result;
use crate::events::Event;
use crate::metrics::MetricsSnapshot;

/// Unix timestamp, hour of day and day of week (0 = Sunday) for `now`.
pub(crate) fn clock_fields(now: DateTime<Local>) -> (i64, u32, u32) {
    (
        now.timestamp(),
        now.hour(),
        now.weekday().num_days_from_sunday(),
    )
}

/// A fully enriched outbound payload destined for the collector.
///
/// Immutable once enqueued except for queue position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    /// Application key issued by the collector
    pub app_key: String,

    /// Stable device identifier
    pub device_id: String,

    /// Unix seconds at enqueue time
    pub timestamp: i64,

    /// Hour of day at enqueue time (local)
    pub hour: u32,

    /// Day of week at enqueue time (0 = Sunday, local)
    pub dow: u32,

    /// Configured ISO country code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,

    /// Configured city name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,

    /// Configured IP address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,

    /// The request kind and its payload
    #[serde(flatten)]
    pub body: RequestBody,
}

/// The closed set of request kinds the client emits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum RequestBody {
    /// Session start with an environment snapshot
    SessionBegin { metrics: MetricsSnapshot },
    /// Periodic or explicit session-duration report
    SessionExtend { seconds: u64 },
    /// Session end with the final duration
    SessionEnd { seconds: u64 },
    /// A bounded batch of buffered events
    EventsBatch { events: Vec<Event> },
    /// Accumulated user-property mutations
    UserDetails { details: serde_json::Value },
    /// Crash report
    Crash { report: CrashReport },
    /// Install attribution for an acquisition campaign
    CampaignConversion { campaign_id: String },
    /// Identity change that merges the old device's data into the new one
    IdentityMerge { old_device_id: String },
}

impl Request {
    /// Short name of the request kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self.body {
            RequestBody::SessionBegin { .. } => "begin_session",
            RequestBody::SessionExtend { .. } => "session_duration",
            RequestBody::SessionEnd { .. } => "end_session",
            RequestBody::EventsBatch { .. } => "events",
            RequestBody::UserDetails { .. } => "user_details",
            RequestBody::Crash { .. } => "crash",
            RequestBody::CampaignConversion { .. } => "campaign",
            RequestBody::IdentityMerge { .. } => "identity_merge",
        }
    }

    /// Encode the envelope as the urlencoded query for the `/i` endpoint.
    pub fn to_query(&self) -> Result<String> {
        let mut params: Vec<(&str, String)> = vec![
            ("app_key", self.app_key.clone()),
            ("device_id", self.device_id.clone()),
            ("timestamp", self.timestamp.to_string()),
            ("hour", self.hour.to_string()),
            ("dow", self.dow.to_string()),
        ];

        if let Some(cc) = &self.country_code {
            params.push(("country_code", cc.clone()));
        }
        if let Some(city) = &self.city {
            params.push(("city", city.clone()));
        }
        if let Some(ip) = &self.ip_address {
            params.push(("ip_address", ip.clone()));
        }

        match &self.body {
            RequestBody::SessionBegin { metrics } => {
                params.push(("begin_session", "1".to_string()));
                params.push(("metrics", serde_json::to_string(metrics)?));
            }
            RequestBody::SessionExtend { seconds } => {
                params.push(("session_duration", seconds.to_string()));
            }
            RequestBody::SessionEnd { seconds } => {
                params.push(("end_session", "1".to_string()));
                params.push(("session_duration", seconds.to_string()));
            }
            RequestBody::EventsBatch { events } => {
                params.push(("events", serde_json::to_string(events)?));
            }
            RequestBody::UserDetails { details } => {
                params.push(("user_details", serde_json::to_string(details)?));
            }
            RequestBody::Crash { report } => {
                params.push(("crash", serde_json::to_string(report)?));
            }
            RequestBody::CampaignConversion { campaign_id } => {
                params.push(("campaign_id", campaign_id.clone()));
            }
            RequestBody::IdentityMerge { old_device_id } => {
                params.push(("old_device_id", old_device_id.clone()));
            }
        }

        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        Ok(query)
    }
}

//! Event recording and batching.
//!
//! Individual events accumulate in an in-memory buffer and are folded into
//! bounded `events` requests by the heartbeat. Timed events keep their start
//! timestamp in a table that is persisted, so an in-progress measurement
//! survives a restart.

use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::request::clock_fields;

/// Upper bound on events folded into one request.
pub const MAX_EVENTS_PER_REQUEST: usize = 10;

/// A fully stamped analytics event, ready for the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Event key
    pub key: String,

    /// Occurrence count
    pub count: u32,

    /// Numeric value summed server-side
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sum: Option<f64>,

    /// Duration in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dur: Option<f64>,

    /// Free-form segmentation pairs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segmentation: Option<BTreeMap<String, String>>,

    /// Unix seconds at record time
    pub timestamp: i64,

    /// Hour of day at record time (local)
    pub hour: u32,

    /// Day of week at record time (0 = Sunday, local)
    pub dow: u32,
}

/// Caller-supplied event fields, before stamping.
#[derive(Debug, Clone, Default)]
pub struct EventData {
    /// Event key (required; an empty key drops the event)
    pub key: String,
    /// Occurrence count, defaults to 1
    pub count: Option<u32>,
    /// Numeric value summed server-side
    pub sum: Option<f64>,
    /// Duration in seconds; timed events fill this in automatically
    pub dur: Option<f64>,
    /// Free-form segmentation pairs
    pub segmentation: Option<BTreeMap<String, String>>,
}

impl EventData {
    /// Convenience constructor for a keyed event with defaults.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }
}

/// Accumulates events and folds them into bounded batches.
///
/// The buffer itself is memory-only; only the timed-event table is persisted
/// (via [`timed_table`](Self::timed_table) snapshots written by the owner).
#[derive(Debug, Default)]
pub struct EventBatcher {
    buffer: Vec<Event>,
    timed: BTreeMap<String, i64>,
}

impl EventBatcher {
    /// Create an empty batcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a batcher with a previously persisted timed-event table.
    pub fn with_timed_table(timed: BTreeMap<String, i64>) -> Self {
        Self {
            buffer: Vec::new(),
            timed,
        }
    }

    /// Record an event at `now`.
    ///
    /// A missing key is an error condition, not a panic: the event is
    /// dropped and the caller is not interrupted. Returns whether the event
    /// was buffered.
    pub fn record(&mut self, data: EventData, now: DateTime<Local>) -> bool {
        if data.key.is_empty() {
            tracing::error!("dropping event without a key");
            return false;
        }

        let (timestamp, hour, dow) = clock_fields(now);
        self.buffer.push(Event {
            key: data.key,
            count: data.count.unwrap_or(1),
            sum: data.sum,
            dur: data.dur,
            segmentation: data.segmentation,
            timestamp,
            hour,
            dow,
        });
        true
    }

    /// Begin timing an event.
    ///
    /// A second start for the same key before the matching end is a logged
    /// no-op. Returns whether the table changed.
    pub fn start_timed(&mut self, key: &str, now: DateTime<Local>) -> bool {
        if key.is_empty() {
            tracing::error!("dropping timed event without a key");
            return false;
        }
        if self.timed.contains_key(key) {
            tracing::warn!(key, "timed event already started, ignoring");
            return false;
        }
        self.timed.insert(key.to_string(), now.timestamp());
        true
    }

    /// Finish timing an event and record it with the measured duration.
    ///
    /// Requires a prior matching [`start_timed`](Self::start_timed); ending
    /// an event that was never started is a logged no-op. Returns whether
    /// anything was recorded.
    pub fn end_timed(&mut self, mut data: EventData, now: DateTime<Local>) -> bool {
        let Some(started) = self.timed.remove(&data.key) else {
            tracing::warn!(key = %data.key, "timed event was never started, ignoring");
            return false;
        };

        let dur = (now.timestamp() - started).max(0) as f64;
        data.dur = Some(dur);
        self.record(data, now)
    }

    /// Drain up to [`MAX_EVENTS_PER_REQUEST`] events in insertion order.
    ///
    /// Returns `None` when the buffer is empty.
    pub fn flush_batch(&mut self) -> Option<Vec<Event>> {
        if self.buffer.is_empty() {
            return None;
        }
        let take = self.buffer.len().min(MAX_EVENTS_PER_REQUEST);
        Some(self.buffer.drain(..take).collect())
    }

    /// Number of buffered events awaiting a flush.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// The timed-event table, for persistence.
    pub fn timed_table(&self) -> &BTreeMap<String, i64> {
        &self.timed
    }
}

//! Session and view time accounting.
//!
//! The tracker owns the session lifecycle flags and the arithmetic that
//! keeps tracked time continuous across pause/resume: pausing freezes the
//! elapsed-so-far amounts, resuming rebases the reference timestamps
//! backward by the frozen amounts, so a later `now - last_beat` never
//! counts the paused interval.
//!
//! The tracker only does bookkeeping; the owning client decides which
//! requests to emit from the returned values.

use chrono::{DateTime, Duration, Utc};

/// Duration of a finished view, ready to be recorded as an event.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewDuration {
    /// View name
    pub name: String,
    /// Seconds the view was showing, excluding paused time
    pub seconds: f64,
}

/// Summary returned by [`SessionTracker::end`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEnd {
    /// Final session duration in seconds
    pub seconds: u64,
    /// Pending view duration to flush before the session-end request
    pub view: Option<ViewDuration>,
}

/// Tracks one session's lifecycle and elapsed-time state.
#[derive(Debug)]
pub struct SessionTracker {
    started: bool,
    auto_extend: bool,
    track_time: bool,
    last_beat: DateTime<Utc>,
    stored_duration: i64,
    last_view: Option<String>,
    last_view_time: DateTime<Utc>,
    last_view_stored_duration: i64,
}

impl SessionTracker {
    /// Create a tracker with no active session.
    pub fn new(auto_extend: bool, now: DateTime<Utc>) -> Self {
        Self {
            started: false,
            auto_extend,
            track_time: true,
            last_beat: now,
            stored_duration: 0,
            last_view: None,
            last_view_time: now,
            last_view_stored_duration: 0,
        }
    }

    /// Whether a session is active.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Enable or disable automatic session-duration reports.
    pub fn set_auto_extend(&mut self, auto_extend: bool) {
        self.auto_extend = auto_extend;
    }

    /// Start a session. Idempotent: returns `false` while already started.
    pub fn begin(&mut self, now: DateTime<Utc>) -> bool {
        if self.started {
            tracing::debug!("session already started, ignoring begin");
            return false;
        }
        self.started = true;
        self.last_beat = now;
        self.stored_duration = 0;
        true
    }

    /// Whether the heartbeat should emit an automatic duration report.
    pub fn should_extend(&self, now: DateTime<Utc>, period_secs: u64) -> bool {
        self.started
            && self.auto_extend
            && self.track_time
            && (now - self.last_beat).num_seconds() > period_secs as i64
    }

    /// Seconds elapsed since the last duration report.
    pub fn beat_elapsed(&self, now: DateTime<Utc>) -> u64 {
        (now - self.last_beat).num_seconds().max(0) as u64
    }

    /// Reset the duration baseline after a report was emitted.
    pub fn mark_extended(&mut self, now: DateTime<Utc>) {
        self.last_beat = now;
    }

    /// End the session.
    ///
    /// `seconds` defaults to the time since the last duration report.
    /// Returns `None` (logged) when no session is active.
    pub fn end(&mut self, now: DateTime<Utc>, seconds: Option<u64>) -> Option<SessionEnd> {
        if !self.started {
            tracing::debug!("no active session, ignoring end");
            return None;
        }

        let elapsed = if self.track_time {
            self.beat_elapsed(now)
        } else {
            self.stored_duration.max(0) as u64
        };

        let view = self.take_view(now);
        self.started = false;
        self.stored_duration = 0;

        Some(SessionEnd {
            seconds: seconds.unwrap_or(elapsed),
            view,
        })
    }

    /// Freeze duration accounting.
    ///
    /// Elapsed-so-far amounts are stored so that resuming does not count
    /// the idle interval. A second pause is a no-op.
    pub fn pause(&mut self, now: DateTime<Utc>) {
        if !self.track_time {
            return;
        }
        self.stored_duration += (now - self.last_beat).num_seconds().max(0);
        self.last_view_stored_duration += (now - self.last_view_time).num_seconds().max(0);
        self.track_time = false;
    }

    /// Resume duration accounting.
    ///
    /// Rebases the reference timestamps backward by the frozen amounts, so
    /// cumulative tracked time is continuous across the pause.
    pub fn resume(&mut self, now: DateTime<Utc>) {
        if self.track_time {
            return;
        }
        self.last_beat = now - Duration::seconds(self.stored_duration);
        self.last_view_time = now - Duration::seconds(self.last_view_stored_duration);
        self.stored_duration = 0;
        self.last_view_stored_duration = 0;
        self.track_time = true;
    }

    /// Switch to a new view, closing out the previous one.
    ///
    /// Returns the finished view's duration, to be recorded as an event.
    pub fn view(&mut self, name: impl Into<String>, now: DateTime<Utc>) -> Option<ViewDuration> {
        let previous = self.take_view(now);
        self.last_view = Some(name.into());
        self.last_view_time = now;
        self.last_view_stored_duration = 0;
        previous
    }

    /// Close out the current view, if any, and return its duration.
    fn take_view(&mut self, now: DateTime<Utc>) -> Option<ViewDuration> {
        let name = self.last_view.take()?;
        let seconds = if self.track_time {
            (now - self.last_view_time).num_seconds().max(0)
        } else {
            self.last_view_stored_duration.max(0)
        };
        self.last_view_stored_duration = 0;
        Some(ViewDuration {
            name,
            seconds: seconds as f64,
        })
    }
}

//! The client context and heartbeat scheduler.
//!
//! [`Client`] owns every moving part (store, request queue, event batcher,
//! session tracker, user patch, dispatcher) behind one mutex, and drives
//! them from a single spawned heartbeat task. Each tick runs, in order:
//! session auto-extend, event-batch flush, dispatch. The tick body runs
//! under the mutex, so ticks never overlap and producer calls interleave
//! cleanly; only deliveries and lazy state writes happen outside it.
//!
//! Producer methods are synchronous and non-blocking: they append to
//! in-memory structures and trigger a state write, never waiting on the
//! network.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::crash::CrashReport;
use crate::device;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::events::{EventBatcher, EventData};
use crate::metrics::MetricsSnapshot;
use crate::queue::RequestQueue;
use crate::request::{Request, RequestBody};
use crate::session::SessionTracker;
use crate::store::{Durability, Store, QUEUE_KEY, TIMED_EVENTS_KEY};
use crate::transport::{HttpTransport, Transport};
use crate::users::{UserPatch, UserPropertyOp};

/// Event key under which finished view durations are recorded.
pub const VIEW_EVENT_KEY: &str = "[HG]_view";

/// Telemetry client handle.
///
/// Cheap to clone; all clones share one context. Create one per process
/// with [`Client::new`] and stop it with [`Client::shutdown`].
#[derive(Clone)]
pub struct Client {
    inner: Arc<Mutex<Inner>>,
    control: Arc<Control>,
}

struct Control {
    shutdown_tx: mpsc::Sender<()>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    config: Config,
    store: Store,
    queue: RequestQueue,
    batcher: EventBatcher,
    session: SessionTracker,
    users: UserPatch,
    dispatcher: Dispatcher,
    transport: Arc<dyn Transport>,
    device_id: String,
    started_at: Instant,
}

impl Client {
    /// Create a client that delivers to the configured collector.
    ///
    /// Must be called within a tokio runtime; the heartbeat task starts
    /// immediately.
    pub fn new(config: Config) -> Result<Self> {
        let timeout = Duration::from_secs(config.heartbeat.request_timeout_secs);
        let transport: Arc<dyn Transport> =
            Arc::new(HttpTransport::new(&config.client.server_url, timeout)?);
        Self::with_transport(config, transport)
    }

    /// Create a client with a custom delivery transport.
    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Result<Self> {
        let mut store = Store::open(config.storage_path());
        let device_id = device::load_or_create(&mut store, config.client.device_id.as_deref());
        let queue = RequestQueue::load(&store);
        let batcher = EventBatcher::with_timed_table(load_timed_table(&store));
        let session = SessionTracker::new(true, Utc::now());
        let dispatcher = Dispatcher::new(config.heartbeat.fail_timeout_secs);

        let interval = Duration::from_millis(config.heartbeat.interval_ms.max(1));

        let inner = Arc::new(Mutex::new(Inner {
            config,
            store,
            queue,
            batcher,
            session,
            users: UserPatch::new(),
            dispatcher,
            transport,
            device_id,
            started_at: Instant::now(),
        }));

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let tick_inner = Arc::clone(&inner);
        let heartbeat = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        lock(&tick_inner).tick(Utc::now());
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Ok(Self {
            inner,
            control: Arc::new(Control {
                shutdown_tx,
                heartbeat: Mutex::new(Some(heartbeat)),
            }),
        })
    }

    /// Start a session and report it with a metrics snapshot.
    ///
    /// Idempotent: a second begin while a session is active is a no-op.
    pub fn begin_session(&self) {
        let mut inner = lock(&self.inner);
        if inner.session.begin(Utc::now()) {
            let metrics = inner.metrics_snapshot();
            inner.enqueue(RequestBody::SessionBegin { metrics });
        }
    }

    /// Report an explicit session duration. No-op without an active session.
    pub fn extend_session(&self, seconds: u64) {
        let mut inner = lock(&self.inner);
        if inner.session.is_started() {
            inner.enqueue(RequestBody::SessionExtend { seconds });
        } else {
            tracing::debug!("no active session, ignoring duration report");
        }
    }

    /// End the session.
    ///
    /// `seconds` defaults to the time since the last duration report. Any
    /// pending view duration and buffered events are flushed first so they
    /// precede the session-end request in the queue.
    pub fn end_session(&self, seconds: Option<u64>) {
        let mut inner = lock(&self.inner);
        let now = Utc::now();
        if let Some(end) = inner.session.end(now, seconds) {
            if let Some(view) = end.view {
                inner.record_view_duration(view.name, view.seconds);
            }
            inner.drain_events();
            inner.enqueue(RequestBody::SessionEnd {
                seconds: end.seconds,
            });
        }
    }

    /// Freeze session and view duration accounting.
    pub fn pause(&self) {
        lock(&self.inner).session.pause(Utc::now());
    }

    /// Resume duration accounting; paused time is not counted.
    pub fn resume(&self) {
        lock(&self.inner).session.resume(Utc::now());
    }

    /// Enable or disable automatic session-duration reports.
    pub fn set_auto_extend(&self, enabled: bool) {
        lock(&self.inner).session.set_auto_extend(enabled);
    }

    /// Record an analytics event.
    ///
    /// Buffered in memory and folded into a bounded `events` request by the
    /// next heartbeat. An event without a key is dropped with a logged
    /// error.
    pub fn record_event(&self, data: EventData) {
        lock(&self.inner).batcher.record(data, Local::now());
    }

    /// Begin timing an event; the table survives restarts.
    pub fn start_timed_event(&self, key: &str) {
        let mut inner = lock(&self.inner);
        if inner.batcher.start_timed(key, Local::now()) {
            inner.persist_timed();
        }
    }

    /// Finish timing an event and record it with the measured duration.
    pub fn end_timed_event(&self, data: EventData) {
        let mut inner = lock(&self.inner);
        if inner.batcher.end_timed(data, Local::now()) {
            inner.persist_timed();
        }
    }

    /// Switch to a new view, recording the previous view's duration.
    pub fn view(&self, name: &str) {
        let mut inner = lock(&self.inner);
        if let Some(finished) = inner.session.view(name, Utc::now()) {
            inner.record_view_duration(finished.name, finished.seconds);
        }
    }

    /// Queue a mutation of a custom user property.
    ///
    /// Mutations accumulate until [`save_user_details`](Self::save_user_details).
    pub fn update_user(&self, property: &str, op: UserPropertyOp) {
        lock(&self.inner).users.apply(property, op);
    }

    /// Flush accumulated user-property mutations as one request.
    pub fn save_user_details(&self) {
        let mut inner = lock(&self.inner);
        if let Some(details) = inner.users.take_details() {
            inner.enqueue(RequestBody::UserDetails { details });
        }
    }

    /// Report a crash.
    ///
    /// The state blob is flushed synchronously before returning, so the
    /// report survives an immediate process exit. This is the intended
    /// path for panic hooks.
    pub fn report_crash(&self, error: &str, fatal: bool, logs: Option<String>) {
        let mut inner = lock(&self.inner);
        let report = CrashReport::new(
            error,
            fatal,
            logs,
            Some(inner.started_at.elapsed().as_secs()),
            inner.metrics_snapshot(),
        );
        inner.enqueue(RequestBody::Crash { report });
        if let Err(e) = inner.store.flush() {
            tracing::error!(error = %e, "failed to flush state after crash report");
        }
    }

    /// Report an install attribution for an acquisition campaign.
    pub fn report_conversion(&self, campaign_id: &str) {
        if campaign_id.is_empty() {
            tracing::error!("dropping conversion without a campaign id");
            return;
        }
        lock(&self.inner).enqueue(RequestBody::CampaignConversion {
            campaign_id: campaign_id.to_string(),
        });
    }

    /// Replace the device identifier.
    ///
    /// With `merge`, a request carrying the old identifier is emitted so
    /// the collector merges the old device's data into the new one.
    pub fn change_device_id(&self, new_id: &str, merge: bool) {
        if new_id.is_empty() {
            tracing::error!("ignoring empty device identifier");
            return;
        }
        let mut inner = lock(&self.inner);
        if inner.device_id == new_id {
            return;
        }
        let old = std::mem::replace(&mut inner.device_id, new_id.to_string());
        device::set(&mut inner.store, new_id);
        tracing::info!(old = %old, new = %new_id, merge, "device identifier changed");
        if merge {
            inner.enqueue(RequestBody::IdentityMerge { old_device_id: old });
        }
    }

    /// The active device identifier.
    pub fn device_id(&self) -> String {
        lock(&self.inner).device_id.clone()
    }

    /// Requests awaiting delivery, including one in flight.
    pub fn pending_requests(&self) -> usize {
        let inner = lock(&self.inner);
        inner.queue.len() + usize::from(inner.dispatcher.in_flight().is_some())
    }

    /// Events buffered and not yet folded into a request.
    pub fn pending_events(&self) -> usize {
        lock(&self.inner).batcher.pending()
    }

    /// Fold any buffered events into the queue and write the state blob
    /// synchronously.
    pub fn flush(&self) -> Result<()> {
        let mut inner = lock(&self.inner);
        inner.drain_events();
        inner.store.flush()
    }

    /// Stop the heartbeat and flush the state blob.
    pub async fn shutdown(&self) {
        let _ = self.control.shutdown_tx.send(()).await;
        let heartbeat = {
            let mut slot = self
                .control
                .heartbeat
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            slot.take()
        };
        if let Some(heartbeat) = heartbeat {
            let _ = heartbeat.await;
        }
        if let Err(e) = self.flush() {
            tracing::warn!(error = %e, "final state flush failed");
        }
        tracing::info!("client shut down");
    }
}

impl Inner {
    /// One heartbeat: session auto-extend, event flush, dispatch.
    fn tick(&mut self, now: DateTime<Utc>) {
        if self
            .session
            .should_extend(now, self.config.heartbeat.session_update_secs)
        {
            let seconds = self.session.beat_elapsed(now);
            self.session.mark_extended(now);
            self.enqueue(RequestBody::SessionExtend { seconds });
        }

        if let Some(events) = self.batcher.flush_batch() {
            self.enqueue(RequestBody::EventsBatch { events });
        }

        if self.dispatcher.tick(now, &mut self.queue, &self.transport) {
            self.persist_queue();
        }
    }

    /// Wrap a body in a fully enriched envelope and append it to the queue.
    ///
    /// Dropped with a logged error when the application key or device
    /// identifier is unset; the caller is never interrupted.
    fn enqueue(&mut self, body: RequestBody) {
        if self.config.client.app_key.is_empty() {
            tracing::error!("dropping request: client.app_key is not configured");
            return;
        }
        if self.device_id.is_empty() {
            tracing::error!("dropping request: device identifier is unset");
            return;
        }

        let (timestamp, hour, dow) = crate::request::clock_fields(Local::now());
        let geo = self.config.geo.as_ref();
        let request = Request {
            app_key: self.config.client.app_key.clone(),
            device_id: self.device_id.clone(),
            timestamp,
            hour,
            dow,
            country_code: geo.and_then(|g| g.country_code.clone()),
            city: geo.and_then(|g| g.city.clone()),
            ip_address: geo.and_then(|g| g.ip_address.clone()),
            body,
        };

        tracing::debug!(kind = request.kind(), "request enqueued");
        self.queue.push_back(request);
        self.persist_queue();
    }

    fn persist_queue(&mut self) {
        let snapshot = self.queue.snapshot(self.dispatcher.in_flight());
        self.store.set(QUEUE_KEY, snapshot, Durability::Lazy);
    }

    fn persist_timed(&mut self) {
        match serde_json::to_value(self.batcher.timed_table()) {
            Ok(table) => self.store.set(TIMED_EVENTS_KEY, table, Durability::Lazy),
            Err(e) => tracing::error!(error = %e, "failed to serialize timed-event table"),
        }
    }

    fn record_view_duration(&mut self, name: String, seconds: f64) {
        let mut segmentation = BTreeMap::new();
        segmentation.insert("name".to_string(), name);
        self.batcher.record(
            EventData {
                key: VIEW_EVENT_KEY.to_string(),
                count: Some(1),
                sum: None,
                dur: Some(seconds),
                segmentation: Some(segmentation),
            },
            Local::now(),
        );
    }

    /// Fold every buffered event into the queue, in bounded batches.
    fn drain_events(&mut self) {
        while let Some(events) = self.batcher.flush_batch() {
            self.enqueue(RequestBody::EventsBatch { events });
        }
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot::collect(self.config.client.app_version.as_deref())
    }
}

fn lock(inner: &Arc<Mutex<Inner>>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn load_timed_table(store: &Store) -> BTreeMap<String, i64> {
    let Some(value) = store.get(TIMED_EVENTS_KEY) else {
        return BTreeMap::new();
    };
    match serde_json::from_value(value.clone()) {
        Ok(table) => table,
        Err(e) => {
            tracing::warn!(error = %e, "unreadable timed-event table, starting empty");
            BTreeMap::new()
        }
    }
}

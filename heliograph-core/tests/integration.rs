//! Integration tests for crash recovery and end-to-end delivery
//!
//! These tests exercise the full client against mock transports: persisted
//! state is written to a temp directory, the process "crash" is simulated by
//! dropping the client without shutdown, and a second client on the same
//! state directory must replay what the first one left behind.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use heliograph_core::store::{Store, QUEUE_KEY};
use heliograph_core::transport::{DeliveryFuture, DeliveryOutcome, Transport};
use heliograph_core::{Client, Config, EventData};
use tempfile::TempDir;

/// Transport that records queries and answers with scripted outcomes
/// (default: delivered).
struct RecordingTransport {
    outcomes: Mutex<VecDeque<DeliveryOutcome>>,
    delivered: Mutex<Vec<String>>,
}

impl RecordingTransport {
    fn new(outcomes: Vec<DeliveryOutcome>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            delivered: Mutex::new(Vec::new()),
        })
    }

    fn deliveries(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

impl Transport for RecordingTransport {
    fn deliver(&self, query: String) -> DeliveryFuture {
        self.delivered.lock().unwrap().push(query);
        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(DeliveryOutcome::Delivered);
        Box::pin(async move { outcome })
    }
}

/// Transport whose deliveries never complete.
struct StalledTransport;

impl Transport for StalledTransport {
    fn deliver(&self, _query: String) -> DeliveryFuture {
        Box::pin(std::future::pending())
    }
}

fn config(dir: &TempDir, interval_ms: u64) -> Config {
    let mut config = Config::default();
    config.client.app_key = "test-key".to_string();
    config.client.server_url = "https://stats.example.com".to_string();
    config.client.app_version = Some("1.0".to_string());
    config.heartbeat.interval_ms = interval_ms;
    config.storage.path = Some(dir.path().join("state.json"));
    config
}

// ============================================
// Crash Recovery
// ============================================

#[tokio::test(start_paused = true)]
async fn test_restart_replays_queue_and_resumes_dispatch() {
    let dir = TempDir::new().unwrap();

    // First process: queue up a whole session, then "crash" (no shutdown).
    {
        let client =
            Client::with_transport(config(&dir, 60_000), Arc::new(StalledTransport)).unwrap();
        client.begin_session();
        client.record_event(EventData::new("launch"));
        client.end_session(Some(3));
        client.flush().unwrap();
        assert_eq!(client.pending_requests(), 3);
    }

    // Second process: replays the persisted queue and delivers in order.
    let transport = RecordingTransport::new(vec![]);
    let client = Client::with_transport(config(&dir, 500), transport.clone()).unwrap();
    assert_eq!(client.pending_requests(), 3);

    tokio::time::sleep(Duration::from_secs(10)).await;

    let deliveries = transport.deliveries();
    assert_eq!(deliveries.len(), 3);
    assert!(deliveries[0].contains("begin_session=1"));
    assert!(deliveries[1].contains("events="));
    assert!(deliveries[2].contains("end_session=1"));
    assert_eq!(client.pending_requests(), 0);

    client.shutdown().await;
}

#[tokio::test]
async fn test_restart_restores_timed_event() {
    let dir = TempDir::new().unwrap();

    {
        let client =
            Client::with_transport(config(&dir, 60_000), Arc::new(StalledTransport)).unwrap();
        client.start_timed_event("boot");
        client.flush().unwrap();
    }

    let client =
        Client::with_transport(config(&dir, 60_000), Arc::new(StalledTransport)).unwrap();

    // The start survived the restart, so the end produces a timed event.
    client.end_timed_event(EventData::new("boot"));
    assert_eq!(client.pending_events(), 1);

    // And the table entry is consumed: a second end is a no-op.
    client.end_timed_event(EventData::new("boot"));
    assert_eq!(client.pending_events(), 1);

    client.shutdown().await;
}

#[tokio::test]
async fn test_device_id_stable_across_restart() {
    let dir = TempDir::new().unwrap();

    let first = {
        let client =
            Client::with_transport(config(&dir, 60_000), Arc::new(StalledTransport)).unwrap();
        let id = client.device_id();
        client.shutdown().await;
        id
    };

    let client =
        Client::with_transport(config(&dir, 60_000), Arc::new(StalledTransport)).unwrap();
    assert_eq!(client.device_id(), first);
    client.shutdown().await;
}

// ============================================
// Delivery Discipline
// ============================================

#[tokio::test(start_paused = true)]
async fn test_failed_request_retried_before_newer_data() {
    let dir = TempDir::new().unwrap();

    // Zero backoff keeps the retry within the test's paused clock.
    let mut config = config(&dir, 500);
    config.heartbeat.fail_timeout_secs = 0;

    let transport = RecordingTransport::new(vec![DeliveryOutcome::Failed]);
    let client = Client::with_transport(config, transport.clone()).unwrap();

    client.begin_session();
    client.record_event(EventData::new("launch"));

    tokio::time::sleep(Duration::from_secs(10)).await;

    let deliveries = transport.deliveries();
    assert_eq!(deliveries.len(), 3);
    // The failed session-begin is retried ahead of the younger events batch.
    assert!(deliveries[0].contains("begin_session=1"));
    assert!(deliveries[1].contains("begin_session=1"));
    assert!(deliveries[2].contains("events="));
    assert_eq!(client.pending_requests(), 0);

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_event_batches_are_bounded() {
    let dir = TempDir::new().unwrap();
    let transport = RecordingTransport::new(vec![]);
    let client = Client::with_transport(config(&dir, 500), transport.clone()).unwrap();

    for i in 0..11 {
        client.record_event(EventData::new(format!("e{}", i)));
    }

    tokio::time::sleep(Duration::from_secs(10)).await;

    let deliveries = transport.deliveries();
    assert_eq!(deliveries.len(), 2);

    let batch_len = |query: &str| {
        let encoded = query
            .split('&')
            .find_map(|pair| pair.strip_prefix("events="))
            .unwrap();
        let decoded = urlencoding::decode(encoded).unwrap();
        serde_json::from_str::<serde_json::Value>(&decoded)
            .unwrap()
            .as_array()
            .unwrap()
            .len()
    };
    assert_eq!(batch_len(&deliveries[0]), 10);
    assert_eq!(batch_len(&deliveries[1]), 1);

    client.shutdown().await;
}

// ============================================
// Shutdown
// ============================================

#[tokio::test]
async fn test_shutdown_persists_pending_state() {
    let dir = TempDir::new().unwrap();

    let client =
        Client::with_transport(config(&dir, 60_000), Arc::new(StalledTransport)).unwrap();
    client.begin_session();
    client.record_event(EventData::new("tail"));
    client.shutdown().await;

    // Buffered events were folded into the queue before the final flush.
    let store = Store::open(dir.path().join("state.json"));
    let queue = store.get(QUEUE_KEY).unwrap().as_array().unwrap().clone();
    assert_eq!(queue.len(), 2);
}

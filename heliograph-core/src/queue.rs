//! Durable FIFO of pending requests.
//!
//! Insertion order is delivery order, with one exception: a request whose
//! delivery failed is reinserted at the front, so it is retried before any
//! later-enqueued data. The on-disk copy and the in-memory queue are kept
//! convergent by persisting a full snapshot on every mutation; the snapshot
//! includes the in-flight request (if any) at the head, so a crash while a
//! delivery is outstanding replays that request instead of losing it.

use std::collections::VecDeque;

use serde_json::Value;

use crate::request::Request;
use crate::store::{Store, QUEUE_KEY};

/// Ordered sequence of requests awaiting delivery.
#[derive(Debug, Default)]
pub struct RequestQueue {
    items: VecDeque<Request>,
}

impl RequestQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the queue from the persisted snapshot in `store`.
    ///
    /// Entries that fail to deserialize are skipped with a warning rather
    /// than poisoning the whole queue.
    pub fn load(store: &Store) -> Self {
        let mut items = VecDeque::new();

        if let Some(Value::Array(entries)) = store.get(QUEUE_KEY) {
            for entry in entries {
                match serde_json::from_value::<Request>(entry.clone()) {
                    Ok(request) => items.push_back(request),
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping unreadable queued request");
                    }
                }
            }
        }

        if !items.is_empty() {
            tracing::info!(pending = items.len(), "restored request queue");
        }

        Self { items }
    }

    /// Append a request at the tail.
    pub fn push_back(&mut self, request: Request) {
        self.items.push_back(request);
    }

    /// Remove and return the head request.
    pub fn pop_front(&mut self) -> Option<Request> {
        self.items.pop_front()
    }

    /// Reinsert a request at the front.
    ///
    /// Used only on delivery failure, so the retried request goes ahead of
    /// newer data.
    pub fn push_front(&mut self, request: Request) {
        self.items.push_front(request);
    }

    /// Number of queued requests (excluding any in-flight request).
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate the queued requests in delivery order.
    pub fn iter(&self) -> impl Iterator<Item = &Request> {
        self.items.iter()
    }

    /// Full persistable snapshot, with the in-flight request (if any) ahead
    /// of the queued ones.
    pub fn snapshot(&self, in_flight: Option<&Request>) -> Value {
        let entries: Vec<Value> = in_flight
            .into_iter()
            .chain(self.items.iter())
            .filter_map(|request| match serde_json::to_value(request) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::error!(kind = request.kind(), error = %e, "failed to serialize queued request");
                    None
                }
            })
            .collect();

        Value::Array(entries)
    }
}

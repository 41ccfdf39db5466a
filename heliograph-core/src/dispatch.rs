//! Single-in-flight request dispatch with failure backoff.
//!
//! The dispatcher drains the request queue one request at a time. A
//! delivery runs on a spawned task and reports its outcome over a channel
//! that the next ticks poll, so the tick itself never waits on the network.
//! While a delivery is outstanding the popped request is retained here (and
//! stays in the persisted queue snapshot), which is what makes a crash
//! mid-delivery replay the request instead of dropping it.
//!
//! A failed delivery is requeued at the head and dispatch pauses until
//! `now + fail_timeout`. The deadline is polled on the heartbeat cadence,
//! so the observed retry delay is `fail_timeout` rounded up to the next
//! tick. The interval is fixed per configuration; consecutive failures do
//! not lengthen it.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;

use crate::queue::RequestQueue;
use crate::request::Request;
use crate::transport::{DeliveryOutcome, Transport};

/// Dispatch state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// Ready to pick up the queue head.
    Idle,
    /// One delivery outstanding.
    Dispatching,
    /// Waiting out a failure; no dispatch before `until`.
    Backoff { until: DateTime<Utc> },
}

/// Drains the request queue, one delivery at a time.
pub struct Dispatcher {
    state: DispatchState,
    fail_timeout: Duration,
    in_flight: Option<Request>,
    outcome_tx: mpsc::UnboundedSender<DeliveryOutcome>,
    outcome_rx: mpsc::UnboundedReceiver<DeliveryOutcome>,
}

impl Dispatcher {
    /// Create an idle dispatcher with the given failure backoff.
    pub fn new(fail_timeout_secs: u64) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        Self {
            state: DispatchState::Idle,
            fail_timeout: Duration::seconds(fail_timeout_secs as i64),
            in_flight: None,
            outcome_tx,
            outcome_rx,
        }
    }

    /// Current state, for logging and tests.
    pub fn state(&self) -> &DispatchState {
        &self.state
    }

    /// The request whose delivery is outstanding, if any.
    ///
    /// Included at the head of queue snapshots so it survives a crash.
    pub fn in_flight(&self) -> Option<&Request> {
        self.in_flight.as_ref()
    }

    /// Advance the state machine one step.
    ///
    /// Must run within a tokio runtime (deliveries are spawned). Returns
    /// whether the queue contents changed, i.e. whether the caller should
    /// persist a fresh snapshot. Deliberately not signalled when a dispatch
    /// starts: the popped request is still part of the snapshot via
    /// [`in_flight`](Self::in_flight), so the on-disk queue is unchanged.
    pub fn tick(
        &mut self,
        now: DateTime<Utc>,
        queue: &mut RequestQueue,
        transport: &Arc<dyn Transport>,
    ) -> bool {
        if self.state == DispatchState::Dispatching {
            match self.outcome_rx.try_recv() {
                Ok(DeliveryOutcome::Delivered) => {
                    if let Some(request) = self.in_flight.take() {
                        tracing::debug!(kind = request.kind(), "request delivered");
                    }
                    self.state = DispatchState::Idle;
                    return true;
                }
                Ok(DeliveryOutcome::Failed) => {
                    let until = now + self.fail_timeout;
                    if let Some(request) = self.in_flight.take() {
                        tracing::warn!(
                            kind = request.kind(),
                            retry_after = %until,
                            "delivery failed, requeueing at head"
                        );
                        queue.push_front(request);
                    }
                    self.state = DispatchState::Backoff { until };
                    return true;
                }
                // Still in flight.
                Err(_) => return false,
            }
        }

        if let DispatchState::Backoff { until } = self.state {
            if now < until {
                return false;
            }
            self.state = DispatchState::Idle;
        }

        if self.state != DispatchState::Idle || queue.is_empty() {
            return false;
        }

        let Some(request) = queue.pop_front() else {
            return false;
        };

        let query = match request.to_query() {
            Ok(query) => query,
            Err(e) => {
                // Encoding can only fail for a malformed payload; retrying
                // would fail the same way, so the request is dropped.
                tracing::error!(kind = request.kind(), error = %e, "dropping unencodable request");
                return true;
            }
        };

        tracing::debug!(kind = request.kind(), "dispatching request");
        self.in_flight = Some(request);
        self.state = DispatchState::Dispatching;

        let outcome_tx = self.outcome_tx.clone();
        let delivery = transport.deliver(query);
        tokio::spawn(async move {
            let outcome = delivery.await;
            let _ = outcome_tx.send(outcome);
        });

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestBody;
    use crate::transport::DeliveryFuture;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Transport that pops scripted outcomes and records queries.
    struct ScriptedTransport {
        outcomes: Mutex<VecDeque<DeliveryOutcome>>,
        delivered: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
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

    impl Transport for ScriptedTransport {
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

    fn request(seconds: u64) -> Request {
        Request {
            app_key: "key".to_string(),
            device_id: "device".to_string(),
            timestamp: 1_700_000_000,
            hour: 1,
            dow: 1,
            country_code: None,
            city: None,
            ip_address: None,
            body: RequestBody::SessionExtend { seconds },
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        use chrono::TimeZone;
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    /// Let the spawned delivery task run and report its outcome.
    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_success_drains_queue_in_order() {
        let transport = ScriptedTransport::new(vec![]);
        let dyn_transport: Arc<dyn Transport> = transport.clone();
        let mut dispatcher = Dispatcher::new(60);
        let mut queue = RequestQueue::new();
        queue.push_back(request(1));
        queue.push_back(request(2));

        assert!(!dispatcher.tick(at(0), &mut queue, &dyn_transport));
        assert_eq!(*dispatcher.state(), DispatchState::Dispatching);
        assert!(dispatcher.in_flight().is_some());
        settle().await;

        // Outcome absorbed, then the next request goes out.
        assert!(dispatcher.tick(at(1), &mut queue, &dyn_transport));
        assert_eq!(*dispatcher.state(), DispatchState::Idle);
        assert!(dispatcher.in_flight().is_none());

        dispatcher.tick(at(2), &mut queue, &dyn_transport);
        settle().await;
        dispatcher.tick(at(3), &mut queue, &dyn_transport);

        let deliveries = transport.deliveries();
        assert_eq!(deliveries.len(), 2);
        assert!(deliveries[0].contains("session_duration=1"));
        assert!(deliveries[1].contains("session_duration=2"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_single_delivery_outstanding() {
        let transport = ScriptedTransport::new(vec![]);
        let dyn_transport: Arc<dyn Transport> = transport.clone();
        let mut dispatcher = Dispatcher::new(60);
        let mut queue = RequestQueue::new();
        queue.push_back(request(1));
        queue.push_back(request(2));

        dispatcher.tick(at(0), &mut queue, &dyn_transport);
        // Outcome not yet absorbed: further ticks must not dispatch.
        dispatcher.tick(at(0), &mut queue, &dyn_transport);
        dispatcher.tick(at(0), &mut queue, &dyn_transport);

        assert_eq!(transport.deliveries().len(), 1);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_requeues_at_head_and_backs_off() {
        let transport = ScriptedTransport::new(vec![DeliveryOutcome::Failed]);
        let dyn_transport: Arc<dyn Transport> = transport.clone();
        let mut dispatcher = Dispatcher::new(60);
        let mut queue = RequestQueue::new();
        queue.push_back(request(1));
        queue.push_back(request(2));

        dispatcher.tick(at(0), &mut queue, &dyn_transport);
        settle().await;
        assert!(dispatcher.tick(at(5), &mut queue, &dyn_transport));
        assert_eq!(
            *dispatcher.state(),
            DispatchState::Backoff { until: at(65) }
        );

        // The failed request is back at the head, ahead of newer data.
        assert_eq!(queue.len(), 2);
        assert_eq!(
            queue.iter().next().unwrap().body,
            RequestBody::SessionExtend { seconds: 1 }
        );

        // Not retried before the deadline.
        assert!(!dispatcher.tick(at(64), &mut queue, &dyn_transport));
        assert_eq!(transport.deliveries().len(), 1);

        // Retried on the first tick at or after the deadline, same request.
        dispatcher.tick(at(65), &mut queue, &dyn_transport);
        settle().await;
        let deliveries = transport.deliveries();
        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0], deliveries[1]);
    }

    #[tokio::test]
    async fn test_backoff_is_fixed_not_exponential() {
        let transport =
            ScriptedTransport::new(vec![DeliveryOutcome::Failed, DeliveryOutcome::Failed]);
        let dyn_transport: Arc<dyn Transport> = transport.clone();
        let mut dispatcher = Dispatcher::new(60);
        let mut queue = RequestQueue::new();
        queue.push_back(request(1));

        dispatcher.tick(at(0), &mut queue, &dyn_transport);
        settle().await;
        dispatcher.tick(at(1), &mut queue, &dyn_transport);
        assert_eq!(*dispatcher.state(), DispatchState::Backoff { until: at(61) });

        dispatcher.tick(at(61), &mut queue, &dyn_transport);
        settle().await;
        dispatcher.tick(at(62), &mut queue, &dyn_transport);
        // Second consecutive failure: same fixed interval.
        assert_eq!(*dispatcher.state(), DispatchState::Backoff { until: at(122) });
    }

    #[tokio::test]
    async fn test_idle_with_empty_queue_does_nothing() {
        let transport = ScriptedTransport::new(vec![]);
        let dyn_transport: Arc<dyn Transport> = transport.clone();
        let mut dispatcher = Dispatcher::new(60);
        let mut queue = RequestQueue::new();

        assert!(!dispatcher.tick(at(0), &mut queue, &dyn_transport));
        assert_eq!(*dispatcher.state(), DispatchState::Idle);
        assert!(transport.deliveries().is_empty());
    }
}

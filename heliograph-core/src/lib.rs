//! # heliograph-core
//!
//! Core library for heliograph - a durable telemetry client.
//!
//! This library provides:
//! - A request queue persisted to a single local state blob
//! - Single-in-flight dispatch with fixed failure backoff
//! - Session, view and timed-event duration accounting
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Producers (session, event, user-detail and crash calls) append enriched
//! request envelopes to a durable queue. A heartbeat task drives everything
//! else on a fixed cadence: automatic session-duration reports, folding
//! buffered events into bounded batches, and handing the queue head to the
//! HTTP transport one request at a time. Failed deliveries are retried from
//! the queue head after a fixed backoff, and the persisted queue replays on
//! restart, so a crash or an offline collector never loses acknowledged
//! data.
//!
//! ## Example
//!
//! ```rust,no_run
//! use heliograph_core::{Client, Config, EventData};
//!
//! # async fn run() -> heliograph_core::Result<()> {
//! let config = Config::load()?;
//! let client = Client::new(config)?;
//!
//! client.begin_session();
//! client.record_event(EventData::new("app_launched"));
//! client.end_session(None);
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use client::Client;
pub use config::Config;
pub use error::{Error, Result};
pub use events::EventData;
pub use request::{Request, RequestBody};
pub use transport::{DeliveryOutcome, Transport};
pub use users::UserPropertyOp;

// Public modules
pub mod client;
pub mod config;
pub mod crash;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod queue;
pub mod request;
pub mod session;
pub mod store;
pub mod transport;
pub mod users;

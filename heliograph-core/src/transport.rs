//! Delivery of one encoded request to the collector.
//!
//! The transport's whole contract is "deliver one request, report the
//! outcome"; the dispatcher guarantees a single call is outstanding at a
//! time. The HTTP implementation targets the collector's `/i` endpoint:
//! success is a 2xx status whose body parses as JSON with
//! `result == "Success"`; anything else counts as a failed delivery.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::{Error, Result};

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The collector acknowledged the request.
    Delivered,
    /// Network error, bad status or malformed acknowledgement.
    Failed,
}

/// Future returned by a delivery call.
pub type DeliveryFuture = Pin<Box<dyn Future<Output = DeliveryOutcome> + Send>>;

/// One-request delivery seam.
pub trait Transport: Send + Sync {
    /// Deliver one encoded query string; never panics, never retries.
    fn deliver(&self, query: String) -> DeliveryFuture;
}

/// HTTP transport against a collector's `/i` endpoint.
pub struct HttpTransport {
    http_client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// Build a transport for `server_url` (e.g. `https://stats.example.com`).
    pub fn new(server_url: &str, timeout: Duration) -> Result<Self> {
        if server_url.is_empty() {
            return Err(Error::Config(
                "client.server_url is required for delivery".to_string(),
            ));
        }

        let endpoint = format!("{}/i", server_url.trim_end_matches('/'));

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint,
        })
    }
}

impl Transport for HttpTransport {
    fn deliver(&self, query: String) -> DeliveryFuture {
        let http_client = self.http_client.clone();
        let url = format!("{}?{}", self.endpoint, query);

        Box::pin(async move {
            let response = match http_client.get(&url).send().await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(error = %e, "delivery failed: HTTP request error");
                    return DeliveryOutcome::Failed;
                }
            };

            let status = response.status();
            if !status.is_success() {
                tracing::warn!(status = %status, "delivery failed: bad status");
                return DeliveryOutcome::Failed;
            }

            match response.json::<serde_json::Value>().await {
                Ok(body) if body.get("result").and_then(|v| v.as_str()) == Some("Success") => {
                    DeliveryOutcome::Delivered
                }
                Ok(body) => {
                    tracing::warn!(body = %body, "delivery failed: unexpected acknowledgement");
                    DeliveryOutcome::Failed
                }
                Err(e) => {
                    tracing::warn!(error = %e, "delivery failed: unparsable acknowledgement");
                    DeliveryOutcome::Failed
                }
            }
        })
    }
}

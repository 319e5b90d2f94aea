//! HTTP client for downstream delivery.
//!
//! Handles request construction, timeout enforcement, and the response
//! classification that drives the retry state machine.

use std::time::Duration;

use bytes::Bytes;
use hookline_core::{AttemptErrorKind, EventId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, warn, Instrument};

use crate::error::{DeliveryError, Result};

/// Configuration for the downstream delivery client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the downstream; deliveries POST to `{base}/receive`.
    pub downstream_url: String,
    /// Per-attempt request timeout.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            downstream_url: "http://localhost:9000".to_string(),
            timeout: Duration::from_secs(10),
            user_agent: "Hookline-Delivery/1.0".to_string(),
        }
    }
}

/// Response from a downstream delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Total duration of the request.
    pub duration: Duration,
}

impl DeliveryResponse {
    /// Whether the downstream accepted the delivery (2xx).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Classification of one delivery attempt's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// 2xx response; terminal success.
    Success,
    /// 429, 5xx, network failure, or timeout; retry with backoff.
    Retryable(AttemptErrorKind),
    /// Any other 4xx; terminal failure.
    Permanent(AttemptErrorKind),
}

/// Classifies an HTTP status code per the retry policy table.
pub fn classify_status(status: u16) -> AttemptOutcome {
    match status {
        200..=299 => AttemptOutcome::Success,
        429 => AttemptOutcome::Retryable(AttemptErrorKind::RateLimited),
        500..=599 => AttemptOutcome::Retryable(AttemptErrorKind::ServerError),
        _ => AttemptOutcome::Permanent(AttemptErrorKind::ClientError),
    }
}

/// Classifies a transport-level failure.
///
/// Network errors and timeouts never produced a response; both retry.
pub fn classify_transport(error: &DeliveryError) -> AttemptOutcome {
    match error {
        DeliveryError::Timeout { .. } => AttemptOutcome::Retryable(AttemptErrorKind::Timeout),
        _ => AttemptOutcome::Retryable(AttemptErrorKind::Network),
    }
}

/// HTTP client optimized for webhook delivery.
///
/// Uses connection pooling and a fixed per-attempt timeout. The payload is
/// forwarded verbatim as the JSON body with the event id attached as a
/// correlation header.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    receive_url: String,
    config: ClientConfig,
}

impl DeliveryClient {
    /// Creates a new delivery client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// built with the provided settings.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        let receive_url = format!("{}/receive", config.downstream_url.trim_end_matches('/'));

        Ok(Self { client, receive_url, config })
    }

    /// Creates a client with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// URL deliveries are posted to.
    pub fn receive_url(&self) -> &str {
        &self.receive_url
    }

    /// Posts one event payload downstream.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` when the per-attempt deadline elapses and
    /// `Network` for connection-level failures. Non-2xx responses are NOT
    /// errors; the caller classifies the returned status code.
    pub async fn deliver(&self, event_id: EventId, payload: &[u8]) -> Result<DeliveryResponse> {
        let start = std::time::Instant::now();

        let span = info_span!("downstream_delivery", event_id = %event_id, url = %self.receive_url);

        async move {
            debug!("posting event downstream");

            let response = self
                .client
                .post(&self.receive_url)
                .header("content-type", "application/json")
                .header("X-Event-Id", event_id.to_string())
                .body(Bytes::copy_from_slice(payload))
                .send()
                .await;

            let duration = start.elapsed();

            match response {
                Ok(response) => {
                    let status_code = response.status().as_u16();
                    debug!(status = status_code, duration_ms = duration.as_millis(), "received response");
                    Ok(DeliveryResponse { status_code, duration })
                },
                Err(e) => {
                    warn!(duration_ms = duration.as_millis(), error = %e, "request failed");
                    if e.is_timeout() {
                        Err(DeliveryError::timeout(self.config.timeout.as_secs()))
                    } else if e.is_connect() {
                        Err(DeliveryError::network(format!("connection failed: {e}")))
                    } else {
                        Err(DeliveryError::network(e.to_string()))
                    }
                },
            }
        }
        .instrument(span)
        .await
    }
}

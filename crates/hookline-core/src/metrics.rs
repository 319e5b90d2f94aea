//! Prometheus metrics for the delivery pipeline.
//!
//! The [`Metrics`] struct owns its registry and is constructed once at
//! startup, then shared via `Arc`. All mutation goes through the atomic
//! counter primitives; nothing here does read-modify-write.

use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder};

use crate::error::{CoreError, Result};

/// Process-wide metrics registry for the pipeline.
pub struct Metrics {
    registry: Registry,

    /// Events accepted by the intake handler (fresh inserts only).
    pub events_received: IntCounter,

    /// Deliveries that reached a terminal `delivered` state.
    pub deliveries_succeeded: IntCounter,

    /// Deliveries that reached a terminal `failed_permanently` state.
    pub deliveries_failed: IntCounter,

    /// Retryable attempts that were re-enqueued with backoff.
    pub retry_attempts: IntCounter,

    /// Wall-clock duration of individual downstream POST attempts.
    pub delivery_latency: Histogram,
}

impl Metrics {
    /// Creates the registry and registers all collectors.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let events_received =
            IntCounter::with_opts(Opts::new("events_received_total", "Total webhook events received"))
                .map_err(|e| CoreError::InvalidInput(format!("metric registration failed: {e}")))?;
        let deliveries_succeeded = IntCounter::with_opts(Opts::new(
            "deliveries_succeeded_total",
            "Total successful webhook deliveries",
        ))
        .map_err(|e| CoreError::InvalidInput(format!("metric registration failed: {e}")))?;
        let deliveries_failed = IntCounter::with_opts(Opts::new(
            "deliveries_failed_total",
            "Total permanently failed webhook deliveries",
        ))
        .map_err(|e| CoreError::InvalidInput(format!("metric registration failed: {e}")))?;
        let retry_attempts =
            IntCounter::with_opts(Opts::new("retry_attempts_total", "Total retry attempts scheduled"))
                .map_err(|e| CoreError::InvalidInput(format!("metric registration failed: {e}")))?;
        let delivery_latency = Histogram::with_opts(HistogramOpts::new(
            "delivery_latency_seconds",
            "Downstream POST latency in seconds",
        ))
        .map_err(|e| CoreError::InvalidInput(format!("metric registration failed: {e}")))?;

        for collector in [
            Box::new(events_received.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(deliveries_succeeded.clone()),
            Box::new(deliveries_failed.clone()),
            Box::new(retry_attempts.clone()),
            Box::new(delivery_latency.clone()),
        ] {
            registry
                .register(collector)
                .map_err(|e| CoreError::InvalidInput(format!("metric registration failed: {e}")))?;
        }

        Ok(Self {
            registry,
            events_received,
            deliveries_succeeded,
            deliveries_failed,
            retry_attempts,
            delivery_latency,
        })
    }

    /// Renders the registry in Prometheus text exposition format.
    pub fn encode(&self) -> Result<String> {
        TextEncoder::new()
            .encode_to_string(&self.registry.gather())
            .map_err(|e| CoreError::InvalidInput(format!("metric encoding failed: {e}")))
    }
}

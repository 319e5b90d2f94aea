//! HTTP surface for the hookline pipeline.
//!
//! Intake, search, metrics, and health endpoints over Axum, plus the
//! configuration and crypto that gate the intake path.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use hookline_core::{storage::Storage, Clock, Metrics};

pub mod config;
pub mod crypto;
pub mod handlers;
pub mod server;

pub use config::Config;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Repositories for events and the delivery queue.
    pub storage: Arc<Storage>,
    /// Process-wide metrics registry.
    pub metrics: Arc<Metrics>,
    /// Clock used for ingest timestamps.
    pub clock: Arc<dyn Clock>,
    /// Shared secret for producer signature verification.
    pub hmac_secret: Arc<String>,
}

impl AppState {
    /// Creates the shared state.
    pub fn new(
        storage: Arc<Storage>,
        metrics: Arc<Metrics>,
        clock: Arc<dyn Clock>,
        hmac_secret: String,
    ) -> Self {
        Self { storage, metrics, clock, hmac_secret: Arc::new(hmac_secret) }
    }
}

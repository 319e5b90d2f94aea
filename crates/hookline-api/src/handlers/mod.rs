//! HTTP request handlers.

pub mod health;
pub mod ingest;
pub mod metrics;
pub mod search;

pub use health::{health_check, readiness_check};
pub use ingest::ingest_webhooks;
pub use metrics::export_metrics;
pub use search::search_webhooks;

//! Core domain models and storage layer for the hookline pipeline.
//!
//! Provides strongly-typed domain primitives, the error taxonomy, the
//! metrics registry, and the repositories for the event store and the
//! delivery job queue. All other crates depend on these foundational types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod metrics;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use metrics::Metrics;
pub use models::{
    AttemptErrorKind, DeliveryAttempt, EventId, EventStatus, NewEvent, WebhookEvent,
};
pub use time::{Clock, RealClock};

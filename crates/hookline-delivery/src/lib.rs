//! Webhook delivery engine with reliability guarantees.
//!
//! Async worker pool that leases jobs from the delivery queue, claims
//! events through the store's compare-and-set primitive, gates downstream
//! calls on a distributed rate limiter, and applies bounded exponential
//! backoff. Multi-replica safety comes from two cooperating mechanisms:
//!
//! ```text
//!   queue (at-least-once dispatch)  x  store claim (at-most-once in flight)
//!   = at-least-once attempts, at most one in-flight attempt per event
//! ```
//!
//! Neither mechanism alone suffices, and they are deliberately kept
//! separate: the queue recovers crashed workers via lease expiry, while
//! the stale-claim horizon in the store is a defense-in-depth backstop
//! against queue loss.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod engine;
pub mod error;
pub mod limiter;
pub mod retry;
pub mod worker;
pub mod worker_pool;

pub use client::{AttemptOutcome, ClientConfig, DeliveryClient, DeliveryResponse};
pub use engine::{DeliveryConfig, DeliveryEngine, EngineStats};
pub use error::{DeliveryError, Result};
pub use limiter::{AcquireOutcome, RateLimiter, RateLimiterConfig};
pub use retry::RetryPolicy;
pub use worker::DeliveryWorker;
pub use worker_pool::WorkerPool;

/// Default number of concurrent delivery workers per replica.
pub const DEFAULT_WORKER_COUNT: usize = 8;

/// Default batch size for leasing jobs from the queue.
pub const DEFAULT_BATCH_SIZE: usize = 10;

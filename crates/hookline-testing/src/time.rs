//! Deterministic time control for tests.
//!
//! Virtual clock whose `sleep` advances time immediately instead of
//! blocking, so backoff waits and rate-limiter windows run instantly in
//! tests while remaining observable through `now`/`now_utc`.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use chrono::{DateTime, TimeZone, Utc};
use hookline_core::Clock;

/// Test clock with virtual time progression.
#[derive(Clone)]
pub struct TestClock {
    /// Virtual nanoseconds elapsed since the clock was created.
    elapsed_ns: Arc<AtomicU64>,
    /// Base instant for monotonic calculations.
    base_instant: Instant,
    /// Base wall-clock time in whole seconds since the epoch.
    base_epoch_secs: i64,
}

impl TestClock {
    /// Creates a test clock anchored at the current wall-clock time.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Creates a test clock anchored at a specific wall-clock time.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            elapsed_ns: Arc::new(AtomicU64::new(0)),
            base_instant: Instant::now(),
            base_epoch_secs: start.timestamp(),
        }
    }

    /// Advances virtual time by the given duration.
    pub fn advance(&self, duration: Duration) {
        let ns = u64::try_from(duration.as_nanos().min(u128::from(u64::MAX))).unwrap_or(u64::MAX);
        self.elapsed_ns.fetch_add(ns, Ordering::AcqRel);
    }

    fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.load(Ordering::Acquire))
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base_instant + self.elapsed()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        let elapsed = self.elapsed();
        let base = Utc.timestamp_opt(self.base_epoch_secs, 0).single().unwrap_or_else(Utc::now);
        base + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        Box::pin(std::future::ready(()))
    }
}

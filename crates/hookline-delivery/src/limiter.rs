//! Distributed fixed-window rate limiter.
//!
//! A counter keyed by `(bucket, floor(now))` in the shared store. The
//! increment-and-read is a single upsert statement, so it is atomic against
//! concurrent acquirers on every replica: at most `limit` acquisitions can
//! observe a post-increment value within bound in any one-second window,
//! which is the whole correctness argument.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use hookline_core::Clock;
use sqlx::PgPool;
use tracing::debug;

use crate::error::Result;

/// Windows older than this many seconds are dropped opportunistically.
const WINDOW_RETENTION_SECS: i64 = 2;

/// Outcome of an acquire call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// A token was consumed; the caller may proceed.
    Acquired,
    /// The cumulative wait would exceed the acquire timeout.
    TimedOut,
}

/// Configuration for the rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Namespace key; one bucket per downstream identity.
    pub bucket: String,
    /// Tokens per one-second window, shared across all replicas.
    pub limit: u32,
    /// Maximum cumulative time to wait for a token.
    pub acquire_timeout: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            bucket: "downstream".to_string(),
            limit: 3,
            acquire_timeout: Duration::from_secs(2),
        }
    }
}

/// Distributed token bucket over the shared counter store.
pub struct RateLimiter {
    pool: PgPool,
    config: RateLimiterConfig,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Creates a limiter over the given pool.
    pub fn new(pool: PgPool, config: RateLimiterConfig, clock: Arc<dyn Clock>) -> Self {
        Self { pool, config, clock }
    }

    /// Attempts to consume one token, waiting across window boundaries.
    ///
    /// Succeeds immediately when the current window has capacity. Otherwise
    /// sleeps to the next window and retries, failing with
    /// [`AcquireOutcome::TimedOut`] once the cumulative wait would exceed
    /// the configured timeout. Approximate fairness only; no FIFO ordering
    /// between waiters.
    ///
    /// # Errors
    ///
    /// Returns error if the counter store is unreachable.
    pub async fn acquire(&self) -> Result<AcquireOutcome> {
        let started = self.clock.now();

        loop {
            let now = self.clock.now_utc();
            let window = now.timestamp();

            let count = self.increment_window(window).await?;
            if count <= i64::from(self.config.limit) {
                if count == 1 {
                    // First admission of the window; drop expired windows.
                    self.expire_windows(window).await?;
                }
                return Ok(AcquireOutcome::Acquired);
            }

            let wait = wait_until_next_window(now);
            let waited = self.clock.now().saturating_duration_since(started);
            if waited + wait > self.config.acquire_timeout {
                debug!(
                    bucket = %self.config.bucket,
                    window,
                    count,
                    "rate acquire timed out"
                );
                return Ok(AcquireOutcome::TimedOut);
            }

            self.clock.sleep(wait).await;
        }
    }

    /// Atomic increment-and-read for one window. Single round trip.
    async fn increment_window(&self, window: i64) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            r"
            INSERT INTO rate_limit_windows (bucket, window_start, count)
            VALUES ($1, $2, 1)
            ON CONFLICT (bucket, window_start)
            DO UPDATE SET count = rate_limit_windows.count + 1
            RETURNING count::bigint
            ",
        )
        .bind(&self.config.bucket)
        .bind(window)
        .fetch_one(&self.pool)
        .await
        .map_err(hookline_core::CoreError::from)?;

        Ok(count.0)
    }

    async fn expire_windows(&self, current_window: i64) -> Result<()> {
        sqlx::query("DELETE FROM rate_limit_windows WHERE bucket = $1 AND window_start < $2")
            .bind(&self.config.bucket)
            .bind(current_window - WINDOW_RETENTION_SECS)
            .execute(&self.pool)
            .await
            .map_err(hookline_core::CoreError::from)?;

        Ok(())
    }
}

/// Time remaining until the next one-second window opens.
fn wait_until_next_window(now: DateTime<Utc>) -> Duration {
    let ms_into_window = now.timestamp_subsec_millis().min(999);
    Duration::from_millis(u64::from(1000 - ms_into_window))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn wait_spans_to_the_next_second_boundary() {
        let at_250ms = Utc.timestamp_opt(1_700_000_000, 250_000_000).unwrap();
        assert_eq!(wait_until_next_window(at_250ms), Duration::from_millis(750));

        let on_boundary = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(wait_until_next_window(on_boundary), Duration::from_millis(1000));
    }

    #[test]
    fn wait_never_exceeds_one_window() {
        let late = Utc.timestamp_opt(1_700_000_000, 999_999_999).unwrap();
        assert!(wait_until_next_window(late) >= Duration::from_millis(1));
        assert!(wait_until_next_window(late) <= Duration::from_secs(1));
    }
}

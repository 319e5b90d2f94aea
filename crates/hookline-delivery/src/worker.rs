//! Delivery worker: the claim → rate-gate → deliver → record pipeline.
//!
//! Workers consume leased jobs from the queue. The event store's claim
//! primitive decides whether this replica may act; redundant job
//! deliveries simply bounce off `NotClaimable`. All failure handling ends
//! in exactly one of: a recorded attempt, a released claim, or a leased
//! job left to the visibility timeout.

use std::{sync::Arc, time::Duration};

use hookline_core::{
    storage::{
        events::{AttemptDisposition, ClaimOutcome, RecordOutcome},
        queue::QueuedJob,
        Storage,
    },
    Clock, DeliveryAttempt, Metrics, WebhookEvent,
};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    client::{classify_status, classify_transport, AttemptOutcome, DeliveryClient},
    engine::{DeliveryConfig, EngineStats},
    error::Result,
    limiter::{AcquireOutcome, RateLimiter},
};

/// Individual worker that processes delivery jobs.
pub struct DeliveryWorker {
    id: usize,
    storage: Arc<Storage>,
    config: DeliveryConfig,
    client: Arc<DeliveryClient>,
    limiter: Arc<RateLimiter>,
    metrics: Arc<Metrics>,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    clock: Arc<dyn Clock>,
}

impl DeliveryWorker {
    /// Creates a new delivery worker.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        storage: Arc<Storage>,
        config: DeliveryConfig,
        client: Arc<DeliveryClient>,
        limiter: Arc<RateLimiter>,
        metrics: Arc<Metrics>,
        stats: Arc<RwLock<EngineStats>>,
        cancellation_token: CancellationToken,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { id, storage, config, client, limiter, metrics, stats, cancellation_token, clock }
    }

    /// Main worker loop. Leases and processes jobs until cancelled.
    ///
    /// # Errors
    ///
    /// Returns error only if worker setup fails; batch errors are logged
    /// and retried after a pause.
    pub async fn run(&self) -> Result<()> {
        info!(worker_id = self.id, "delivery worker starting");

        loop {
            if self.cancellation_token.is_cancelled() {
                info!(worker_id = self.id, "delivery worker received shutdown signal");
                break;
            }

            match self.process_batch().await {
                Ok(processed) => {
                    if processed == 0 {
                        tokio::select! {
                            () = self.clock.sleep(self.config.poll_interval) => {}
                            () = self.cancellation_token.cancelled() => break,
                        }
                    }
                },
                Err(error) => {
                    error!(
                        worker_id = self.id,
                        error = %error,
                        "worker batch processing failed"
                    );
                    // Pause before retrying to avoid a tight error loop.
                    tokio::select! {
                        () = self.clock.sleep(Duration::from_secs(5)) => {}
                        () = self.cancellation_token.cancelled() => break,
                    }
                },
            }
        }

        info!(worker_id = self.id, "delivery worker stopped");
        Ok(())
    }

    /// Leases and processes a batch of due jobs.
    async fn process_batch(&self) -> Result<usize> {
        let jobs = self
            .storage
            .queue
            .claim_due(
                self.clock.now_utc(),
                self.config.queue_visibility,
                i64::try_from(self.config.batch_size).unwrap_or(10),
            )
            .await?;
        let batch_size = jobs.len();

        debug!(worker_id = self.id, batch_size, "processing job batch");

        for job in jobs {
            if self.cancellation_token.is_cancelled() {
                break;
            }
            self.handle_job(job).await;
        }

        Ok(batch_size)
    }

    /// Processes one leased job, completing it unless handling failed.
    ///
    /// A failed handler leaves the lease in place; the queue redelivers
    /// after the visibility timeout. That is the sole recovery path for
    /// store outages mid-delivery.
    pub async fn handle_job(&self, job: QueuedJob) {
        {
            let mut stats = self.stats.write().await;
            stats.in_flight_deliveries += 1;
        }

        let result = self.process_job(job).await;

        {
            let mut stats = self.stats.write().await;
            stats.in_flight_deliveries -= 1;
            stats.events_processed += 1;
        }

        match result {
            Ok(()) => {
                if let Err(error) = self.storage.queue.complete(job.id).await {
                    warn!(
                        worker_id = self.id,
                        job_id = job.id,
                        error = %error,
                        "failed to complete job, it will be redelivered"
                    );
                }
            },
            Err(error) => {
                warn!(
                    worker_id = self.id,
                    job_id = job.id,
                    event_id = %job.event_id,
                    error = %error,
                    "job handling failed, leaving lease for redelivery"
                );
            },
        }
    }

    /// Claims the event and runs the delivery pipeline.
    async fn process_job(&self, job: QueuedJob) -> Result<()> {
        let now = self.clock.now_utc();
        let stale_before = now - self.config.claim_stale;

        match self.storage.events.claim(job.event_id, now, stale_before).await? {
            ClaimOutcome::NotClaimable => {
                // Another replica owns it, or the event is terminal.
                debug!(worker_id = self.id, event_id = %job.event_id, "event not claimable");
                Ok(())
            },
            ClaimOutcome::Claimed(event) => self.deliver_claimed(*event).await,
        }
    }

    /// Runs one attempt against a claimed event.
    async fn deliver_claimed(&self, event: WebhookEvent) -> Result<()> {
        match self.limiter.acquire().await? {
            AcquireOutcome::TimedOut => return self.requeue_rate_limited(&event).await,
            AcquireOutcome::Acquired => {},
        }

        let attempt_number = u32::try_from(event.attempt_count).unwrap_or(0) + 1;
        let attempted_at = self.clock.now_utc();

        debug!(
            worker_id = self.id,
            event_id = %event.id,
            attempt = attempt_number,
            "attempting webhook delivery"
        );

        let started = self.clock.now();
        let result = self.client.deliver(event.id, &event.payload).await;
        let elapsed = self.clock.now().saturating_duration_since(started);
        self.metrics.delivery_latency.observe(elapsed.as_secs_f64());

        let http_status = result.as_ref().ok().map(|response| response.status_code);
        let outcome = match &result {
            Ok(response) => classify_status(response.status_code),
            Err(error) if error.is_transport() => classify_transport(error),
            Err(error) => return Err(error.clone()),
        };

        match outcome {
            AttemptOutcome::Success => {
                let attempt = DeliveryAttempt::succeeded(
                    attempt_number,
                    attempted_at,
                    http_status.unwrap_or_default(),
                );
                match self
                    .storage
                    .events
                    .record_attempt(event.id, &attempt, AttemptDisposition::Delivered)
                    .await?
                {
                    RecordOutcome::Recorded => {
                        self.metrics.deliveries_succeeded.inc();
                        info!(
                            worker_id = self.id,
                            event_id = %event.id,
                            status = attempt.http_status.unwrap_or_default(),
                            attempt = attempt_number,
                            duration_ms = elapsed.as_millis(),
                            "webhook delivered"
                        );
                    },
                    RecordOutcome::Conflict => self.log_lost_claim(&event),
                }
            },
            AttemptOutcome::Permanent(kind) => {
                let attempt =
                    DeliveryAttempt::failed(attempt_number, attempted_at, http_status, kind);
                self.record_terminal_failure(&event, &attempt).await?;
            },
            AttemptOutcome::Retryable(kind) => {
                let attempt =
                    DeliveryAttempt::failed(attempt_number, attempted_at, http_status, kind);
                if self.config.retry_policy.is_final_attempt(attempt_number) {
                    self.record_terminal_failure(&event, &attempt).await?;
                } else {
                    self.schedule_retry(&event, attempt).await?;
                }
            },
        }

        Ok(())
    }

    /// Local rate limiter timed out: no attempt slot is consumed.
    ///
    /// The claim is released (the abandonment back-edge) and the job comes
    /// back after a short delay so local congestion does not inflate the
    /// backoff schedule.
    async fn requeue_rate_limited(&self, event: &WebhookEvent) -> Result<()> {
        self.storage.events.release(event.id).await?;

        let delay = self
            .config
            .retry_policy
            .rate_limit_requeue_delay(u32::try_from(event.attempt_count).unwrap_or(0));
        let not_before = self.clock.now_utc() + delay;
        self.storage.queue.enqueue(event.id, not_before).await?;

        debug!(
            worker_id = self.id,
            event_id = %event.id,
            delay_ms = delay.as_millis(),
            "rate limited locally, claim released and re-enqueued"
        );

        Ok(())
    }

    /// Records a non-final retryable attempt and schedules the next one.
    async fn schedule_retry(&self, event: &WebhookEvent, attempt: DeliveryAttempt) -> Result<()> {
        let delay = self.config.retry_policy.backoff_delay(attempt.attempt_number);
        let next_attempt_at = attempt.attempted_at + delay;

        match self
            .storage
            .events
            .record_attempt(event.id, &attempt, AttemptDisposition::Retry { next_attempt_at })
            .await?
        {
            RecordOutcome::Recorded => {
                self.metrics.retry_attempts.inc();
                self.storage.queue.enqueue(event.id, next_attempt_at).await?;

                warn!(
                    worker_id = self.id,
                    event_id = %event.id,
                    attempt = attempt.attempt_number,
                    http_status = ?attempt.http_status,
                    next_attempt_at = %next_attempt_at,
                    "delivery failed, retry scheduled"
                );
            },
            RecordOutcome::Conflict => self.log_lost_claim(event),
        }

        Ok(())
    }

    /// Records a terminal failure: permanent rejection or exhausted budget.
    async fn record_terminal_failure(
        &self,
        event: &WebhookEvent,
        attempt: &DeliveryAttempt,
    ) -> Result<()> {
        match self
            .storage
            .events
            .record_attempt(event.id, attempt, AttemptDisposition::FailedPermanently)
            .await?
        {
            RecordOutcome::Recorded => {
                self.metrics.deliveries_failed.inc();
                error!(
                    worker_id = self.id,
                    event_id = %event.id,
                    attempt = attempt.attempt_number,
                    http_status = ?attempt.http_status,
                    error = ?attempt.error,
                    "delivery permanently failed"
                );
            },
            RecordOutcome::Conflict => self.log_lost_claim(event),
        }

        Ok(())
    }

    /// The stale reaper took the claim mid-flight; abandon silently.
    fn log_lost_claim(&self, event: &WebhookEvent) {
        debug!(
            worker_id = self.id,
            event_id = %event.id,
            "claim lost before recording attempt, abandoning"
        );
    }
}

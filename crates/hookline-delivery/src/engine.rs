//! Delivery engine coordinating the worker pool.
//!
//! Owns the shared client, rate limiter, and cancellation token, and
//! exposes start/shutdown lifecycle plus lightweight runtime stats.

use std::{sync::Arc, time::Duration};

use hookline_core::{storage::Storage, Clock, Metrics};
use sqlx::PgPool;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    client::{ClientConfig, DeliveryClient},
    error::Result,
    limiter::{RateLimiter, RateLimiterConfig},
    retry::RetryPolicy,
    worker_pool::WorkerPool,
};

/// Configuration for the delivery engine.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Number of concurrent delivery workers per replica.
    pub worker_count: usize,

    /// Maximum jobs to lease per worker batch.
    pub batch_size: usize,

    /// How often workers poll for due jobs when the queue is empty.
    pub poll_interval: Duration,

    /// Age beyond which a `delivering` claim may be reclaimed.
    pub claim_stale: Duration,

    /// Job lease duration; failed handlers redeliver after this.
    pub queue_visibility: Duration,

    /// Backoff schedule and attempt budget.
    pub retry_policy: RetryPolicy,

    /// Downstream HTTP client configuration.
    pub client_config: ClientConfig,

    /// Shared rate limiter configuration.
    pub limiter_config: RateLimiterConfig,

    /// Maximum time to wait for workers on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            worker_count: crate::DEFAULT_WORKER_COUNT,
            batch_size: crate::DEFAULT_BATCH_SIZE,
            poll_interval: Duration::from_millis(250),
            claim_stale: Duration::from_secs(120),
            queue_visibility: Duration::from_secs(60),
            retry_policy: RetryPolicy::default(),
            client_config: ClientConfig::default(),
            limiter_config: RateLimiterConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Runtime statistics for engine monitoring.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Number of active delivery workers.
    pub active_workers: usize,
    /// Jobs processed since startup.
    pub events_processed: u64,
    /// Deliveries currently in flight.
    pub in_flight_deliveries: u64,
}

/// Main delivery engine coordinating webhook delivery workers.
pub struct DeliveryEngine {
    storage: Arc<Storage>,
    config: DeliveryConfig,
    client: Arc<DeliveryClient>,
    limiter: Arc<RateLimiter>,
    metrics: Arc<Metrics>,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    worker_pool: Option<WorkerPool>,
    clock: Arc<dyn Clock>,
}

impl DeliveryEngine {
    /// Creates a new delivery engine.
    ///
    /// # Errors
    ///
    /// Returns error if the delivery client cannot be initialized.
    pub fn new(
        pool: PgPool,
        config: DeliveryConfig,
        metrics: Arc<Metrics>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let storage = Arc::new(Storage::new(pool.clone()));
        let client = Arc::new(DeliveryClient::new(config.client_config.clone())?);
        let limiter =
            Arc::new(RateLimiter::new(pool, config.limiter_config.clone(), clock.clone()));

        Ok(Self {
            storage,
            config,
            client,
            limiter,
            metrics,
            stats: Arc::new(RwLock::new(EngineStats::default())),
            cancellation_token: CancellationToken::new(),
            worker_pool: None,
            clock,
        })
    }

    /// Starts the configured worker pool.
    ///
    /// Returns immediately after spawning workers; use [`Self::shutdown`]
    /// to stop gracefully.
    ///
    /// # Errors
    ///
    /// Returns error if the worker pool fails to spawn.
    pub async fn start(&mut self) -> Result<()> {
        info!(
            worker_count = self.config.worker_count,
            batch_size = self.config.batch_size,
            "starting webhook delivery engine"
        );

        let mut worker_pool = WorkerPool::new(
            self.storage.clone(),
            self.config.clone(),
            self.client.clone(),
            self.limiter.clone(),
            self.metrics.clone(),
            self.stats.clone(),
            self.cancellation_token.clone(),
            self.clock.clone(),
        );

        worker_pool.spawn_workers().await?;
        self.worker_pool = Some(worker_pool);

        info!("delivery engine started");
        Ok(())
    }

    /// Gracefully shuts down the engine.
    ///
    /// Signals all workers to stop leasing new jobs and waits for
    /// in-flight deliveries to complete within the shutdown timeout.
    ///
    /// # Errors
    ///
    /// Returns error if graceful shutdown times out.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("shutting down delivery engine");

        if let Some(worker_pool) = self.worker_pool.take() {
            worker_pool.shutdown_graceful(self.config.shutdown_timeout).await?;
        } else {
            info!("delivery engine was not started, shutdown completed immediately");
        }
        Ok(())
    }

    /// Returns current engine statistics.
    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }
}

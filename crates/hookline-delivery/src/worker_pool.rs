//! Worker pool management with structured concurrency.
//!
//! Lifecycle management and graceful shutdown for supervised delivery
//! worker tasks.

use std::{sync::Arc, time::Duration};

use hookline_core::{storage::Storage, Clock, Metrics};
use tokio::{sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    client::DeliveryClient,
    engine::{DeliveryConfig, EngineStats},
    error::{DeliveryError, Result},
    limiter::RateLimiter,
    worker::DeliveryWorker,
};

/// Pool of supervised delivery worker tasks.
pub struct WorkerPool {
    storage: Arc<Storage>,
    config: DeliveryConfig,
    client: Arc<DeliveryClient>,
    limiter: Arc<RateLimiter>,
    metrics: Arc<Metrics>,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    worker_handles: Vec<JoinHandle<Result<()>>>,
    clock: Arc<dyn Clock>,
}

impl WorkerPool {
    /// Creates a new worker pool.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<Storage>,
        config: DeliveryConfig,
        client: Arc<DeliveryClient>,
        limiter: Arc<RateLimiter>,
        metrics: Arc<Metrics>,
        stats: Arc<RwLock<EngineStats>>,
        cancellation_token: CancellationToken,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            config,
            client,
            limiter,
            metrics,
            stats,
            cancellation_token,
            worker_handles: Vec::new(),
            clock,
        }
    }

    /// Spawns all configured workers and begins processing.
    ///
    /// Workers run until cancellation is requested. Returns immediately
    /// after spawning.
    ///
    /// # Errors
    ///
    /// Currently never fails; the signature allows future validation.
    pub async fn spawn_workers(&mut self) -> Result<()> {
        info!(worker_count = self.config.worker_count, "spawning delivery workers");

        {
            let mut stats = self.stats.write().await;
            stats.active_workers = self.config.worker_count;
        }

        for worker_id in 0..self.config.worker_count {
            let worker = DeliveryWorker::new(
                worker_id,
                self.storage.clone(),
                self.config.clone(),
                self.client.clone(),
                self.limiter.clone(),
                self.metrics.clone(),
                self.stats.clone(),
                self.cancellation_token.clone(),
                self.clock.clone(),
            );

            let handle = tokio::spawn(async move {
                let result = worker.run().await;

                if let Err(ref error) = result {
                    error!(worker_id, error = %error, "delivery worker terminated with error");
                }

                result
            });

            self.worker_handles.push(handle);
        }

        info!(spawned_workers = self.worker_handles.len(), "all delivery workers spawned");

        Ok(())
    }

    /// Gracefully shuts down all workers.
    ///
    /// Signals cancellation and waits for workers to finish their current
    /// work within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns error if the timeout is exceeded.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            worker_count = self.worker_handles.len(),
            timeout_seconds = timeout.as_secs(),
            "initiating graceful worker shutdown"
        );

        self.cancellation_token.cancel();

        let shutdown_future = async {
            let mut failures = 0usize;

            for (worker_id, handle) in
                std::mem::take(&mut self.worker_handles).into_iter().enumerate()
            {
                match handle.await {
                    Ok(Ok(())) => {},
                    Ok(Err(error)) => {
                        warn!(worker_id, error = %error, "worker completed with error during shutdown");
                        failures += 1;
                    },
                    Err(join_error) => {
                        error!(worker_id, error = %join_error, "worker task panicked during shutdown");
                        failures += 1;
                    },
                }
            }

            {
                let mut stats = self.stats.write().await;
                stats.active_workers = 0;
            }

            failures
        };

        match tokio::time::timeout(timeout, shutdown_future).await {
            Ok(failures) => {
                if failures > 0 {
                    warn!(failures, "some workers completed with errors during shutdown");
                }
                info!("worker pool shutdown completed");
                Ok(())
            },
            Err(_elapsed) => {
                error!(
                    timeout_seconds = timeout.as_secs(),
                    "worker shutdown timed out, some workers may still be running"
                );
                Err(DeliveryError::ShutdownTimeout { timeout })
            },
        }
    }

    /// Checks whether any workers are still running.
    pub fn has_active_workers(&self) -> bool {
        self.worker_handles.iter().any(|h| !h.is_finished())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let active = self.worker_handles.iter().filter(|h| !h.is_finished()).count();

        if active > 0 && !self.cancellation_token.is_cancelled() {
            warn!(
                active_workers = active,
                "worker pool dropped with active workers, forcing cancellation"
            );
            self.cancellation_token.cancel();
        }
    }
}

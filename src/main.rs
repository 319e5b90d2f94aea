//! Hookline webhook delivery service.
//!
//! Main entry point. Initializes configuration, the database pool and
//! schema, the metrics registry, the delivery engine, and the HTTP
//! server, then coordinates graceful shutdown.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use hookline_api::{server, AppState, Config};
use hookline_core::{storage::Storage, Metrics, RealClock};
use hookline_delivery::DeliveryEngine;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    init_tracing(&config);

    info!("starting hookline webhook delivery service");
    info!(
        database_url = %config.database_url_masked(),
        host = %config.host,
        port = config.port,
        worker_concurrency = config.worker_concurrency,
        rate_limit_per_sec = config.rate_limit_per_sec,
        "configuration loaded"
    );

    let pool = create_database_pool(&config).await?;
    info!("database connection pool established");

    hookline_core::storage::schema::ensure_schema(&pool)
        .await
        .context("failed to bootstrap database schema")?;
    info!("database schema ensured");

    let metrics = Arc::new(Metrics::new().context("failed to build metrics registry")?);
    let clock = Arc::new(RealClock::new());

    // Delivery engine: workers consume the job queue and post downstream.
    let mut engine = DeliveryEngine::new(
        pool.clone(),
        config.to_delivery_config(),
        metrics.clone(),
        clock.clone(),
    )
    .context("failed to build delivery engine")?;
    engine.start().await.context("failed to start delivery engine")?;

    // HTTP surface: intake, search, metrics, health.
    let storage = Arc::new(Storage::new(pool.clone()));
    let state = AppState::new(storage, metrics, clock, config.hmac_secret.clone());
    let addr = config.parse_server_addr()?;

    info!(addr = %addr, "hookline is ready to receive webhooks");

    // Serves until SIGTERM/CTRL-C; shutdown drains in-flight requests.
    if let Err(e) = server::start_server(state, &config, addr).await {
        error!(error = %e, "HTTP server failed");
    }

    info!("HTTP server stopped, shutting down delivery engine");
    if let Err(e) = engine.shutdown().await {
        error!(error = %e, "delivery engine shutdown failed");
    }

    pool.close().await;
    info!("database connections closed");

    info!("hookline shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing(config: &Config) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.rust_log))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer().with_target(true).with_file(true).with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Creates the database connection pool with startup retries.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    let mut retries = 0;

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("failed to verify database connection")?;

                return Ok(pool);
            },
            Err(_e) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    "database connection failed, retrying"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("failed to create database connection pool after retries");
            },
        }
    }
}

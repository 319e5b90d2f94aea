//! Idempotent schema bootstrap.
//!
//! Applied at service startup and by the test harness. Every statement is
//! `IF NOT EXISTS` so concurrent replicas can race through it safely.

use sqlx::PgPool;

use crate::error::Result;

/// Creates all tables and indexes used by the pipeline.
///
/// # Errors
///
/// Returns `CoreError::Database` if any DDL statement fails.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS events (
            id UUID PRIMARY KEY,
            idempotency_key TEXT,
            event_type TEXT,
            payload BYTEA NOT NULL,
            signature TEXT NOT NULL,
            status TEXT NOT NULL,
            received_at TIMESTAMPTZ NOT NULL,
            claimed_at TIMESTAMPTZ,
            attempts JSONB NOT NULL DEFAULT '[]'::jsonb,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            next_attempt_at TIMESTAMPTZ
        )
        ",
    )
    .execute(pool)
    .await?;

    // Idempotency keys are globally unique where present; absent keys do not
    // collide with each other.
    sqlx::query(
        r"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_events_idempotency_key
        ON events(idempotency_key)
        WHERE idempotency_key IS NOT NULL
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_status ON events(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_received_at ON events(received_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_event_type ON events(event_type)")
        .execute(pool)
        .await?;
    sqlx::query(
        r"
        CREATE INDEX IF NOT EXISTS idx_events_status_received_at
        ON events(status, received_at)
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS delivery_jobs (
            id BIGSERIAL PRIMARY KEY,
            event_id UUID NOT NULL,
            not_before TIMESTAMPTZ NOT NULL,
            locked_until TIMESTAMPTZ,
            enqueued_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE INDEX IF NOT EXISTS idx_delivery_jobs_due
        ON delivery_jobs(not_before)
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS rate_limit_windows (
            bucket TEXT NOT NULL,
            window_start BIGINT NOT NULL,
            count INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (bucket, window_start)
        )
        ",
    )
    .execute(pool)
    .await?;

    Ok(())
}

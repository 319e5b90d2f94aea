//! Repository for the delayed delivery job queue.
//!
//! At-least-once dispatch: a job becomes visible once `not_before` passes,
//! is leased to exactly one consumer via `FOR UPDATE SKIP LOCKED`, and is
//! redelivered if the lease expires before the consumer completes it. The
//! event store's claim primitive makes redundant deliveries idempotent, so
//! redelivery here is safe by design of the layer above.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::{CoreError, Result},
    models::EventId,
};

/// A leased work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedJob {
    /// Queue-internal job id, used to complete the lease.
    pub id: i64,
    /// Event this job asks a worker to deliver.
    pub event_id: EventId,
}

/// Repository for delivery jobs.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Records a work item visible to consumers at `now >= not_before`.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn enqueue(&self, event_id: EventId, not_before: DateTime<Utc>) -> Result<()> {
        sqlx::query("INSERT INTO delivery_jobs (event_id, not_before) VALUES ($1, $2)")
            .bind(event_id)
            .bind(not_before)
            .execute(&*self.pool)
            .await?;

        Ok(())
    }

    /// Leases up to `limit` due jobs to the caller.
    ///
    /// Jobs are due when `not_before` has passed and no live lease exists.
    /// `SKIP LOCKED` lets concurrent consumers lease disjoint sets without
    /// blocking each other. The lease lasts `visibility`; a consumer that
    /// crashes or fails simply lets it lapse and the job is handed out
    /// again.
    ///
    /// # Errors
    ///
    /// Returns error if the transaction fails.
    pub async fn claim_due(
        &self,
        now: DateTime<Utc>,
        visibility: Duration,
        limit: i64,
    ) -> Result<Vec<QueuedJob>> {
        let visibility = chrono::Duration::from_std(visibility)
            .map_err(|e| CoreError::InvalidInput(format!("visibility out of range: {e}")))?;
        let locked_until = now + visibility;

        let mut tx = self.pool.begin().await?;

        let job_ids: Vec<i64> = sqlx::query_scalar(
            r"
            SELECT id FROM delivery_jobs
            WHERE not_before <= $1
              AND (locked_until IS NULL OR locked_until < $1)
            ORDER BY not_before ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            ",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        if job_ids.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        let rows: Vec<(i64, Uuid)> = sqlx::query_as(
            r"
            UPDATE delivery_jobs
            SET locked_until = $2
            WHERE id = ANY($1)
            RETURNING id, event_id
            ",
        )
        .bind(&job_ids)
        .bind(locked_until)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(rows.into_iter().map(|(id, event_id)| QueuedJob { id, event_id: EventId(event_id) }).collect())
    }

    /// Completes a leased job, removing it from the queue.
    ///
    /// # Errors
    ///
    /// Returns error if the delete fails.
    pub async fn complete(&self, job_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM delivery_jobs WHERE id = $1")
            .bind(job_id)
            .execute(&*self.pool)
            .await?;

        Ok(())
    }

    /// Number of jobs currently in the queue, leased or not.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn depth(&self) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM delivery_jobs").fetch_one(&*self.pool).await?;

        Ok(count.0)
    }
}

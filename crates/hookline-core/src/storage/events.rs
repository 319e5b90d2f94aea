//! Repository for the durable event store.
//!
//! Each operation here is one atomic statement against a single event row.
//! The claim and record primitives are conditional updates whose WHERE
//! clause encodes the legal state transitions, which is what makes
//! concurrent replicas safe without application-level locking.

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::Result,
    models::{DeliveryAttempt, EventId, EventStatus, NewEvent, WebhookEvent},
};

const EVENT_COLUMNS: &str = "id, idempotency_key, event_type, payload, signature, status, \
                             received_at, claimed_at, attempts, attempt_count, next_attempt_at";

/// Outcome of an insert attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A fresh record was created.
    Inserted(EventId),
    /// The idempotency key collided with an existing record.
    Duplicate(EventId),
}

/// Outcome of a claim attempt.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// The caller now owns the event; snapshot taken after the transition.
    Claimed(Box<WebhookEvent>),
    /// Another worker owns it, or the event is terminal.
    NotClaimable,
}

/// Outcome of an attempt-append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The attempt was appended and the status transition applied.
    Recorded,
    /// The event was no longer `delivering` at the instant of the write;
    /// the caller lost its claim to the stale reaper.
    Conflict,
}

/// What the recorded attempt means for the event's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptDisposition {
    /// Terminal success.
    Delivered,
    /// Terminal failure.
    FailedPermanently,
    /// Back to `received`, eligible again at the given time.
    Retry {
        /// Advisory earliest start of the next attempt.
        next_attempt_at: DateTime<Utc>,
    },
}

/// Filter for the search projection.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Restrict to these statuses; empty means all.
    pub status: Vec<EventStatus>,
    /// Exact event type match.
    pub event_type: Option<String>,
    /// Inclusive lower bound on `received_at`.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `received_at`.
    pub to: Option<DateTime<Utc>>,
    /// Rows to skip.
    pub skip: i64,
    /// Maximum rows to return.
    pub limit: i64,
}

/// One bucket of the hourly intake histogram.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HourlyBucket {
    /// Hour label, `YYYY-MM-DD HH:00` in UTC.
    pub hour: String,
    /// Events received within the hour.
    pub count: i64,
}

/// Aggregates computed over the filtered set, independent of pagination.
#[derive(Debug, Clone, Serialize, Default)]
pub struct SearchAggregates {
    /// Event count per status.
    pub by_status: BTreeMap<String, i64>,
    /// Event count per event type; untyped events group under `unknown`.
    pub by_type: BTreeMap<String, i64>,
    /// Hourly histogram of `received_at`, ascending.
    pub hourly: Vec<HourlyBucket>,
}

/// Page of search results plus aggregates.
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// Matching events, `received_at` descending, ties broken by id.
    pub items: Vec<WebhookEvent>,
    /// Aggregates over the whole filtered set.
    pub aggregates: SearchAggregates,
}

/// Repository for event records.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Inserts a fresh event with `status = received`.
    ///
    /// An idempotency-key collision is not an error: the existing record's
    /// id is returned as [`InsertOutcome::Duplicate`]. The unique partial
    /// index makes this safe under concurrent replicas; whichever insert
    /// loses the race observes the violation and resolves the winner's id.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails for any other reason.
    pub async fn insert(&self, event: &NewEvent) -> Result<InsertOutcome> {
        let inserted = sqlx::query(
            r"
            INSERT INTO events (
                id, idempotency_key, event_type, payload, signature,
                status, received_at, attempts, attempt_count
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, '[]'::jsonb, 0)
            ",
        )
        .bind(event.id)
        .bind(&event.idempotency_key)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(&event.signature)
        .bind(EventStatus::Received)
        .bind(event.received_at)
        .execute(&*self.pool)
        .await
        .map_err(crate::error::CoreError::from);

        match inserted {
            Ok(_) => Ok(InsertOutcome::Inserted(event.id)),
            Err(err) if err.is_unique_violation() => {
                let Some(key) = event.idempotency_key.as_deref() else {
                    return Err(err);
                };
                let existing: (Uuid,) =
                    sqlx::query_as("SELECT id FROM events WHERE idempotency_key = $1")
                        .bind(key)
                        .fetch_one(&*self.pool)
                        .await?;
                Ok(InsertOutcome::Duplicate(EventId(existing.0)))
            },
            Err(err) => Err(err),
        }
    }

    /// Atomically claims an event for delivery.
    ///
    /// Transitions to `delivering` and stamps `claimed_at = now` iff the
    /// event is `received`, or is `delivering` with a claim older than
    /// `stale_before` (reclaiming abandoned work). Anything else is
    /// [`ClaimOutcome::NotClaimable`].
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn claim(
        &self,
        event_id: EventId,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        let event = sqlx::query_as::<_, WebhookEvent>(&format!(
            r"
            UPDATE events
            SET status = 'delivering', claimed_at = $2
            WHERE id = $1
              AND (status = 'received'
                   OR (status = 'delivering' AND claimed_at < $3))
            RETURNING {EVENT_COLUMNS}
            ",
        ))
        .bind(event_id)
        .bind(now)
        .bind(stale_before)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(match event {
            Some(event) => ClaimOutcome::Claimed(Box::new(event)),
            None => ClaimOutcome::NotClaimable,
        })
    }

    /// Appends a finalized attempt and applies the lifecycle transition.
    ///
    /// Guarded by `status = 'delivering'`: if the claim was lost to the
    /// stale reaper in the meantime, zero rows match and the caller gets
    /// [`RecordOutcome::Conflict`] so it can abandon silently.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn record_attempt(
        &self,
        event_id: EventId,
        attempt: &DeliveryAttempt,
        disposition: AttemptDisposition,
    ) -> Result<RecordOutcome> {
        let (status, next_attempt_at) = match disposition {
            AttemptDisposition::Delivered => (EventStatus::Delivered, None),
            AttemptDisposition::FailedPermanently => (EventStatus::FailedPermanently, None),
            AttemptDisposition::Retry { next_attempt_at } => {
                (EventStatus::Received, Some(next_attempt_at))
            },
        };

        let result = sqlx::query(
            r"
            UPDATE events
            SET attempts = attempts || $2::jsonb,
                attempt_count = attempt_count + 1,
                status = $3,
                next_attempt_at = $4
            WHERE id = $1 AND status = 'delivering'
            ",
        )
        .bind(event_id)
        .bind(sqlx::types::Json(std::slice::from_ref(attempt)))
        .bind(status)
        .bind(next_attempt_at)
        .execute(&*self.pool)
        .await?;

        Ok(if result.rows_affected() == 1 { RecordOutcome::Recorded } else { RecordOutcome::Conflict })
    }

    /// Releases a held claim without consuming an attempt slot.
    ///
    /// The `delivering -> received` abandonment back-edge, used when the
    /// local rate limiter times out before a downstream call was made.
    /// A no-op if the claim was already lost.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn release(&self, event_id: EventId) -> Result<()> {
        sqlx::query(
            r"
            UPDATE events
            SET status = 'received'
            WHERE id = $1 AND status = 'delivering'
            ",
        )
        .bind(event_id)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Fetches a full event snapshot.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn get(&self, event_id: EventId) -> Result<Option<WebhookEvent>> {
        let event = sqlx::query_as::<_, WebhookEvent>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = $1",
        ))
        .bind(event_id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(event)
    }

    /// Read-only search projection with aggregates.
    ///
    /// Items are ordered `received_at` descending with id as tie-breaker.
    /// Aggregates cover the entire filtered set, not just the page.
    ///
    /// # Errors
    ///
    /// Returns error if any query fails.
    pub async fn search(&self, filter: &SearchFilter) -> Result<SearchResult> {
        let statuses: Option<Vec<String>> = if filter.status.is_empty() {
            None
        } else {
            Some(filter.status.iter().map(ToString::to_string).collect())
        };

        const FILTER_CLAUSE: &str = r"
              ($1::text[] IS NULL OR status = ANY($1))
              AND ($2::text IS NULL OR event_type = $2)
              AND ($3::timestamptz IS NULL OR received_at >= $3)
              AND ($4::timestamptz IS NULL OR received_at <= $4)
        ";

        let items = sqlx::query_as::<_, WebhookEvent>(&format!(
            r"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE {FILTER_CLAUSE}
            ORDER BY received_at DESC, id
            LIMIT $5 OFFSET $6
            ",
        ))
        .bind(&statuses)
        .bind(&filter.event_type)
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.limit)
        .bind(filter.skip)
        .fetch_all(&*self.pool)
        .await?;

        let status_rows: Vec<(String, i64)> = sqlx::query_as(&format!(
            "SELECT status, COUNT(*) FROM events WHERE {FILTER_CLAUSE} GROUP BY status",
        ))
        .bind(&statuses)
        .bind(&filter.event_type)
        .bind(filter.from)
        .bind(filter.to)
        .fetch_all(&*self.pool)
        .await?;

        let type_rows: Vec<(Option<String>, i64)> = sqlx::query_as(&format!(
            "SELECT event_type, COUNT(*) FROM events WHERE {FILTER_CLAUSE} GROUP BY event_type",
        ))
        .bind(&statuses)
        .bind(&filter.event_type)
        .bind(filter.from)
        .bind(filter.to)
        .fetch_all(&*self.pool)
        .await?;

        let hourly_rows: Vec<(DateTime<Utc>, i64)> = sqlx::query_as(&format!(
            r"
            SELECT date_trunc('hour', received_at) AS hour, COUNT(*)
            FROM events
            WHERE {FILTER_CLAUSE}
            GROUP BY 1
            ORDER BY 1
            ",
        ))
        .bind(&statuses)
        .bind(&filter.event_type)
        .bind(filter.from)
        .bind(filter.to)
        .fetch_all(&*self.pool)
        .await?;

        let aggregates = SearchAggregates {
            by_status: status_rows.into_iter().collect(),
            by_type: type_rows
                .into_iter()
                .map(|(ty, count)| (ty.unwrap_or_else(|| "unknown".to_string()), count))
                .collect(),
            hourly: hourly_rows
                .into_iter()
                .map(|(hour, count)| HourlyBucket {
                    hour: hour.format("%Y-%m-%d %H:00").to_string(),
                    count,
                })
                .collect(),
        };

        Ok(SearchResult { items, aggregates })
    }

    /// Counts events currently in the given status.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_by_status(&self, status: EventStatus) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM events WHERE status = $1")
            .bind(status)
            .fetch_one(&*self.pool)
            .await?;

        Ok(count.0)
    }
}

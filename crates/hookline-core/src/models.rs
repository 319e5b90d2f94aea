//! Core domain models for the webhook delivery pipeline.
//!
//! Defines the event record, its per-attempt history, and the newtype ID
//! wrapper used throughout the system. Includes database serialization
//! impls and the status machine that governs delivery processing.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Strongly-typed event identifier.
///
/// Wraps a UUID to prevent mixing with other ID types. Events are immutable
/// in identity once created; this ID follows them through their entire
/// lifecycle and is echoed to the downstream as a correlation header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Creates a new random event ID.
    ///
    /// Uses UUID v4 for globally unique identifiers without coordination.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for EventId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EventId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for EventId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Event lifecycle status.
///
/// Transitions form a DAG with one permitted back-edge:
///
/// ```text
/// received -> delivering -> delivered
///          ^             -> failed_permanently
///          |             |
///          +---- abandon -+   (worker timeout/crash/release only)
/// ```
///
/// The claim primitive is the only way into `Delivering`, and the
/// attempt-append primitive the only way out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Persisted and eligible for claiming.
    Received,

    /// A worker holds the claim and is attempting delivery.
    ///
    /// At most one worker observes this state per event at any instant;
    /// the conditional claim update enforces it.
    Delivering,

    /// Successfully delivered to the downstream. Terminal.
    Delivered,

    /// Attempt budget exhausted or a permanent downstream rejection.
    /// Terminal.
    FailedPermanently,
}

impl EventStatus {
    /// True for states that accept no further attempts.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::FailedPermanently)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received => write!(f, "received"),
            Self::Delivering => write!(f, "delivering"),
            Self::Delivered => write!(f, "delivered"),
            Self::FailedPermanently => write!(f, "failed_permanently"),
        }
    }
}

impl std::str::FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(Self::Received),
            "delivering" => Ok(Self::Delivering),
            "delivered" => Ok(Self::Delivered),
            "failed_permanently" => Ok(Self::FailedPermanently),
            _ => Err(format!("invalid event status: {s}")),
        }
    }
}

impl sqlx::Type<PgDb> for EventStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EventStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        s.parse().map_err(Into::into)
    }
}

impl sqlx::Encode<'_, PgDb> for EventStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// Short error kind recorded on a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptErrorKind {
    /// Request exceeded the per-attempt timeout.
    Timeout,
    /// Connection-level failure (refused, DNS, TLS, partition).
    Network,
    /// Downstream answered 5xx.
    ServerError,
    /// Downstream answered 429.
    RateLimited,
    /// Downstream answered a non-429 4xx.
    ClientError,
}

impl fmt::Display for AttemptErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Network => write!(f, "network"),
            Self::ServerError => write!(f, "server_error"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::ClientError => write!(f, "client_error"),
        }
    }
}

/// A finalized record of one delivery try.
///
/// Appended to the event's attempt history by the attempt-append primitive
/// and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    /// 1-based attempt index; dense within an event.
    pub attempt_number: u32,

    /// When this attempt was made.
    pub attempted_at: DateTime<Utc>,

    /// HTTP status if a response was received, else None.
    pub http_status: Option<u16>,

    /// Whether the downstream accepted the delivery (2xx).
    pub succeeded: bool,

    /// Error kind when `succeeded` is false.
    pub error: Option<AttemptErrorKind>,
}

impl DeliveryAttempt {
    /// Builds a successful attempt record.
    pub fn succeeded(attempt_number: u32, attempted_at: DateTime<Utc>, http_status: u16) -> Self {
        Self { attempt_number, attempted_at, http_status: Some(http_status), succeeded: true, error: None }
    }

    /// Builds a failed attempt record.
    pub fn failed(
        attempt_number: u32,
        attempted_at: DateTime<Utc>,
        http_status: Option<u16>,
        error: AttemptErrorKind,
    ) -> Self {
        Self { attempt_number, attempted_at, http_status, succeeded: false, error: Some(error) }
    }
}

/// Durable webhook event record.
///
/// One row per producer event, carrying the opaque payload, the asserted
/// signature for audit, and the complete attempt history embedded as JSON.
///
/// # Idempotency
///
/// `idempotency_key` is globally unique when present; repeated intakes with
/// the same key collapse onto the first stored record.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookEvent {
    /// Unique identifier, server-assigned at ingest.
    pub id: EventId,

    /// Producer-supplied uniqueness token, if any.
    pub idempotency_key: Option<String>,

    /// Advisory type extracted from the payload, used only by search.
    pub event_type: Option<String>,

    /// Opaque payload bytes, delivered downstream verbatim.
    pub payload: Vec<u8>,

    /// HMAC hex digest asserted by the producer, retained for audit.
    pub signature: String,

    /// Current lifecycle status.
    pub status: EventStatus,

    /// Timestamp at ingest.
    pub received_at: DateTime<Utc>,

    /// When the most recent claim succeeded; reset on each claim.
    pub claimed_at: Option<DateTime<Utc>>,

    /// Ordered attempt history; length equals `attempt_count`.
    pub attempts: sqlx::types::Json<Vec<DeliveryAttempt>>,

    /// Number of attempts made so far. Monotonically non-decreasing.
    pub attempt_count: i32,

    /// Advisory earliest time for the next attempt.
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl WebhookEvent {
    /// Attempt history as a slice.
    pub fn attempts(&self) -> &[DeliveryAttempt] {
        &self.attempts.0
    }

    /// The most recent attempt, if any.
    pub fn last_attempt(&self) -> Option<&DeliveryAttempt> {
        self.attempts.0.last()
    }
}

/// Fields needed to persist a fresh event at ingest.
///
/// Everything else (`status`, counters, attempt history) starts at its
/// initial value inside the store.
#[derive(Debug, Clone)]
pub struct NewEvent {
    /// Server-assigned identifier.
    pub id: EventId,
    /// Producer idempotency key, if supplied.
    pub idempotency_key: Option<String>,
    /// Advisory event type extracted from the payload.
    pub event_type: Option<String>,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
    /// Asserted signature hex digest.
    pub signature: String,
    /// Ingest timestamp.
    pub received_at: DateTime<Utc>,
}

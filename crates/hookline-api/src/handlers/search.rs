//! Search endpoint: a read-only projection over the event store.
//!
//! Filters by status set, event type, and received-at range, with
//! skip/limit pagination, and returns aggregate counts alongside the page.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use hookline_core::{
    storage::events::{SearchAggregates, SearchFilter},
    DeliveryAttempt, EventStatus, WebhookEvent,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, instrument};

use crate::{handlers::ingest::error_response, AppState};

const DEFAULT_LIMIT: i64 = 10;
const MAX_LIMIT: i64 = 500;

/// Status filter accepting a single value or a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StatusFilter {
    /// A single status.
    One(EventStatus),
    /// A set of statuses.
    Many(Vec<EventStatus>),
}

impl StatusFilter {
    fn into_vec(self) -> Vec<EventStatus> {
        match self {
            Self::One(status) => vec![status],
            Self::Many(statuses) => statuses,
        }
    }
}

/// Request body for the search endpoint.
#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    /// Restrict to these statuses.
    #[serde(default)]
    pub status: Option<StatusFilter>,
    /// Exact event type match.
    #[serde(default)]
    pub event_type: Option<String>,
    /// Inclusive lower bound on `received_at`.
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `received_at`.
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    /// Rows to skip.
    #[serde(default)]
    pub skip: i64,
    /// Maximum rows to return.
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    DEFAULT_LIMIT
}

/// One event in the search response.
#[derive(Debug, Serialize)]
pub struct EventView {
    /// Event id.
    pub id: String,
    /// Producer idempotency key, if any.
    pub idempotency_key: Option<String>,
    /// Advisory event type.
    pub event_type: Option<String>,
    /// Payload decoded back to JSON; null when undecodable.
    pub payload: Value,
    /// Current lifecycle status.
    pub status: EventStatus,
    /// Ingest timestamp.
    pub received_at: DateTime<Utc>,
    /// Attempts made so far.
    pub attempt_count: i32,
    /// Full attempt history.
    pub attempts: Vec<DeliveryAttempt>,
    /// Advisory earliest time of the next attempt.
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl From<WebhookEvent> for EventView {
    fn from(event: WebhookEvent) -> Self {
        let payload = serde_json::from_slice(&event.payload).unwrap_or(Value::Null);
        Self {
            id: event.id.to_string(),
            idempotency_key: event.idempotency_key,
            event_type: event.event_type,
            payload,
            status: event.status,
            received_at: event.received_at,
            attempt_count: event.attempt_count,
            attempts: event.attempts.0,
            next_attempt_at: event.next_attempt_at,
        }
    }
}

/// Response body for the search endpoint.
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    /// Matching events, newest first.
    pub items: Vec<EventView>,
    /// Aggregates over the whole filtered set.
    pub aggregates: SearchAggregates,
}

/// Searches stored events with filters and aggregates.
#[instrument(name = "search_webhooks", skip(state, request))]
pub async fn search_webhooks(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Response {
    if let (Some(from), Some(to)) = (request.from, request.to) {
        if to <= from {
            return error_response(StatusCode::BAD_REQUEST, "`to` must be greater than `from`");
        }
    }

    if request.skip < 0 || request.limit < 0 {
        return error_response(StatusCode::BAD_REQUEST, "skip and limit must be non-negative");
    }

    let filter = SearchFilter {
        status: request.status.map(StatusFilter::into_vec).unwrap_or_default(),
        event_type: request.event_type,
        from: request.from,
        to: request.to,
        skip: request.skip,
        limit: request.limit.min(MAX_LIMIT),
    };

    match state.storage.events.search(&filter).await {
        Ok(result) => {
            info!(returned = result.items.len(), "search completed");
            let response = SearchResponse {
                items: result.items.into_iter().map(EventView::from).collect(),
                aggregates: result.aggregates,
            };
            (StatusCode::OK, Json(response)).into_response()
        },
        Err(e) => {
            error!(error = %e, "search failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
        },
    }
}

//! Webhook intake handler.
//!
//! Verifies the producer signature over the raw body, parses single or
//! batch JSON, persists each element independently, and enqueues fresh
//! inserts for delivery. Duplicates collapse onto the stored record and
//! are reported back with `duplicate = true`.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use hookline_core::{storage::events::InsertOutcome, EventId, NewEvent};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, instrument, warn};

use crate::{crypto, AppState};

/// One entry of the intake response, in input order.
#[derive(Debug, Serialize)]
pub struct IngestResult {
    /// Stored event id (existing id for duplicates).
    pub id: String,
    /// True when the idempotency key matched an existing record.
    pub duplicate: bool,
}

/// Response body for the intake endpoint.
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    /// Per-element results in input order.
    pub results: Vec<IngestResult>,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human-readable error description.
    pub error: String,
}

/// Ingests one webhook or a batch for reliable delivery.
///
/// Batch elements are processed independently; partial success is allowed
/// and each element reports its own `{id, duplicate}` pair.
#[instrument(name = "ingest_webhooks", skip(state, headers, body), fields(body_len = body.len()))]
pub async fn ingest_webhooks(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(signature) = headers.get("x-signature").and_then(|v| v.to_str().ok()) else {
        warn!("missing signature header");
        return error_response(StatusCode::BAD_REQUEST, "missing signature");
    };

    if !crypto::verify_signature(&body, signature, &state.hmac_secret) {
        warn!("invalid signature");
        return error_response(StatusCode::UNAUTHORIZED, "invalid signature");
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "invalid JSON payload");
            return error_response(StatusCode::BAD_REQUEST, "invalid JSON payload");
        },
    };

    // A single object is a batch of one.
    let elements = match payload {
        Value::Array(items) => items,
        other => vec![other],
    };

    let mut results = Vec::with_capacity(elements.len());

    for element in elements {
        let idempotency_key =
            element.get("idempotency_key").and_then(Value::as_str).map(ToString::to_string);
        let event_type = element.get("event_type").and_then(Value::as_str).map(ToString::to_string);

        let payload_bytes = match serde_json::to_vec(&element) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "failed to serialize payload element");
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error");
            },
        };

        let event = NewEvent {
            id: EventId::new(),
            idempotency_key,
            event_type: event_type.clone(),
            payload: payload_bytes,
            signature: signature.to_string(),
            received_at: state.clock.now_utc(),
        };

        match state.storage.events.insert(&event).await {
            Ok(InsertOutcome::Inserted(id)) => {
                state.metrics.events_received.inc();

                info!(event_id = %id, event_type = ?event_type, "event stored");

                // Delivery relies on this job; a failed enqueue leaves the
                // event parked in `received` until operator intervention.
                if let Err(e) = state.storage.queue.enqueue(id, event.received_at).await {
                    error!(event_id = %id, error = %e, "failed to enqueue delivery job");
                }

                results.push(IngestResult { id: id.to_string(), duplicate: false });
            },
            Ok(InsertOutcome::Duplicate(id)) => {
                info!(event_id = %id, event_type = ?event_type, "duplicate event");
                results.push(IngestResult { id: id.to_string(), duplicate: true });
            },
            Err(e) => {
                error!(error = %e, "failed to persist event");
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error");
            },
        }
    }

    (StatusCode::ACCEPTED, Json(IngestResponse { results })).into_response()
}

pub(crate) fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(ErrorResponse { error: message.to_string() })).into_response()
}

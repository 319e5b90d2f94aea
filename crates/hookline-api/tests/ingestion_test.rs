//! Intake endpoint tests driven through the router.
//!
//! Signature and parse failures never touch the database, so those run
//! everywhere; persistence paths require a configured test database and
//! skip without one.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use hookline_api::{config::Config, crypto, server::create_router, AppState};
use hookline_core::{storage::Storage, Metrics, RealClock};
use hookline_testing::TestEnv;
use serde_json::{json, Value};
use tower::ServiceExt;

const SECRET: &str = "test-secret";

fn router_with_storage(storage: Storage) -> Router {
    let state = AppState::new(
        Arc::new(storage),
        Arc::new(Metrics::new().expect("metrics should construct")),
        Arc::new(RealClock::new()),
        SECRET.to_string(),
    );
    create_router(state, &Config::default())
}

/// Router over a lazily-connected pool; fine for paths that reject before
/// touching the database.
fn router_without_db() -> Router {
    let pool = sqlx::PgPool::connect_lazy("postgresql://localhost/unused")
        .expect("lazy pool never connects eagerly");
    router_with_storage(Storage::new(pool))
}

fn ingest_request(body: &str, signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhooks/ingest")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("x-signature", signature);
    }
    builder.body(Body::from(body.to_string())).expect("request should build")
}

fn sign(body: &str) -> String {
    crypto::generate_hmac_hex(body.as_bytes(), SECRET).expect("signing should succeed")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body should be readable");
    serde_json::from_slice(&bytes).expect("body should be JSON")
}

#[tokio::test]
async fn missing_signature_is_rejected() {
    let router = router_without_db();

    let response = router
        .oneshot(ingest_request(r#"{"event_type":"order.created"}"#, None))
        .await
        .expect("request should complete");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invalid_signature_is_rejected() {
    let router = router_without_db();

    let response = router
        .oneshot(ingest_request(r#"{"event_type":"order.created"}"#, Some(&"0".repeat(64))))
        .await
        .expect("request should complete");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_json_is_rejected_after_signature_check() {
    let router = router_without_db();

    let body = "{not json";
    let response = router
        .oneshot(ingest_request(body, Some(&sign(body))))
        .await
        .expect("request should complete");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn signature_covers_the_exact_body_bytes() {
    let router = router_without_db();

    // Signature of a different body must not validate.
    let response = router
        .oneshot(ingest_request(r#"{"a":1}"#, Some(&sign(r#"{"a":2}"#))))
        .await
        .expect("request should complete");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn single_event_is_accepted_and_enqueued() {
    let Some(env) = TestEnv::try_new().await else { return };
    let router = router_with_storage(env.storage().clone());

    let body = json!({
        "event_type": "order.created",
        "idempotency_key": "evt-1001",
        "data": {"order_id": "ORD-123", "amount": 1499}
    })
    .to_string();

    let response = router
        .oneshot(ingest_request(&body, Some(&sign(&body))))
        .await
        .expect("request should complete");

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    let results = json["results"].as_array().expect("results array");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["duplicate"], false);

    // Stored and queued for delivery.
    let id: hookline_core::EventId =
        results[0]["id"].as_str().expect("id string").parse::<uuid::Uuid>().expect("uuid").into();
    let stored = env.storage().events.get(id).await.expect("get").expect("event exists");
    assert_eq!(stored.event_type.as_deref(), Some("order.created"));
    assert_eq!(stored.idempotency_key.as_deref(), Some("evt-1001"));
    assert_eq!(env.storage().queue.depth().await.expect("depth"), 1);
}

#[tokio::test]
async fn batch_preserves_input_order() {
    let Some(env) = TestEnv::try_new().await else { return };
    let router = router_with_storage(env.storage().clone());

    let body = json!([
        {"event_type": "order.created", "idempotency_key": "batch-a"},
        {"event_type": "order.updated", "idempotency_key": "batch-b"},
        {"event_type": "order.deleted"}
    ])
    .to_string();

    let response = router
        .oneshot(ingest_request(&body, Some(&sign(&body))))
        .await
        .expect("request should complete");

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    let results = json["results"].as_array().expect("results array");
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r["duplicate"] == false));

    assert_eq!(env.storage().queue.depth().await.expect("depth"), 3);
}

#[tokio::test]
async fn duplicate_key_returns_existing_id_without_requeue() {
    let Some(env) = TestEnv::try_new().await else { return };
    let router = router_with_storage(env.storage().clone());

    let body = json!({"event_type": "order.created", "idempotency_key": "K"}).to_string();
    let signature = sign(&body);

    let first = router
        .clone()
        .oneshot(ingest_request(&body, Some(&signature)))
        .await
        .expect("request should complete");
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    let first_json = body_json(first).await;
    let first_id = first_json["results"][0]["id"].as_str().expect("id").to_string();
    assert_eq!(first_json["results"][0]["duplicate"], false);

    let second = router
        .oneshot(ingest_request(&body, Some(&signature)))
        .await
        .expect("request should complete");
    assert_eq!(second.status(), StatusCode::ACCEPTED);
    let second_json = body_json(second).await;
    assert_eq!(second_json["results"][0]["duplicate"], true);
    assert_eq!(second_json["results"][0]["id"].as_str().expect("id"), first_id);

    // Only the first intake enqueued a delivery job.
    assert_eq!(env.storage().queue.depth().await.expect("depth"), 1);
}

#[tokio::test]
async fn health_endpoint_is_always_live() {
    let router = router_without_db();

    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .expect("request should build");
    let response = router.oneshot(request).await.expect("request should complete");

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn readiness_endpoint_reports_unavailable_without_a_database() {
    let router = router_without_db();

    let request = Request::builder()
        .method("GET")
        .uri("/ready")
        .body(Body::empty())
        .expect("request should build");
    let response = router.oneshot(request).await.expect("request should complete");

    // The lazy pool fails its ping, so the probe must answer 503.
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = body_json(response).await;
    assert_eq!(json["status"], "unavailable");
}

#[tokio::test]
async fn readiness_endpoint_reports_ready_with_a_database() {
    let Some(env) = TestEnv::try_new().await else { return };
    let router = router_with_storage(env.storage().clone());

    let request = Request::builder()
        .method("GET")
        .uri("/ready")
        .body(Body::empty())
        .expect("request should build");
    let response = router.oneshot(request).await.expect("request should complete");

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ready");
}

#[tokio::test]
async fn metrics_endpoint_exposes_counters() {
    let router = router_without_db();

    let request = Request::builder()
        .method("GET")
        .uri("/metrics")
        .body(Body::empty())
        .expect("request should build");
    let response = router.oneshot(request).await.expect("request should complete");

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body should be readable");
    let text = String::from_utf8(bytes.to_vec()).expect("utf8");
    assert!(text.contains("events_received_total"));
    assert!(text.contains("delivery_latency_seconds"));
}

#[tokio::test]
async fn request_id_header_is_echoed() {
    let router = router_without_db();

    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .header("x-request-id", "req-42")
        .body(Body::empty())
        .expect("request should build");
    let response = router.oneshot(request).await.expect("request should complete");

    assert_eq!(
        response.headers().get("x-request-id").and_then(|v| v.to_str().ok()),
        Some("req-42")
    );
}

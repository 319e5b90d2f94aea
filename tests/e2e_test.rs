//! End-to-end pipeline tests: intake handler, job queue, delivery engine,
//! and mock downstream wired together over one database.
//!
//! These run the real engine with real time, so retry scenarios take a few
//! seconds of wall clock. Skipped without a configured test database.

use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use hookline_api::{config::Config, crypto, server::create_router, AppState};
use hookline_core::{EventId, EventStatus, Metrics, RealClock};
use hookline_delivery::{
    ClientConfig, DeliveryConfig, DeliveryEngine, RateLimiterConfig, RetryPolicy,
};
use hookline_testing::TestEnv;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

const SECRET: &str = "e2e-secret";

fn engine_config(downstream_url: String) -> DeliveryConfig {
    DeliveryConfig {
        worker_count: 2,
        poll_interval: Duration::from_millis(50),
        client_config: ClientConfig {
            downstream_url,
            timeout: Duration::from_secs(2),
            ..ClientConfig::default()
        },
        limiter_config: RateLimiterConfig { limit: 100, ..RateLimiterConfig::default() },
        retry_policy: RetryPolicy::default(),
        ..DeliveryConfig::default()
    }
}

fn router_for(env: &TestEnv) -> Router {
    let state = AppState::new(
        Arc::new(env.storage().clone()),
        Arc::new(Metrics::new().expect("metrics should construct")),
        Arc::new(RealClock::new()),
        SECRET.to_string(),
    );
    create_router(state, &Config::default())
}

async fn ingest(router: &Router, body: &str) -> Value {
    let signature = crypto::generate_hmac_hex(body.as_bytes(), SECRET).expect("sign");
    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/ingest")
        .header("content-type", "application/json")
        .header("x-signature", signature)
        .body(Body::from(body.to_string()))
        .expect("request should build");

    let response = router.clone().oneshot(request).await.expect("request should complete");
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body should be readable");
    serde_json::from_slice(&bytes).expect("body should be JSON")
}

async fn wait_for_terminal(env: &TestEnv, id: EventId, deadline: Duration) -> EventStatus {
    let started = std::time::Instant::now();
    loop {
        let event = env.storage().events.get(id).await.expect("get").expect("event exists");
        if event.status.is_terminal() {
            return event.status;
        }
        assert!(
            started.elapsed() < deadline,
            "event {id} still {:?} after {deadline:?}",
            event.status
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn event_id_from(results: &Value, index: usize) -> EventId {
    results["results"][index]["id"]
        .as_str()
        .expect("id string")
        .parse::<uuid::Uuid>()
        .expect("uuid")
        .into()
}

#[tokio::test]
async fn ingested_event_is_delivered_downstream() {
    let Some(env) = TestEnv::try_new().await else { return };
    let server = MockServer::start().await;

    Mock::given(matchers::method("POST"))
        .and(matchers::path("/receive"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let metrics = Arc::new(Metrics::new().expect("metrics"));
    let mut engine = DeliveryEngine::new(
        env.pool().clone(),
        engine_config(server.uri()),
        metrics,
        Arc::new(RealClock::new()),
    )
    .expect("engine should build");
    engine.start().await.expect("engine should start");

    let router = router_for(&env);
    let body = json!({
        "event_type": "order.created",
        "idempotency_key": "e2e-happy",
        "data": {"order_id": "ORD-1"}
    })
    .to_string();
    let results = ingest(&router, &body).await;
    let event_id = event_id_from(&results, 0);

    let status = wait_for_terminal(&env, event_id, Duration::from_secs(5)).await;
    assert_eq!(status, EventStatus::Delivered);

    let event = env.storage().events.get(event_id).await.expect("get").expect("exists");
    assert_eq!(event.attempt_count, 1);
    assert!(event.last_attempt().expect("attempt").succeeded);

    engine.shutdown().await.expect("engine should shut down");
    server.verify().await;
}

#[tokio::test]
async fn transient_downstream_failures_are_retried_to_success() {
    let Some(env) = TestEnv::try_new().await else { return };
    let server = MockServer::start().await;

    Mock::given(matchers::method("POST"))
        .and(matchers::path("/receive"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/receive"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let metrics = Arc::new(Metrics::new().expect("metrics"));
    let mut engine = DeliveryEngine::new(
        env.pool().clone(),
        engine_config(server.uri()),
        metrics,
        Arc::new(RealClock::new()),
    )
    .expect("engine should build");
    engine.start().await.expect("engine should start");

    let router = router_for(&env);
    let body = json!({"event_type": "order.created", "idempotency_key": "e2e-retry"}).to_string();
    let results = ingest(&router, &body).await;
    let event_id = event_id_from(&results, 0);

    // Backoff gaps of one and two seconds before the third attempt lands.
    let status = wait_for_terminal(&env, event_id, Duration::from_secs(15)).await;
    assert_eq!(status, EventStatus::Delivered);

    let event = env.storage().events.get(event_id).await.expect("get").expect("exists");
    assert_eq!(event.attempt_count, 3);
    let gap = event.attempts()[1].attempted_at - event.attempts()[0].attempted_at;
    assert!(gap >= chrono::Duration::seconds(1), "first backoff gap was {gap}");
    let gap = event.attempts()[2].attempted_at - event.attempts()[1].attempted_at;
    assert!(gap >= chrono::Duration::seconds(2), "second backoff gap was {gap}");

    engine.shutdown().await.expect("engine should shut down");
}

#[tokio::test]
async fn duplicate_intake_is_delivered_exactly_once() {
    let Some(env) = TestEnv::try_new().await else { return };
    let server = MockServer::start().await;

    Mock::given(matchers::method("POST"))
        .and(matchers::path("/receive"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let metrics = Arc::new(Metrics::new().expect("metrics"));
    let mut engine = DeliveryEngine::new(
        env.pool().clone(),
        engine_config(server.uri()),
        metrics,
        Arc::new(RealClock::new()),
    )
    .expect("engine should build");
    engine.start().await.expect("engine should start");

    let router = router_for(&env);
    let body = json!({"event_type": "order.created", "idempotency_key": "e2e-dup"}).to_string();

    let first = ingest(&router, &body).await;
    let second = ingest(&router, &body).await;

    assert_eq!(first["results"][0]["duplicate"], false);
    assert_eq!(second["results"][0]["duplicate"], true);
    assert_eq!(first["results"][0]["id"], second["results"][0]["id"]);

    let event_id = event_id_from(&first, 0);
    let status = wait_for_terminal(&env, event_id, Duration::from_secs(5)).await;
    assert_eq!(status, EventStatus::Delivered);

    engine.shutdown().await.expect("engine should shut down");
    server.verify().await;
}

#[tokio::test]
async fn batch_intake_delivers_every_element() {
    let Some(env) = TestEnv::try_new().await else { return };
    let server = MockServer::start().await;

    Mock::given(matchers::method("POST"))
        .and(matchers::path("/receive"))
        .respond_with(ResponseTemplate::new(200))
        .expect(3)
        .mount(&server)
        .await;

    let metrics = Arc::new(Metrics::new().expect("metrics"));
    let mut engine = DeliveryEngine::new(
        env.pool().clone(),
        engine_config(server.uri()),
        metrics,
        Arc::new(RealClock::new()),
    )
    .expect("engine should build");
    engine.start().await.expect("engine should start");

    let router = router_for(&env);
    let body = json!([
        {"event_type": "order.created", "idempotency_key": "e2e-b1"},
        {"event_type": "order.created", "idempotency_key": "e2e-b2"},
        {"event_type": "order.created", "idempotency_key": "e2e-b3"}
    ])
    .to_string();
    let results = ingest(&router, &body).await;

    for index in 0..3 {
        let event_id = event_id_from(&results, index);
        let status = wait_for_terminal(&env, event_id, Duration::from_secs(5)).await;
        assert_eq!(status, EventStatus::Delivered);
    }

    engine.shutdown().await.expect("engine should shut down");
    server.verify().await;
}

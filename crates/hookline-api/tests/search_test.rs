//! Search endpoint tests driven through the router.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use hookline_api::{config::Config, server::create_router, AppState};
use hookline_core::{
    models::{EventId, NewEvent},
    storage::Storage,
    Metrics, RealClock,
};
use hookline_testing::TestEnv;
use serde_json::{json, Value};
use tower::ServiceExt;

fn router_with_storage(storage: Storage) -> Router {
    let state = AppState::new(
        Arc::new(storage),
        Arc::new(Metrics::new().expect("metrics should construct")),
        Arc::new(RealClock::new()),
        "test-secret".to_string(),
    );
    create_router(state, &Config::default())
}

fn search_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/webhooks/search")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body should be readable");
    serde_json::from_slice(&bytes).expect("body should be JSON")
}

async fn seed_events(env: &TestEnv) {
    let base = Utc::now();
    let specs = [
        (Some("order.created"), 0i64),
        (Some("order.created"), 1),
        (Some("user.signup"), 2),
    ];
    for (event_type, hours_ago) in specs {
        let event = NewEvent {
            id: EventId::new(),
            idempotency_key: None,
            event_type: event_type.map(ToString::to_string),
            payload: br#"{"n":1}"#.to_vec(),
            signature: "0".repeat(64),
            received_at: base - Duration::hours(hours_ago),
        };
        env.storage().events.insert(&event).await.expect("insert should succeed");
    }
}

#[tokio::test]
async fn inverted_time_range_is_rejected() {
    // Validation happens before any query; no live database required.
    let pool = sqlx::PgPool::connect_lazy("postgresql://localhost/unused")
        .expect("lazy pool never connects eagerly");
    let router = router_with_storage(Storage::new(pool));

    let now = Utc::now();
    let response = router
        .oneshot(search_request(json!({
            "from": now,
            "to": now - Duration::hours(1),
        })))
        .await
        .expect("request should complete");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unfiltered_search_returns_items_and_aggregates() {
    let Some(env) = TestEnv::try_new().await else { return };
    seed_events(&env).await;
    let router = router_with_storage(env.storage().clone());

    let response =
        router.oneshot(search_request(json!({}))).await.expect("request should complete");

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;

    let items = json["items"].as_array().expect("items array");
    assert_eq!(items.len(), 3);
    // Newest first.
    assert_eq!(items[0]["event_type"], "order.created");
    assert_eq!(items[2]["event_type"], "user.signup");
    assert_eq!(items[0]["payload"]["n"], 1);

    assert_eq!(json["aggregates"]["by_status"]["received"], 3);
    assert_eq!(json["aggregates"]["by_type"]["order.created"], 2);
    assert_eq!(json["aggregates"]["by_type"]["user.signup"], 1);
    assert!(json["aggregates"]["hourly"].as_array().expect("hourly").len() >= 1);
}

#[tokio::test]
async fn event_type_filter_narrows_results() {
    let Some(env) = TestEnv::try_new().await else { return };
    seed_events(&env).await;
    let router = router_with_storage(env.storage().clone());

    let response = router
        .oneshot(search_request(json!({"event_type": "order.created"})))
        .await
        .expect("request should complete");

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["items"].as_array().expect("items").len(), 2);
    assert_eq!(json["aggregates"]["by_type"]["order.created"], 2);
}

#[tokio::test]
async fn status_filter_accepts_single_value_or_list() {
    let Some(env) = TestEnv::try_new().await else { return };
    seed_events(&env).await;
    let router = router_with_storage(env.storage().clone());

    let single = router
        .clone()
        .oneshot(search_request(json!({"status": "received"})))
        .await
        .expect("request should complete");
    assert_eq!(single.status(), StatusCode::OK);
    assert_eq!(body_json(single).await["items"].as_array().expect("items").len(), 3);

    let list = router
        .clone()
        .oneshot(search_request(json!({"status": ["delivered", "failed_permanently"]})))
        .await
        .expect("request should complete");
    assert_eq!(list.status(), StatusCode::OK);
    assert!(body_json(list).await["items"].as_array().expect("items").is_empty());
}

#[tokio::test]
async fn pagination_skips_and_limits() {
    let Some(env) = TestEnv::try_new().await else { return };
    seed_events(&env).await;
    let router = router_with_storage(env.storage().clone());

    let response = router
        .oneshot(search_request(json!({"skip": 1, "limit": 1})))
        .await
        .expect("request should complete");

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["items"].as_array().expect("items").len(), 1);
    // Aggregates still describe the full filtered set.
    assert_eq!(json["aggregates"]["by_status"]["received"], 3);
}

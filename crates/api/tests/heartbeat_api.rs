//! Integration tests for the worker heartbeat path: registration, ack,
//! idempotent re-delivery, and the model catalog it feeds.

mod common;

use axum::http::{Method, StatusCode};
use common::{body_json, send_authed, TEST_SERVICE_KEY};
use tower::ServiceExt;

fn heartbeat_body() -> serde_json::Value {
    serde_json::json!({
        "worker_id": "worker-gpu-0",
        "url": "http://worker-gpu-0:9000",
        "status": "idle",
        "capabilities": ["image"],
        "loaded_models": ["sdxl"],
        "gpu_memory_used_mb": 2048,
        "uptime_seconds": 120,
        "jobs_completed": 7,
    })
}

async fn post_heartbeat(
    app: axum::Router,
    body: serde_json::Value,
) -> axum::response::Response {
    let request = axum::http::Request::builder()
        .method(Method::POST)
        .uri("/api/internal/heartbeat")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

// ---------------------------------------------------------------------------
// Test: heartbeat is acked with the dispatcher version
// ---------------------------------------------------------------------------

#[tokio::test]
async fn heartbeat_is_acked() {
    let app = common::build_test_app();
    let response = post_heartbeat(app, heartbeat_body()).await;

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["ack"], true);
    assert!(json["dispatcher_version"].is_string());
}

// ---------------------------------------------------------------------------
// Test: re-delivering an identical heartbeat leaves equivalent state
// ---------------------------------------------------------------------------

#[tokio::test]
async fn repeated_heartbeat_is_idempotent() {
    let app = common::build_test_app();

    post_heartbeat(app.clone(), heartbeat_body()).await;
    post_heartbeat(app.clone(), heartbeat_body()).await;

    // One worker, one model, visible through the public models endpoint.
    let response =
        send_authed(app, Method::GET, "/api/v1/models", TEST_SERVICE_KEY, None).await;
    let json = body_json(response).await;

    let models = json["data"].as_array().unwrap();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0]["model"], "sdxl");
    assert_eq!(models[0]["workers"], 1);
    assert_eq!(models[0]["resident_on_idle"], true);
}

// ---------------------------------------------------------------------------
// Test: heartbeats surface in the root health summary
// ---------------------------------------------------------------------------

#[tokio::test]
async fn heartbeat_increments_worker_count() {
    let app = common::build_test_app();
    post_heartbeat(app.clone(), heartbeat_body()).await;

    let response = common::get(app, "/health").await;
    let json = body_json(response).await;
    assert_eq!(json["workers"], 1);
}

// ---------------------------------------------------------------------------
// Test: a malformed heartbeat is rejected
// ---------------------------------------------------------------------------

#[tokio::test]
async fn heartbeat_without_worker_id_is_rejected() {
    let app = common::build_test_app();
    let response = post_heartbeat(
        app,
        serde_json::json!({"url": "http://x:9000", "capabilities": ["image"]}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

//! Integration tests for bearer authentication on the public API.

mod common;

use axum::http::{Method, StatusCode};
use common::{body_json, get, send_authed, TEST_SERVICE_KEY};

// ---------------------------------------------------------------------------
// Test: missing Authorization header is rejected
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_auth_header_returns_401() {
    let app = common::build_test_app();
    let response = get(app, "/api/v1/models").await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let json = body_json(response).await;
    assert_eq!(json["code"], "UNAUTHENTICATED");
}

// ---------------------------------------------------------------------------
// Test: non-Bearer scheme is rejected
// ---------------------------------------------------------------------------

#[tokio::test]
async fn basic_auth_scheme_returns_401() {
    let app = common::build_test_app();
    let request = axum::http::Request::builder()
        .method(Method::GET)
        .uri("/api/v1/models")
        .header("authorization", "Basic dXNlcjpwYXNz")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = tower::ServiceExt::oneshot(app, request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let json = body_json(response).await;
    assert_eq!(json["code"], "UNAUTHENTICATED");
}

// ---------------------------------------------------------------------------
// Test: a configured service key passes authentication
// ---------------------------------------------------------------------------

#[tokio::test]
async fn service_key_can_list_models() {
    let app = common::build_test_app();
    let response = send_authed(app, Method::GET, "/api/v1/models", TEST_SERVICE_KEY, None).await;

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert!(json["data"].as_array().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Test: user-scoped endpoints reject service principals
// ---------------------------------------------------------------------------

#[tokio::test]
async fn service_key_cannot_read_user_me() {
    let app = common::build_test_app();
    let response = send_authed(app, Method::GET, "/api/v1/user/me", TEST_SERVICE_KEY, None).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let json = body_json(response).await;
    assert_eq!(json["code"], "UNAUTHENTICATED");
}

// ---------------------------------------------------------------------------
// Test: service submissions must carry a user_ref
// ---------------------------------------------------------------------------

#[tokio::test]
async fn service_job_without_user_ref_is_invalid() {
    let app = common::build_test_app();
    let body = serde_json::json!({
        "frontend": "telegram",
        "capability": "image",
        "params": {"prompt": "a sunset", "model": "sdxl"},
    });
    let response =
        send_authed(app, Method::POST, "/api/v1/jobs", TEST_SERVICE_KEY, Some(body)).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["code"], "INVALID_PARAMS");
}

// ---------------------------------------------------------------------------
// Test: frontend/platform mismatch is rejected before any storage access
// ---------------------------------------------------------------------------

#[tokio::test]
async fn frontend_platform_mismatch_is_invalid() {
    let app = common::build_test_app();
    let body = serde_json::json!({
        "frontend": "discord",
        "capability": "image",
        "user_ref": "telegram:123",
        "params": {"prompt": "a sunset", "model": "sdxl"},
    });
    let response =
        send_authed(app, Method::POST, "/api/v1/jobs", TEST_SERVICE_KEY, Some(body)).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

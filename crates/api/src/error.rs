//! Application-level error type for HTTP handlers.
//!
//! Wraps [`CoreError`] for domain errors and maps each stable error code to
//! its HTTP status. Implements [`IntoResponse`] to produce consistent JSON
//! error bodies of the form `{ "error": <message>, "code": <CODE> }`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tessera_core::error::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `tessera_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A database error from sqlx.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

/// Map a stable error code to its HTTP status.
fn status_for_code(code: &str) -> StatusCode {
    match code {
        "INVALID_PARAMS" | "INVALID_PROMPT" => StatusCode::BAD_REQUEST,
        "UNAUTHENTICATED" => StatusCode::UNAUTHORIZED,
        "QUOTA_EXCEEDED" => StatusCode::PAYMENT_REQUIRED,
        "NOT_FOUND" | "MODEL_NOT_FOUND" => StatusCode::NOT_FOUND,
        "STATE_CONFLICT" => StatusCode::CONFLICT,
        "RATE_LIMITED" => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Core(core) => {
                let code = core.code();
                let status = status_for_code(code);
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!(error = %core, "Internal core error");
                }

                let mut body = json!({
                    "error": core.to_string(),
                    "code": code,
                });

                if let CoreError::RateLimited { retry_after_secs } = &core {
                    body["retry_after"] = json!(retry_after_secs);
                    let mut response = (status, axum::Json(body)).into_response();
                    if let Ok(value) = retry_after_secs.to_string().parse() {
                        response.headers_mut().insert("retry-after", value);
                    }
                    return response;
                }

                (status, axum::Json(body)).into_response()
            }

            AppError::Database(err) => {
                tracing::error!(error = %err, "Database error");
                let body = json!({
                    "error": "An internal error occurred",
                    "code": "INTERNAL",
                });
                (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(body)).into_response()
            }

            AppError::BadRequest(msg) => {
                let body = json!({ "error": msg, "code": "INVALID_PARAMS" });
                (StatusCode::BAD_REQUEST, axum::Json(body)).into_response()
            }

            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                let body = json!({
                    "error": "An internal error occurred",
                    "code": "INTERNAL",
                });
                (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(body)).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_expected_statuses() {
        assert_eq!(status_for_code("INVALID_PARAMS"), StatusCode::BAD_REQUEST);
        assert_eq!(status_for_code("INVALID_PROMPT"), StatusCode::BAD_REQUEST);
        assert_eq!(status_for_code("UNAUTHENTICATED"), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for_code("QUOTA_EXCEEDED"), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(status_for_code("NOT_FOUND"), StatusCode::NOT_FOUND);
        assert_eq!(status_for_code("MODEL_NOT_FOUND"), StatusCode::NOT_FOUND);
        assert_eq!(status_for_code("STATE_CONFLICT"), StatusCode::CONFLICT);
        assert_eq!(status_for_code("RATE_LIMITED"), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_for_code("INTERNAL"), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_for_code("WORKER_ERROR"), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn rate_limited_response_carries_retry_after_header() {
        let response =
            AppError::Core(CoreError::RateLimited { retry_after_secs: 30 }).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("retry-after").unwrap(), "30");
    }

    #[test]
    fn database_errors_are_sanitized() {
        let response = AppError::Database(sqlx::Error::PoolClosed).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

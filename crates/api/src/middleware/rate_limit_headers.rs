//! `X-RateLimit-*` response headers.
//!
//! After the handler runs, the response carries the rate-limit window of
//! whichever user the request was billed against: `X-RateLimit-Limit`,
//! `X-RateLimit-Remaining`, and `X-RateLimit-Reset` (epoch seconds).
//!
//! The user is found two ways. A user-key principal is resolved up front by
//! the auth middleware and read from request extensions. A service-key job
//! creation resolves its platform user deep inside admission, so the handler
//! reports it back out through a [`ResolvedRateLimitUser`] response
//! extension. Service-key requests that never resolve a user have no window
//! to report and omit the headers.

use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tessera_core::types::DbId;

use crate::middleware::auth::AuthPrincipal;
use crate::state::AppState;

/// Response-extension marker set by handlers that resolve the billed user
/// mid-request (service-key job creation), so their responses still carry
/// that user's window headers.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedRateLimitUser(pub DbId);

pub async fn attach_rate_limit_headers(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let principal_user = request
        .extensions()
        .get::<AuthPrincipal>()
        .and_then(|p| p.user())
        .map(|u| u.id);

    let mut response = next.run(request).await;

    let user_id = principal_user.or_else(|| {
        response
            .extensions()
            .get::<ResolvedRateLimitUser>()
            .map(|resolved| resolved.0)
    });

    if let Some(user_id) = user_id {
        if let Some(status) = state.rate_limiter.status(user_id) {
            let headers = response.headers_mut();
            if let Ok(v) = HeaderValue::from_str(&status.limit.to_string()) {
                headers.insert("x-ratelimit-limit", v);
            }
            if let Ok(v) = HeaderValue::from_str(&status.remaining.to_string()) {
                headers.insert("x-ratelimit-remaining", v);
            }
            if let Ok(v) = HeaderValue::from_str(&status.reset_epoch.to_string()) {
                headers.insert("x-ratelimit-reset", v);
            }
        }
    }

    response
}

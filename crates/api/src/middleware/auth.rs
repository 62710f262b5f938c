//! Bearer authentication for the public API.
//!
//! Two kinds of principal:
//!
//! - A **user API key** (64 chars, stored as a SHA-256 digest) maps the
//!   caller to one user row.
//! - A **service key** (configured via `TESSERA_SERVICE_KEYS`) identifies a
//!   frontend bot, which submits jobs on behalf of platform users named in
//!   the request body.
//!
//! The middleware resolves the principal once and stores it in request
//! extensions; the [`AuthPrincipal`] extractor reads it back in handlers.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tessera_core::error::CoreError;
use tessera_core::signing::hash_api_key;
use tessera_db::models::user::User;
use tessera_db::repositories::UserRepo;

use crate::error::AppError;
use crate::state::AppState;

/// The authenticated caller.
#[derive(Debug, Clone)]
pub enum AuthPrincipal {
    /// An end user holding their own API key.
    User(Arc<User>),
    /// A frontend service (bot) holding a shared service key.
    Service,
}

impl AuthPrincipal {
    /// The user row, when the caller is a key-holding end user.
    pub fn user(&self) -> Option<&User> {
        match self {
            AuthPrincipal::User(user) => Some(user),
            AuthPrincipal::Service => None,
        }
    }

    /// The user row, or an `UNAUTHENTICATED` error for service principals.
    /// Used by endpoints that only make sense for a concrete user.
    pub fn require_user(&self) -> Result<&User, AppError> {
        self.user().ok_or_else(|| {
            AppError::Core(CoreError::Unauthenticated(
                "This endpoint requires a user API key".into(),
            ))
        })
    }
}

/// Middleware: resolve the `Authorization: Bearer` header to a principal.
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    match resolve_principal(&state, header.as_deref()).await {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}

async fn resolve_principal(
    state: &AppState,
    header: Option<&str>,
) -> Result<AuthPrincipal, AppError> {
    let header = header.ok_or_else(|| {
        AppError::Core(CoreError::Unauthenticated(
            "Missing Authorization header".into(),
        ))
    })?;

    let token = header.strip_prefix("Bearer ").ok_or_else(|| {
        AppError::Core(CoreError::Unauthenticated(
            "Invalid Authorization format. Expected: Bearer <key>".into(),
        ))
    })?;

    if state.config.is_service_key(token) {
        return Ok(AuthPrincipal::Service);
    }

    let user = UserRepo::find_by_api_key_hash(&state.pool, &hash_api_key(token))
        .await?
        .ok_or_else(|| {
            AppError::Core(CoreError::Unauthenticated("Unknown API key".into()))
        })?;

    Ok(AuthPrincipal::User(Arc::new(user)))
}

impl FromRequestParts<AppState> for AuthPrincipal {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthPrincipal>()
            .cloned()
            .ok_or_else(|| {
                AppError::Core(CoreError::Unauthenticated(
                    "Missing Authorization header".into(),
                ))
            })
    }
}

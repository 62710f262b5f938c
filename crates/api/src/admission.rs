//! The admission pipeline: resolve user, load plan, rate-limit, validate,
//! price, quota-check, and enqueue — all under one storage transaction that
//! commits only if every step succeeds.
//!
//! Tokens are NOT debited here; the debit happens on successful completion.
//! The quota check reads committed prior usage under a row lock, so
//! concurrent admissions can only overshoot by the cost of jobs admitted
//! simultaneously below the limit.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tessera_core::error::CoreError;
use tessera_core::lifecycle::JobStatus;
use tessera_core::{params, scheduling};
use tessera_core::types::{Capability, DbId, Frontend, JobId, Platform, Timestamp};
use tessera_db::models::job::NewJob;
use tessera_db::models::user::User;
use tessera_db::repositories::{JobRepo, PlanRepo, UsageRepo, UserRepo};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthPrincipal;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / receipt
// ---------------------------------------------------------------------------

/// Body of `POST /api/v1/jobs`.
#[derive(Debug, Deserialize)]
pub struct JobRequest {
    pub frontend: Frontend,
    #[serde(default)]
    pub bot_id: Option<String>,
    pub capability: Capability,
    /// `platform:platform_user_id`, e.g. `telegram:123456`. Required when a
    /// service key submits on behalf of a platform user; forbidden (or
    /// self-referring) with a user API key.
    #[serde(default)]
    pub user_ref: Option<String>,
    pub params: serde_json::Value,
    #[serde(default)]
    pub workflow_id: Option<String>,
    /// Opaque routing context echoed back to the frontend on completion.
    #[serde(default)]
    pub reply_context: Option<serde_json::Value>,
    /// Completion callback URL; deliveries are signed (see webhooks).
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// Successful admission acknowledgment.
#[derive(Debug, Serialize)]
pub struct AdmissionReceipt {
    pub job_id: JobId,
    pub status: JobStatus,
    pub queue_position: i64,
    pub estimated_time_seconds: u32,
    pub cost_tokens: Decimal,
    pub created_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Admit a job request, returning the acknowledgment and the id of the user
/// it was billed against, or the first failure. The user id lets the HTTP
/// layer report the rate-limit window even when a service key resolved the
/// user from the request body.
pub async fn admit(
    state: &AppState,
    principal: &AuthPrincipal,
    request: JobRequest,
    client_ip: Option<String>,
) -> AppResult<(AdmissionReceipt, DbId)> {
    let identity = resolve_identity(principal, &request)?;

    // The model catalog comes from live workers plus configured statics;
    // snapshot it before opening the transaction.
    let mut catalog = state.registry.known_models().await;
    catalog.extend(state.config.static_models.iter().cloned());
    catalog.sort();
    catalog.dedup();

    let mut tx = state.pool.begin().await.map_err(AppError::Database)?;

    // 1. Resolve user (created on first contact with the free plan).
    let user: User = match &identity {
        Identity::Existing(user) => {
            // Refresh activity inside the same transaction.
            sqlx::query("UPDATE users SET last_active_at = NOW() WHERE id = $1")
                .bind(user.id)
                .execute(&mut *tx)
                .await
                .map_err(AppError::Database)?;
            (**user).clone()
        }
        Identity::PlatformRef { platform, user_id } => {
            UserRepo::get_or_create(&mut *tx, *platform, user_id, client_ip.as_deref())
                .await
                .map_err(AppError::Database)?
        }
    };

    // 2. Load plan.
    let plan = PlanRepo::find_by_id(&mut *tx, user.plan_id)
        .await
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::Internal(format!("Plan {} missing", user.plan_id)))?;
    if !plan.is_active {
        return Err(CoreError::InvalidParams("Plan is inactive".into()).into());
    }

    // 3. Rate-limit window check (in-memory, advisory). The recorded hit is
    // forgiven if any later step rejects the request.
    let rpm = u32::try_from(plan.requests_per_minute).unwrap_or(0);
    state
        .rate_limiter
        .check(user.id, rpm)
        .map_err(|retry_after_secs| CoreError::RateLimited { retry_after_secs })?;

    let outcome = admit_checked(&mut tx, &user, &plan, &request, &catalog).await;

    match outcome {
        Ok((receipt_base, model, capability)) => {
            tx.commit().await.map_err(AppError::Database)?;

            // 10. Estimate wait outside the transaction; the residency
            // heuristic only reads the in-memory registry.
            let resident = match &model {
                Some(m) => state.registry.model_resident_on_idle(m).await,
                None => true,
            };
            let estimated_time_seconds =
                scheduling::estimate_seconds(receipt_base.queue_position, capability, resident);

            Ok((
                AdmissionReceipt {
                    estimated_time_seconds,
                    ..receipt_base
                },
                user.id,
            ))
        }
        Err(err) => {
            state.rate_limiter.forgive(user.id);
            Err(err)
        }
    }
}

// ---------------------------------------------------------------------------
// Identity resolution
// ---------------------------------------------------------------------------

enum Identity {
    /// A user API key: the caller is this user.
    Existing(std::sync::Arc<User>),
    /// A service key acting for a platform identity.
    PlatformRef { platform: Platform, user_id: String },
}

fn resolve_identity(principal: &AuthPrincipal, request: &JobRequest) -> AppResult<Identity> {
    match principal {
        AuthPrincipal::User(user) => {
            // A user key may only submit for itself.
            if let Some(user_ref) = &request.user_ref {
                let (platform, puid) = parse_user_ref(user_ref)?;
                if platform.as_str() != user.platform || puid != user.platform_user_id {
                    return Err(CoreError::Unauthenticated(
                        "user_ref does not match the API key owner".into(),
                    )
                    .into());
                }
            }
            Ok(Identity::Existing(std::sync::Arc::clone(user)))
        }
        AuthPrincipal::Service => {
            let user_ref = request.user_ref.as_deref().ok_or_else(|| {
                CoreError::InvalidParams("user_ref is required for service submissions".into())
            })?;
            let (platform, puid) = parse_user_ref(user_ref)?;

            // A bot's frontend must match the platform it claims to act for.
            if let Some(frontend_platform) = request.frontend.platform() {
                if frontend_platform != platform {
                    return Err(CoreError::InvalidParams(format!(
                        "frontend {} cannot submit for platform {}",
                        request.frontend, platform
                    ))
                    .into());
                }
            }

            Ok(Identity::PlatformRef {
                platform,
                user_id: puid.to_string(),
            })
        }
    }
}

/// Parse `platform:platform_user_id`.
fn parse_user_ref(user_ref: &str) -> AppResult<(Platform, &str)> {
    let (platform_str, puid) = user_ref.split_once(':').ok_or_else(|| {
        CoreError::InvalidParams("user_ref must be platform:platform_user_id".into())
    })?;
    let platform: Platform = platform_str
        .parse()
        .map_err(CoreError::InvalidParams)?;
    if puid.is_empty() || puid.len() > 100 {
        return Err(
            CoreError::InvalidParams("platform_user_id must be 1-100 characters".into()).into(),
        );
    }
    Ok((platform, puid))
}

// ---------------------------------------------------------------------------
// Transactional steps 4-9
// ---------------------------------------------------------------------------

async fn admit_checked(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user: &User,
    plan: &tessera_db::models::plan::Plan,
    request: &JobRequest,
    catalog: &[String],
) -> AppResult<(AdmissionReceipt, Option<String>, Capability)> {
    // 4. Concurrency cap.
    let active = JobRepo::count_active_for_user(&mut **tx, user.id)
        .await
        .map_err(AppError::Database)?;
    if active >= i64::from(plan.max_concurrent_jobs) {
        return Err(CoreError::RateLimited {
            retry_after_secs: 10,
        }
        .into());
    }

    // 5. Parameter validation against the plan and model catalog.
    let typed = params::validate(request.capability, &request.params, &plan.rules(), catalog)?;

    // 6. Deterministic cost.
    let cost = typed.cost();

    // 7. Quota check against today's committed usage, under a row lock.
    let today = Utc::now().date_naive();
    let usage = UsageRepo::row_for_update(&mut **tx, user.id, today)
        .await
        .map_err(AppError::Database)?;
    if usage.tokens_used + cost > plan.daily_limit_tokens() {
        return Err(CoreError::QuotaExceeded(format!(
            "Daily limit is {} tokens; {} used, {} requested",
            plan.daily_token_limit, usage.tokens_used, cost
        ))
        .into());
    }

    // 8. Insert in CREATED, then transition to QUEUED.
    let mut metadata = serde_json::json!({ "retry_count": 0 });
    if let Some(reply_context) = &request.reply_context {
        metadata["reply_context"] = reply_context.clone();
    }
    if let Some(webhook_url) = &request.webhook_url {
        metadata["webhook_url"] = serde_json::json!(webhook_url);
    }

    let new_job = NewJob {
        id: Uuid::new_v4(),
        user_id: user.id,
        frontend: request.frontend.as_str().to_string(),
        bot_id: request.bot_id.clone(),
        capability: request.capability,
        // Snapshot the plan priority so later plan changes never
        // reprioritize this job.
        priority: plan.priority,
        params: request.params.clone(),
        workflow_id: request.workflow_id.clone(),
        cost_tokens: cost,
        timeout_seconds: i32::try_from(typed.timeout_seconds()).unwrap_or(300),
        metadata,
    };

    let created = JobRepo::insert_created(&mut **tx, &new_job)
        .await
        .map_err(AppError::Database)?;
    let queued = JobRepo::mark_queued(&mut **tx, created.id)
        .await
        .map_err(AppError::Database)?;

    // 9. Queue position among QUEUED peers.
    let queued_at = queued.queued_at.unwrap_or(queued.created_at);
    let queue_position = JobRepo::queue_position(&mut **tx, queued.priority, queued_at)
        .await
        .map_err(AppError::Database)?;

    let receipt = AdmissionReceipt {
        job_id: queued.id,
        status: JobStatus::Queued,
        queue_position,
        estimated_time_seconds: 0,
        cost_tokens: cost,
        created_at: queued.created_at,
    };
    Ok((receipt, typed.model().map(str::to_string), request.capability))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_ref_parses_platform_and_id() {
        let (platform, puid) = parse_user_ref("telegram:123456").unwrap();
        assert_eq!(platform, Platform::Telegram);
        assert_eq!(puid, "123456");
    }

    #[test]
    fn user_ref_without_colon_is_rejected() {
        assert!(parse_user_ref("telegram123").is_err());
    }

    #[test]
    fn user_ref_with_unknown_platform_is_rejected() {
        assert!(parse_user_ref("matrix:123").is_err());
    }

    #[test]
    fn user_ref_with_oversized_id_is_rejected() {
        let long = format!("web:{}", "x".repeat(101));
        assert!(parse_user_ref(&long).is_err());
    }

    #[test]
    fn job_request_deserializes_with_defaults() {
        let request: JobRequest = serde_json::from_value(serde_json::json!({
            "frontend": "telegram",
            "capability": "image",
            "user_ref": "telegram:123",
            "params": {"prompt": "a sunset", "model": "sdxl"},
        }))
        .unwrap();
        assert_eq!(request.frontend, Frontend::Telegram);
        assert_eq!(request.capability, Capability::Image);
        assert!(request.webhook_url.is_none());
    }
}

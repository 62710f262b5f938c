//! User entity: one identity on a single frontend platform.
//!
//! `(platform, platform_user_id)` is unique. Users are created on first
//! contact and never destroyed; deactivation is a plan change.

use serde::Serialize;
use sqlx::FromRow;
use tessera_core::types::{DbId, Timestamp};

/// A row from the `users` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: DbId,
    pub platform: String,
    pub platform_user_id: String,
    pub plan_id: DbId,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub ip_address: Option<String>,
    /// SHA-256 digest of the user's API key; the plaintext is never stored.
    #[serde(skip_serializing)]
    pub api_key_hash: Option<String>,
    pub api_key_prefix: Option<String>,
    pub api_key_created_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub last_active_at: Timestamp,
}

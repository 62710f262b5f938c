//! Repository for the `users` table.

use sqlx::{PgConnection, PgPool};
use tessera_core::types::{DbId, Platform};

use crate::models::user::User;

/// Column list for `users` queries.
const COLUMNS: &str = "\
    id, platform, platform_user_id, plan_id, email, display_name, ip_address, \
    api_key_hash, api_key_prefix, api_key_created_at, created_at, last_active_at";

pub struct UserRepo;

impl UserRepo {
    /// Resolve a platform identity, creating the user on first contact with
    /// the default `free` plan. Always refreshes `last_active_at`, and
    /// records the caller's IP when one is supplied.
    pub async fn get_or_create(
        conn: &mut PgConnection,
        platform: Platform,
        platform_user_id: &str,
        ip_address: Option<&str>,
    ) -> Result<User, sqlx::Error> {
        let query = format!(
            "INSERT INTO users (platform, platform_user_id, plan_id, ip_address) \
             VALUES ($1, $2, (SELECT id FROM plans WHERE tier = 'free'), $3) \
             ON CONFLICT (platform, platform_user_id) DO UPDATE SET \
                last_active_at = NOW(), \
                ip_address = COALESCE(EXCLUDED.ip_address, users.ip_address) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, User>(&query)
            .bind(platform.as_str())
            .bind(platform_user_id)
            .bind(ip_address)
            .fetch_one(conn)
            .await
    }

    /// Find a user by the SHA-256 digest of their API key.
    pub async fn find_by_api_key_hash(
        pool: &PgPool,
        key_hash: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM users WHERE api_key_hash = $1");
        sqlx::query_as::<_, User>(&query)
            .bind(key_hash)
            .fetch_optional(pool)
            .await
    }

    /// Attach a freshly generated API key (hash + display prefix) to a user,
    /// replacing any previous key.
    pub async fn set_api_key(
        pool: &PgPool,
        id: DbId,
        key_hash: &str,
        key_prefix: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        let query = format!(
            "UPDATE users SET \
                api_key_hash = $2, api_key_prefix = $3, api_key_created_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .bind(key_hash)
            .bind(key_prefix)
            .fetch_optional(pool)
            .await
    }
}

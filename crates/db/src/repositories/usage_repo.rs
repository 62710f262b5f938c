//! Repository for the `usage_daily` table.
//!
//! Rows are created lazily on the first chargeable event of a day and only
//! ever mutated by upsert-style increments, so concurrent completions never
//! clobber each other's counters.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use tessera_core::types::{Capability, DbId};

use crate::models::usage::DailyUsage;

/// Column list for `usage_daily` queries.
const COLUMNS: &str = "\
    user_id, date, tokens_used, jobs_completed, jobs_failed, \
    tokens_image, tokens_video, tokens_text, tokens_audio";

/// The per-capability breakdown column charged for a capability.
fn breakdown_column(capability: Capability) -> &'static str {
    match capability {
        Capability::Image => "tokens_image",
        Capability::Video => "tokens_video",
        Capability::Text => "tokens_text",
        Capability::Audio => "tokens_audio",
    }
}

pub struct UsageRepo;

impl UsageRepo {
    /// Ensure today's row exists and lock it for the rest of the admission
    /// transaction. The row lock is what tightens the concurrent-admission
    /// window on the quota check.
    pub async fn row_for_update(
        conn: &mut PgConnection,
        user_id: DbId,
        date: NaiveDate,
    ) -> Result<DailyUsage, sqlx::Error> {
        sqlx::query(
            "INSERT INTO usage_daily (user_id, date) VALUES ($1, $2) \
             ON CONFLICT (user_id, date) DO NOTHING",
        )
        .bind(user_id)
        .bind(date)
        .execute(&mut *conn)
        .await?;

        let query = format!(
            "SELECT {COLUMNS} FROM usage_daily \
             WHERE user_id = $1 AND date = $2 \
             FOR UPDATE"
        );
        sqlx::query_as::<_, DailyUsage>(&query)
            .bind(user_id)
            .bind(date)
            .fetch_one(conn)
            .await
    }

    /// Debit a completed job: `cost` tokens against the total and the
    /// capability breakdown, plus one completed job. Runs inside the
    /// completion transaction so the debit commits with the status change.
    pub async fn debit_completed(
        conn: &mut PgConnection,
        user_id: DbId,
        date: NaiveDate,
        cost: Decimal,
        capability: Capability,
    ) -> Result<(), sqlx::Error> {
        let column = breakdown_column(capability);
        let query = format!(
            "INSERT INTO usage_daily (user_id, date, tokens_used, jobs_completed, {column}) \
             VALUES ($1, $2, $3, 1, $3) \
             ON CONFLICT (user_id, date) DO UPDATE SET \
                tokens_used = usage_daily.tokens_used + $3, \
                jobs_completed = usage_daily.jobs_completed + 1, \
                {column} = usage_daily.{column} + $3"
        );
        sqlx::query(&query)
            .bind(user_id)
            .bind(date)
            .bind(cost)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Count a failed job. Failures never charge tokens.
    pub async fn record_failure(
        pool: &PgPool,
        user_id: DbId,
        date: NaiveDate,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO usage_daily (user_id, date, jobs_failed) VALUES ($1, $2, 1) \
             ON CONFLICT (user_id, date) DO UPDATE SET \
                jobs_failed = usage_daily.jobs_failed + 1",
        )
        .bind(user_id)
        .bind(date)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// A user's usage for one day, zero-filled when no row exists.
    pub async fn for_day(
        pool: &PgPool,
        user_id: DbId,
        date: NaiveDate,
    ) -> Result<DailyUsage, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM usage_daily WHERE user_id = $1 AND date = $2"
        );
        let row = sqlx::query_as::<_, DailyUsage>(&query)
            .bind(user_id)
            .bind(date)
            .fetch_optional(pool)
            .await?;
        Ok(row.unwrap_or_else(|| DailyUsage::empty(user_id, date)))
    }

    /// Usage history, newest day first.
    pub async fn history(
        pool: &PgPool,
        user_id: DbId,
        days: i64,
    ) -> Result<Vec<DailyUsage>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM usage_daily \
             WHERE user_id = $1 \
             ORDER BY date DESC \
             LIMIT $2"
        );
        sqlx::query_as::<_, DailyUsage>(&query)
            .bind(user_id)
            .bind(days)
            .fetch_all(pool)
            .await
    }
}

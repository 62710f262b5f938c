//! Daily usage accounting: one row per `(user, UTC date)`, created lazily on
//! the first chargeable event of the day and mutated under upsert discipline.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use tessera_core::types::DbId;

/// A row from the `usage_daily` table.
///
/// Invariant: `tokens_used` equals the sum of the per-capability breakdown.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DailyUsage {
    pub user_id: DbId,
    pub date: NaiveDate,
    pub tokens_used: Decimal,
    pub jobs_completed: i32,
    pub jobs_failed: i32,
    pub tokens_image: Decimal,
    pub tokens_video: Decimal,
    pub tokens_text: Decimal,
    pub tokens_audio: Decimal,
}

impl DailyUsage {
    /// An all-zero row for days with no chargeable events.
    pub fn empty(user_id: DbId, date: NaiveDate) -> Self {
        Self {
            user_id,
            date,
            tokens_used: Decimal::ZERO,
            jobs_completed: 0,
            jobs_failed: 0,
            tokens_image: Decimal::ZERO,
            tokens_video: Decimal::ZERO,
            tokens_text: Decimal::ZERO,
            tokens_audio: Decimal::ZERO,
        }
    }
}

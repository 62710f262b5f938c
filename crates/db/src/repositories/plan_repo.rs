//! Repository for the `plans` table. Plans are seed data and effectively
//! immutable; tier upgrades change the user's `plan_id`, never the plan row.

use sqlx::PgConnection;
use tessera_core::types::DbId;

use crate::models::plan::Plan;

/// Column list for `plans` queries.
const COLUMNS: &str = "\
    id, tier, daily_token_limit, requests_per_minute, max_concurrent_jobs, \
    priority, max_resolution, allowed_models, price_cents, description, \
    is_active, created_at";

pub struct PlanRepo;

impl PlanRepo {
    /// Find a plan by its ID, inside an admission transaction.
    pub async fn find_by_id(
        conn: &mut PgConnection,
        id: DbId,
    ) -> Result<Option<Plan>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM plans WHERE id = $1");
        sqlx::query_as::<_, Plan>(&query)
            .bind(id)
            .fetch_optional(conn)
            .await
    }

}

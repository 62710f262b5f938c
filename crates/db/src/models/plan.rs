//! Plan entity: an immutable subscription policy record.

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use tessera_core::params::PlanRules;
use tessera_core::types::{DbId, Timestamp};

/// A row from the `plans` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Plan {
    pub id: DbId,
    pub tier: String,
    pub daily_token_limit: i64,
    pub requests_per_minute: i32,
    pub max_concurrent_jobs: i32,
    pub priority: i32,
    pub max_resolution: i32,
    /// JSONB array of model ids; `"*"` is the wildcard.
    pub allowed_models: serde_json::Value,
    pub price_cents: i32,
    pub description: String,
    pub is_active: bool,
    pub created_at: Timestamp,
}

impl Plan {
    /// The allowed-model list as strings, dropping malformed entries.
    pub fn allowed_models_vec(&self) -> Vec<String> {
        self.allowed_models
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Validation view of this plan for the admission pipeline.
    pub fn rules(&self) -> PlanRules {
        PlanRules {
            max_resolution: u32::try_from(self.max_resolution).unwrap_or(0),
            allowed_models: self.allowed_models_vec(),
        }
    }

    /// Daily token budget as a decimal for quota arithmetic.
    pub fn daily_limit_tokens(&self) -> Decimal {
        Decimal::from(self.daily_token_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn plan(models: serde_json::Value) -> Plan {
        Plan {
            id: 1,
            tier: "free".into(),
            daily_token_limit: 20,
            requests_per_minute: 3,
            max_concurrent_jobs: 1,
            priority: 0,
            max_resolution: 1024,
            allowed_models: models,
            price_cents: 0,
            description: String::new(),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn allowed_models_parses_string_array() {
        let p = plan(serde_json::json!(["sdxl", "flux-schnell"]));
        assert_eq!(p.allowed_models_vec(), vec!["sdxl", "flux-schnell"]);
    }

    #[test]
    fn malformed_allowed_models_yields_empty() {
        let p = plan(serde_json::json!({"not": "an array"}));
        assert!(p.allowed_models_vec().is_empty());
    }

    #[test]
    fn rules_carry_wildcard_through() {
        let p = plan(serde_json::json!(["*"]));
        assert!(p.rules().allows_model("anything"));
    }
}

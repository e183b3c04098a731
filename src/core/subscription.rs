use chrono::{DateTime, Duration, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::storage::accounts::{self, Account};

/// Subscription plan of an account
///
/// Stored and sent over the wire as snake_case tokens (`free`, `tier1`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Free,
    Tier1,
    Tier2,
    Tier3,
}

impl Plan {
    pub fn is_paid(self) -> bool {
        self != Plan::Free
    }

    /// Plans that can be bought
    pub fn paid() -> impl Iterator<Item = Plan> {
        Plan::iter().filter(|plan| plan.is_paid())
    }

    pub fn display_name(self) -> &'static str {
        PlanSpec::for_plan(self).name
    }
}

impl ToSql for Plan {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for Plan {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        raw.parse().map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// One row of the plan table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSpec {
    pub plan: Plan,
    /// Name shown to users
    pub name: &'static str,
    /// Submissions allowed per day
    pub daily_limit: u32,
    /// Price in major currency units (0 for Free)
    pub price: u32,
    /// Subscription length in days (0 for Free)
    pub duration_days: i64,
}

impl PlanSpec {
    /// Plan table lookup
    pub fn for_plan(plan: Plan) -> Self {
        match plan {
            Plan::Free => PlanSpec {
                plan,
                name: "Free",
                daily_limit: *config::plans::FREE_DAILY_LIMIT,
                price: 0,
                duration_days: 0,
            },
            Plan::Tier1 => PlanSpec {
                plan,
                name: "Starter",
                daily_limit: *config::plans::TIER1_DAILY_LIMIT,
                price: *config::plans::TIER1_PRICE,
                duration_days: *config::plans::TIER1_DURATION_DAYS,
            },
            Plan::Tier2 => PlanSpec {
                plan,
                name: "Pro",
                daily_limit: *config::plans::TIER2_DAILY_LIMIT,
                price: *config::plans::TIER2_PRICE,
                duration_days: *config::plans::TIER2_DURATION_DAYS,
            },
            Plan::Tier3 => PlanSpec {
                plan,
                name: "Max",
                daily_limit: *config::plans::TIER3_DAILY_LIMIT,
                price: *config::plans::TIER3_PRICE,
                duration_days: *config::plans::TIER3_DURATION_DAYS,
            },
        }
    }

    /// Amount charged by the payment provider, in minor units
    pub fn amount_minor(&self) -> i64 {
        i64::from(self.price) * config::payment::MINOR_UNITS
    }

    pub fn duration(&self) -> Duration {
        Duration::days(self.duration_days)
    }
}

/// Activates a paid plan: sets plan and daily limit, `expiry = now + duration`,
/// resets `used_today` and marks the subscription active.
pub fn activate_subscription(conn: &Connection, account_id: i64, plan: Plan, now: DateTime<Utc>) -> AppResult<Account> {
    if !plan.is_paid() {
        return Err(AppError::Validation(format!("plan {} cannot be purchased", plan)));
    }

    let spec = PlanSpec::for_plan(plan);
    let expiry = now + spec.duration();
    let updated = accounts::activate_subscription(conn, account_id, plan, spec.daily_limit, expiry)?;
    if !updated {
        return Err(AppError::NotFound(format!("account {}", account_id)));
    }

    log::info!(
        "💳 Subscription activated: user={}, plan={} ({}), daily_limit={}, expiry={}",
        account_id,
        plan,
        spec.name,
        spec.daily_limit,
        expiry
    );

    accounts::get_account(conn, account_id)?.ok_or_else(|| AppError::NotFound(format!("account {}", account_id)))
}

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result, Row};

use crate::core::config;
use crate::core::subscription::Plan;
use crate::storage::{format_timestamp, parse_timestamp};

/// Per-user plan, quota counters and subscription state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub telegram_id: i64,
    pub username: Option<String>,
    pub plan: Plan,
    pub daily_limit: u32,
    pub used_today: u32,
    /// Set once the lifetime free check has been consumed; never cleared
    pub free_check_used: bool,
    pub subscription_active: bool,
    pub expiry: Option<DateTime<Utc>>,
    pub last_submission_at: Option<DateTime<Utc>>,
}

impl Account {
    /// A fresh Free account, as created on first contact
    pub fn new_free(telegram_id: i64) -> Self {
        Self {
            telegram_id,
            username: None,
            plan: Plan::Free,
            daily_limit: *config::plans::FREE_DAILY_LIMIT,
            used_today: 0,
            free_check_used: false,
            subscription_active: false,
            expiry: None,
            last_submission_at: None,
        }
    }

    fn from_row(row: &Row<'_>) -> Result<Self> {
        Ok(Self {
            telegram_id: row.get(0)?,
            username: row.get(1)?,
            plan: row.get(2)?,
            daily_limit: row.get(3)?,
            used_today: row.get(4)?,
            free_check_used: row.get(5)?,
            subscription_active: row.get(6)?,
            expiry: parse_timestamp(row.get(7)?),
            last_submission_at: parse_timestamp(row.get(8)?),
        })
    }
}

const ACCOUNT_COLUMNS: &str = "telegram_id, username, plan, daily_limit, used_today, free_check_used, \
                               subscription_active, expiry, last_submission_at";

/// Creates a Free account on first contact; refreshes the username otherwise.
pub fn ensure_account(conn: &Connection, telegram_id: i64, username: Option<&str>) -> Result<Account> {
    conn.execute(
        "INSERT INTO accounts (telegram_id, username, plan, daily_limit) VALUES (?1, ?2, 'free', ?3)
         ON CONFLICT(telegram_id) DO UPDATE SET username = COALESCE(excluded.username, accounts.username)",
        params![telegram_id, username, *config::plans::FREE_DAILY_LIMIT],
    )?;

    get_account(conn, telegram_id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

pub fn get_account(conn: &Connection, telegram_id: i64) -> Result<Option<Account>> {
    conn.query_row(
        &format!("SELECT {} FROM accounts WHERE telegram_id = ?1", ACCOUNT_COLUMNS),
        [telegram_id],
        Account::from_row,
    )
    .optional()
}

/// Records an admission: bumps `used_today`, stamps `last_submission_at`
/// and, for the free check, flips `free_check_used`.
///
/// Callers run this inside the admission transaction.
pub fn record_admission(conn: &Connection, telegram_id: i64, now: DateTime<Utc>, free_check: bool) -> Result<()> {
    conn.execute(
        "UPDATE accounts
         SET used_today = used_today + 1,
             last_submission_at = ?2,
             free_check_used = CASE WHEN ?3 THEN 1 ELSE free_check_used END
         WHERE telegram_id = ?1",
        params![telegram_id, format_timestamp(now), free_check],
    )?;
    Ok(())
}

/// Sets the paid plan fields. Returns false when the account does not exist.
pub fn activate_subscription(
    conn: &Connection,
    telegram_id: i64,
    plan: Plan,
    daily_limit: u32,
    expiry: DateTime<Utc>,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE accounts
         SET plan = ?2, daily_limit = ?3, expiry = ?4, used_today = 0, subscription_active = 1
         WHERE telegram_id = ?1",
        params![telegram_id, plan, daily_limit, format_timestamp(expiry)],
    )?;
    Ok(updated > 0)
}

/// Back to Free: plan, Free daily limit, inactive, no expiry.
pub fn downgrade_to_free(conn: &Connection, telegram_id: i64) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE accounts
         SET plan = 'free', daily_limit = ?2, subscription_active = 0, expiry = NULL
         WHERE telegram_id = ?1",
        params![telegram_id, *config::plans::FREE_DAILY_LIMIT],
    )?;
    Ok(updated > 0)
}

/// Zeroes every account's `used_today`. Returns the number of rows that changed.
pub fn reset_daily_usage(conn: &Connection) -> Result<usize> {
    conn.execute("UPDATE accounts SET used_today = 0 WHERE used_today != 0", [])
}

/// Active subscriptions whose expiry lies strictly before `now`
pub fn expired_subscriptions(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<Account>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM accounts
         WHERE subscription_active = 1 AND expiry IS NOT NULL AND expiry < ?1
         ORDER BY expiry",
        ACCOUNT_COLUMNS
    ))?;
    let rows = stmt.query_map([format_timestamp(now)], Account::from_row)?;
    rows.collect()
}

/// Number of accounts per plan, for the stats command
pub fn count_by_plan(conn: &Connection) -> Result<Vec<(Plan, i64)>> {
    let mut stmt = conn.prepare("SELECT plan, COUNT(*) FROM accounts GROUP BY plan ORDER BY plan")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

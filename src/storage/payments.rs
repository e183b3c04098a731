use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result};

use crate::core::subscription::Plan;
use crate::storage::{format_timestamp, parse_timestamp};

/// Checkout started by a user, keyed by the reference sent to the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPayment {
    pub reference: String,
    pub telegram_id: i64,
    pub plan: Plan,
    /// Minor currency units
    pub amount: i64,
    pub currency: String,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
}

pub fn insert_pending_payment(conn: &Connection, payment: &PendingPayment) -> Result<()> {
    conn.execute(
        "INSERT INTO pending_payments (reference, telegram_id, plan, amount, currency, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'pending', datetime('now'))",
        params![
            payment.reference,
            payment.telegram_id,
            payment.plan,
            payment.amount,
            payment.currency
        ],
    )?;
    Ok(())
}

pub fn get_pending_payment(conn: &Connection, reference: &str) -> Result<Option<PendingPayment>> {
    conn.query_row(
        "SELECT reference, telegram_id, plan, amount, currency, status, processed_at
         FROM pending_payments WHERE reference = ?1",
        [reference],
        |row| {
            Ok(PendingPayment {
                reference: row.get(0)?,
                telegram_id: row.get(1)?,
                plan: row.get(2)?,
                amount: row.get(3)?,
                currency: row.get(4)?,
                processed: row.get::<_, String>(5)? == "processed",
                processed_at: parse_timestamp(row.get(6)?),
            })
        },
    )
    .optional()
}

/// Marks a reference as processed. Returns false if it was already processed,
/// which is how duplicate provider callbacks are detected.
pub fn mark_payment_processed(conn: &Connection, reference: &str, now: DateTime<Utc>) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE pending_payments SET status = 'processed', processed_at = ?2
         WHERE reference = ?1 AND status = 'pending'",
        params![reference, format_timestamp(now)],
    )?;
    Ok(updated == 1)
}

/// Records a payment that arrived without a local checkout row (attributed via metadata),
/// already marked processed so a repeat callback is detected.
pub fn insert_processed_payment(conn: &Connection, payment: &PendingPayment, now: DateTime<Utc>) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO pending_payments
            (reference, telegram_id, plan, amount, currency, status, created_at, processed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'processed', ?6, ?6)",
        params![
            payment.reference,
            payment.telegram_id,
            payment.plan,
            payment.amount,
            payment.currency,
            format_timestamp(now)
        ],
    )?;
    Ok(inserted == 1)
}

//! Billing bridge
//!
//! A checkout stores a pending-payment row keyed by a generated reference before
//! the provider is asked for a payment link. The provider echoes the reference
//! (and our metadata) back in its callback; [`confirm_payment`] turns that into
//! exactly one subscription activation.

pub mod paystack;
pub mod webhook;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};
use serde_json::Value;
use url::Url;

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::core::subscription::{self, Plan, PlanSpec};
use crate::storage::accounts::{self, Account};
use crate::storage::payments::{self, PendingPayment};
use crate::storage::{get_connection, DbPool};

pub use paystack::PaystackClient;

/// What the provider needs to open a checkout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    pub reference: String,
    pub account_id: i64,
    pub plan: Plan,
    /// Minor currency units
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutLink {
    pub reference: String,
    pub url: Url,
}

#[async_trait]
pub trait BillingProvider: Send + Sync {
    async fn create_checkout(&self, request: &CheckoutRequest) -> AppResult<CheckoutLink>;

    /// Checks a callback signature computed over the raw request body
    fn verify_signature(&self, raw_body: &[u8], signature: &str) -> bool;
}

/// New checkout reference: `tq_<uuid>`
pub fn new_reference() -> String {
    format!("tq_{}", uuid::Uuid::new_v4().simple())
}

/// Records a pending payment for `plan` and asks the provider for a payment link.
pub async fn start_checkout(
    pool: &DbPool,
    provider: &dyn BillingProvider,
    account_id: i64,
    plan: Plan,
) -> AppResult<CheckoutLink> {
    if !plan.is_paid() {
        return Err(AppError::Validation(format!("plan {} cannot be purchased", plan)));
    }

    let spec = PlanSpec::for_plan(plan);
    let request = CheckoutRequest {
        reference: new_reference(),
        account_id,
        plan,
        amount: spec.amount_minor(),
        currency: config::payment::CURRENCY.clone(),
    };

    {
        let conn = get_connection(pool)?;
        accounts::ensure_account(&conn, account_id, None)?;
        payments::insert_pending_payment(
            &conn,
            &PendingPayment {
                reference: request.reference.clone(),
                telegram_id: account_id,
                plan,
                amount: request.amount,
                currency: request.currency.clone(),
                processed: false,
                processed_at: None,
            },
        )?;
    }

    log::info!(
        "🧾 Checkout started: user={}, plan={}, amount={} {}, reference={}",
        account_id,
        plan,
        request.amount,
        request.currency,
        request.reference
    );

    provider.create_checkout(&request).await
}

/// Account and plan carried in the provider's metadata echo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentMetadata {
    pub telegram_id: i64,
    pub plan: Plan,
}

impl PaymentMetadata {
    /// Accepts `telegram_id` as number or numeric string; only paid plans attribute.
    pub fn from_value(value: &Value) -> Option<Self> {
        let telegram_id = match value.get("telegram_id")? {
            Value::Number(n) => n.as_i64()?,
            Value::String(s) => s.trim().parse().ok()?,
            _ => return None,
        };
        let plan: Plan = value.get("plan")?.as_str()?.parse().ok()?;
        plan.is_paid().then_some(Self { telegram_id, plan })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Activated(Account),
    /// The reference was already processed (duplicate callback)
    AlreadyProcessed,
    AmountMismatch { expected: i64, received: i64 },
    /// Neither a pending row nor usable metadata identifies the buyer
    Unattributed,
}

/// Confirms a successful charge and activates the plan once per reference.
///
/// The pending row is looked up first; metadata is only used for references we
/// never issued. Everything runs in one immediate transaction so two concurrent
/// callbacks for the same reference cannot both activate.
pub fn confirm_payment(
    conn: &mut Connection,
    reference: &str,
    amount: i64,
    metadata: Option<PaymentMetadata>,
    now: DateTime<Utc>,
) -> AppResult<PaymentOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let (account_id, plan) = match payments::get_pending_payment(&tx, reference)? {
        Some(pending) if pending.processed => return Ok(PaymentOutcome::AlreadyProcessed),
        Some(pending) => {
            if amount < pending.amount {
                return Ok(PaymentOutcome::AmountMismatch {
                    expected: pending.amount,
                    received: amount,
                });
            }
            if !payments::mark_payment_processed(&tx, reference, now)? {
                return Ok(PaymentOutcome::AlreadyProcessed);
            }
            (pending.telegram_id, pending.plan)
        }
        None => {
            let Some(meta) = metadata else {
                return Ok(PaymentOutcome::Unattributed);
            };
            let expected = PlanSpec::for_plan(meta.plan).amount_minor();
            if amount < expected {
                return Ok(PaymentOutcome::AmountMismatch {
                    expected,
                    received: amount,
                });
            }
            let record = PendingPayment {
                reference: reference.to_string(),
                telegram_id: meta.telegram_id,
                plan: meta.plan,
                amount,
                currency: config::payment::CURRENCY.clone(),
                processed: true,
                processed_at: Some(now),
            };
            if !payments::insert_processed_payment(&tx, &record, now)? {
                return Ok(PaymentOutcome::AlreadyProcessed);
            }
            accounts::ensure_account(&tx, meta.telegram_id, None)?;
            (meta.telegram_id, meta.plan)
        }
    };

    let account = subscription::activate_subscription(&tx, account_id, plan, now)?;
    tx.commit()?;
    Ok(PaymentOutcome::Activated(account))
}

//! Quota and eligibility engine
//!
//! [`evaluate`] is the pure decision. [`admit`] re-runs it inside a single
//! `BEGIN IMMEDIATE` transaction together with every counter update and the
//! submission insert, so the check-then-increment on the shared global
//! allocation cannot race between concurrent users.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};
use std::time::Duration;

use crate::check::options::ReportOptions;
use crate::core::error::AppResult;
use crate::core::metrics;
use crate::core::subscription::Plan;
use crate::storage::accounts::{self, Account};
use crate::storage::meta::{self, GlobalAllocation};
use crate::storage::submissions::{self, NewSubmission, SubmissionStatus};

/// Why a submission was not admitted.
///
/// Variants are listed in evaluation order; the first failing gate wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    FreeCheckUsed,
    DailyLimitReached { limit: u32 },
    CooldownActive { remaining_secs: u64 },
    SystemAtCapacity,
}

impl Rejection {
    pub fn label(&self) -> &'static str {
        match self {
            Rejection::FreeCheckUsed => "free_check_used",
            Rejection::DailyLimitReached { .. } => "daily_limit",
            Rejection::CooldownActive { .. } => "cooldown",
            Rejection::SystemAtCapacity => "capacity",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admit { is_free_check: bool },
    Reject(Rejection),
}

/// Decides whether `account` may submit now.
///
/// Gate order: free check, daily limit, cooldown, global capacity.
pub fn evaluate(account: &Account, alloc: &GlobalAllocation, now: DateTime<Utc>, cooldown: Duration) -> Decision {
    if account.plan == Plan::Free && account.free_check_used {
        return Decision::Reject(Rejection::FreeCheckUsed);
    }

    if account.used_today >= account.daily_limit {
        return Decision::Reject(Rejection::DailyLimitReached {
            limit: account.daily_limit,
        });
    }

    if let Some(remaining_secs) = cooldown_remaining(account.last_submission_at, now, cooldown) {
        return Decision::Reject(Rejection::CooldownActive { remaining_secs });
    }

    if alloc.is_exhausted() {
        return Decision::Reject(Rejection::SystemAtCapacity);
    }

    Decision::Admit {
        is_free_check: account.plan == Plan::Free && !account.free_check_used,
    }
}

/// Seconds left in the cooldown window (rounded up), or `None` when it has passed.
fn cooldown_remaining(last: Option<DateTime<Utc>>, now: DateTime<Utc>, cooldown: Duration) -> Option<u64> {
    let last = last?;
    let window_ms = i64::try_from(cooldown.as_millis()).unwrap_or(i64::MAX);
    // A timestamp in the future (clock skew) counts as "just now"
    let elapsed_ms = (now - last).num_milliseconds().max(0);
    if elapsed_ms >= window_ms {
        return None;
    }
    let remaining_ms = (window_ms - elapsed_ms) as u64;
    Some(remaining_ms.div_ceil(1000).max(1))
}

/// What the user asked to check
#[derive(Debug, Clone)]
pub struct AdmissionRequest {
    pub owner: i64,
    pub filename: String,
    pub file_id: String,
    pub options: ReportOptions,
    /// Downloaded copy, recorded with the row so a promoted submission always finds it
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Created and moved straight to `Processing`
    Started { submission_id: i64, is_free_check: bool },
    /// Created behind the owner's running submission; `position` is 1-based
    Queued {
        submission_id: i64,
        position: u32,
        is_free_check: bool,
    },
    Rejected(Rejection),
}

impl Admission {
    pub fn submission_id(&self) -> Option<i64> {
        match self {
            Admission::Started { submission_id, .. } | Admission::Queued { submission_id, .. } => Some(*submission_id),
            Admission::Rejected(_) => None,
        }
    }
}

/// Read-only evaluation used to reject early, before a file is downloaded.
///
/// Unknown users evaluate as a fresh Free account.
pub fn precheck(conn: &Connection, user_id: i64, now: DateTime<Utc>, cooldown: Duration) -> AppResult<Decision> {
    let account = accounts::get_account(conn, user_id)?.unwrap_or_else(|| Account::new_free(user_id));
    let alloc = meta::global_allocation(conn)?;
    Ok(evaluate(&account, &alloc, now, cooldown))
}

/// Atomically evaluates and commits an admission.
///
/// On success: `used_today` and the global counter are incremented,
/// `last_submission_at` is stamped, the free-check flag flipped when applicable,
/// and the submission row is created and moved to `Processing` (or `Queued` when
/// the owner already has one processing). Rejections touch nothing.
pub fn admit(
    conn: &mut Connection,
    request: &AdmissionRequest,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> AppResult<Admission> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let account = accounts::ensure_account(&tx, request.owner, None)?;
    let alloc = meta::global_allocation(&tx)?;

    let is_free_check = match evaluate(&account, &alloc, now, cooldown) {
        Decision::Admit { is_free_check } => is_free_check,
        Decision::Reject(reason) => {
            tx.rollback()?;
            log::info!("🚫 Admission rejected: user={}, reason={}", request.owner, reason.label());
            metrics::ADMISSIONS_TOTAL.with_label_values(&[reason.label()]).inc();
            return Ok(Admission::Rejected(reason));
        }
    };

    accounts::record_admission(&tx, request.owner, now, is_free_check)?;
    meta::increment_global_used(&tx)?;

    let submission_id = submissions::insert_submission(
        &tx,
        &NewSubmission {
            owner: request.owner,
            filename: request.filename.clone(),
            file_id: request.file_id.clone(),
            options: request.options,
            is_free_check,
        },
        now,
    )?;
    if let Some(path) = &request.file_path {
        submissions::set_file_path(&tx, submission_id, path)?;
    }

    let admission = if submissions::has_processing(&tx, request.owner)? {
        submissions::transition(&tx, submission_id, SubmissionStatus::Queued, now)?;
        let position = submissions::queue_position(&tx, request.owner, submission_id)?;
        Admission::Queued {
            submission_id,
            position,
            is_free_check,
        }
    } else {
        submissions::transition(&tx, submission_id, SubmissionStatus::Processing, now)?;
        Admission::Started {
            submission_id,
            is_free_check,
        }
    };

    tx.commit()?;

    let outcome = match admission {
        Admission::Queued { .. } => "queued",
        _ => "started",
    };
    log::info!(
        "✅ Admission: user={}, submission={}, outcome={}, free_check={}",
        request.owner,
        submission_id,
        outcome,
        is_free_check
    );
    metrics::ADMISSIONS_TOTAL.with_label_values(&[outcome]).inc();

    Ok(admission)
}

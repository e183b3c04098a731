//! Command handler implementations (/start, /check, /id, /upgrade, /cancel)

use chrono::Utc;
use std::path::Path;

use super::types::{send_rejection, HandlerDeps};
use crate::check::document::remove_scratch_file;
use crate::core::error::AppResult;
use crate::core::metrics;
use crate::core::quota::{self, Decision};
use crate::storage::submissions::{self, SubmissionStatus};
use crate::storage::{accounts, get_connection, sessions};
use crate::telegram::keyboards;
use crate::telegram::texts;

/// Handle /start: creates the account on first contact and greets.
pub async fn handle_start(deps: &HandlerDeps, user_id: i64, username: Option<&str>) -> AppResult<()> {
    {
        let conn = get_connection(&deps.db_pool)?;
        let existed = accounts::get_account(&conn, user_id)?.is_some();
        accounts::ensure_account(&conn, user_id, username)?;
        if !existed {
            log::info!("👤 New account: user={}, username={:?}", user_id, username);
        }
    }
    deps.transport.send_text(user_id, texts::WELCOME).await
}

/// Handle /check: tells the user up front when a check would be rejected.
pub async fn handle_check(deps: &HandlerDeps, user_id: i64, username: Option<&str>) -> AppResult<()> {
    let decision = {
        let conn = get_connection(&deps.db_pool)?;
        accounts::ensure_account(&conn, user_id, username)?;
        quota::precheck(&conn, user_id, Utc::now(), deps.cooldown)?
    };
    match decision {
        Decision::Admit { .. } => deps.transport.send_text(user_id, texts::CHECK_PROMPT).await,
        Decision::Reject(reason) => send_rejection(deps, user_id, &reason).await,
    }
}

/// Handle /id
pub async fn handle_id(deps: &HandlerDeps, user_id: i64, username: Option<&str>) -> AppResult<()> {
    let account = {
        let conn = get_connection(&deps.db_pool)?;
        accounts::ensure_account(&conn, user_id, username)?
    };
    deps.transport.send_text(user_id, &texts::account_summary(&account)).await
}

/// Handle /upgrade
pub async fn handle_upgrade(deps: &HandlerDeps, user_id: i64) -> AppResult<()> {
    deps.transport
        .send_with_buttons(user_id, &texts::plan_details(), keyboards::plan_buttons())
        .await
}

/// Handle /cancel: cancels every queued or running check and drops a pending upload.
///
/// Admission counters are not refunded.
pub async fn handle_cancel(deps: &HandlerDeps, user_id: i64) -> AppResult<()> {
    let now = Utc::now();
    let (cancelled, dropped_pending) = {
        let conn = get_connection(&deps.db_pool)?;
        let mut cancelled = Vec::new();
        for submission in submissions::active_for_owner(&conn, user_id)? {
            if submissions::transition(&conn, submission.id, SubmissionStatus::Cancelled, now)? {
                cancelled.push(submission);
            }
        }
        (cancelled, sessions::clear_session(&conn, user_id)?)
    };

    for submission in &cancelled {
        metrics::record_finished("cancelled");
        let running = deps.processor.cancel(submission.id);
        log::info!(
            "🛑 User {} cancelled submission {} (was {}, job running: {})",
            user_id,
            submission.id,
            submission.status,
            running
        );
        // A running job removes its own upload when it notices the cancellation.
        if submission.status == SubmissionStatus::Queued {
            if let Some(path) = &submission.file_path {
                remove_scratch_file(Path::new(path)).await;
            }
        }
    }

    let text = match (cancelled.len(), dropped_pending) {
        (0, false) => texts::NOTHING_TO_CANCEL.to_string(),
        (0, true) => texts::pending_upload_dropped(),
        (count, _) => texts::cancelled(count),
    };
    deps.transport.send_text(user_id, &text).await
}

//! Document uploads and the options reply that turns them into submissions

use chrono::Utc;

use super::types::{send_rejection, HandlerDeps};
use crate::check::document::{is_allowed_filename, remove_scratch_file, scratch_path};
use crate::check::options::ReportOptions;
use crate::core::error::AppResult;
use crate::core::quota::{self, Admission, AdmissionRequest, Decision};
use crate::storage::sessions::{self, PendingUpload};
use crate::storage::{accounts, get_connection};
use crate::telegram::texts;

/// A document arrived: validate it, reject early if the user cannot check now,
/// otherwise remember it and ask for the report options.
///
/// A newer upload replaces a pending one.
pub async fn handle_document(
    deps: &HandlerDeps,
    user_id: i64,
    username: Option<&str>,
    filename: &str,
    file_id: &str,
) -> AppResult<()> {
    if !is_allowed_filename(filename) {
        log::info!("Unsupported upload from {}: {}", user_id, filename);
        return deps.transport.send_text(user_id, texts::UNSUPPORTED_FILE).await;
    }

    let decision = {
        let conn = get_connection(&deps.db_pool)?;
        accounts::ensure_account(&conn, user_id, username)?;
        quota::precheck(&conn, user_id, Utc::now(), deps.cooldown)?
    };
    if let Decision::Reject(reason) = decision {
        log::info!("Upload from {} rejected before download: {}", user_id, reason.label());
        return send_rejection(deps, user_id, &reason).await;
    }

    {
        let conn = get_connection(&deps.db_pool)?;
        if let Some(previous) = sessions::get_session(&conn, user_id)?.pending {
            log::info!(
                "Pending upload {} of user {} replaced by {}",
                previous.file_name,
                user_id,
                filename
            );
        }
        sessions::set_pending_upload(
            &conn,
            user_id,
            &PendingUpload {
                file_id: file_id.to_string(),
                file_name: filename.to_string(),
            },
        )?;
    }

    log::info!("📄 Upload from {}: {} (awaiting options)", user_id, filename);
    deps.transport.send_text(user_id, &ReportOptions::prompt()).await
}

/// Text while the user may owe us an options reply.
///
/// Returns false when no upload is pending, so the caller can treat the text as
/// ordinary chatter.
pub async fn handle_options_reply(deps: &HandlerDeps, user_id: i64, text: &str) -> AppResult<bool> {
    let session = {
        let conn = get_connection(&deps.db_pool)?;
        sessions::get_session(&conn, user_id)?
    };
    let pending = match session.pending {
        Some(pending) if session.awaiting_options => pending,
        _ => return Ok(false),
    };

    let options = match ReportOptions::parse(text) {
        Ok(options) => options,
        Err(e) => {
            log::info!("Options reply from {} not understood: {}", user_id, e);
            deps.transport.send_text(user_id, &texts::options_format_error()).await?;
            return Ok(true);
        }
    };

    // Re-check before spending a download on a rejected request.
    let decision = {
        let conn = get_connection(&deps.db_pool)?;
        quota::precheck(&conn, user_id, Utc::now(), deps.cooldown)?
    };
    if let Decision::Reject(reason) = decision {
        clear_session(deps, user_id)?;
        send_rejection(deps, user_id, &reason).await?;
        return Ok(true);
    }

    let path = scratch_path(&deps.uploads_dir, user_id, Utc::now(), &pending.file_name);
    if let Err(e) = deps.transport.download_file(&pending.file_id, &path).await {
        log::error!("Failed to download {} for user {}: {}", pending.file_id, user_id, e);
        remove_scratch_file(&path).await;
        clear_session(deps, user_id)?;
        deps.transport.send_text(user_id, texts::DOWNLOAD_FAILED).await?;
        return Ok(true);
    }

    let request = AdmissionRequest {
        owner: user_id,
        filename: pending.file_name.clone(),
        file_id: pending.file_id.clone(),
        options,
        file_path: Some(path.to_string_lossy().into_owned()),
    };
    let admitted = get_connection(&deps.db_pool)
        .map_err(Into::into)
        .and_then(|mut conn| {
            let admission = quota::admit(&mut conn, &request, Utc::now(), deps.cooldown)?;
            sessions::clear_session(&conn, user_id)?;
            Ok(admission)
        });

    let admission = match admitted {
        Ok(admission) => admission,
        Err(e) => {
            remove_scratch_file(&path).await;
            return Err(e);
        }
    };

    match admission {
        Admission::Started { submission_id, .. } => {
            // the row is already Processing; only the worker may move it on
            deps.processor.dispatch(submission_id);
            if let Err(e) = deps
                .transport
                .send_text(user_id, &texts::processing_started(&pending.file_name))
                .await
            {
                log::warn!("Failed to send processing notice to {}: {}", user_id, e);
            }
        }
        Admission::Queued { position, .. } => {
            if let Err(e) = deps
                .transport
                .send_text(user_id, &texts::queued(&pending.file_name, position))
                .await
            {
                log::warn!("Failed to send queue notice to {}: {}", user_id, e);
            }
        }
        Admission::Rejected(reason) => {
            remove_scratch_file(&path).await;
            send_rejection(deps, user_id, &reason).await?;
        }
    }
    Ok(true)
}

fn clear_session(deps: &HandlerDeps, user_id: i64) -> AppResult<()> {
    let conn = get_connection(&deps.db_pool)?;
    sessions::clear_session(&conn, user_id)?;
    Ok(())
}

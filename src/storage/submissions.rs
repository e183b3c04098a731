//! Submission ledger
//!
//! Every status change goes through [`transition`], a conditional `UPDATE` whose
//! `WHERE status IN (...)` clause lists the only states the target may be reached
//! from. A row therefore never regresses and never lands in two terminal states,
//! no matter how many tasks race on it.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use strum::{Display, EnumString};

use crate::check::options::ReportOptions;
use crate::storage::{format_timestamp, parse_timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum SubmissionStatus {
    Created,
    Queued,
    Processing,
    Done,
    Failed,
    Cancelled,
}

impl SubmissionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }

    /// States from which `self` may be entered
    pub fn predecessors(self) -> &'static [SubmissionStatus] {
        use SubmissionStatus::*;
        match self {
            Created => &[],
            Queued => &[Created],
            Processing => &[Created, Queued],
            Done => &[Processing],
            Failed => &[Created, Queued, Processing],
            Cancelled => &[Queued, Processing],
        }
    }

    pub fn can_transition_to(self, next: SubmissionStatus) -> bool {
        next.predecessors().contains(&self)
    }
}

impl ToSql for SubmissionStatus {
    fn to_sql(&self) -> Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for SubmissionStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_str()?.parse().map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// Data captured when a submission is admitted
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub owner: i64,
    pub filename: String,
    pub file_id: String,
    pub options: ReportOptions,
    pub is_free_check: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub id: i64,
    pub owner: i64,
    pub filename: String,
    pub file_id: String,
    /// Local copy in the scratch directory, once downloaded
    pub file_path: Option<String>,
    pub status: SubmissionStatus,
    pub options: ReportOptions,
    pub is_free_check: bool,
    pub similarity_score: Option<u8>,
    pub ai_score: Option<u8>,
    pub source: Option<String>,
    pub error: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

const SUBMISSION_COLUMNS: &str = "id, telegram_id, filename, file_id, file_path, status, exclude_bibliography, \
                                  exclude_quotes, exclude_citations, exclude_small_matches, is_free_check, \
                                  similarity_score, ai_score, source, error, created_at, started_at, finished_at";

impl Submission {
    fn from_row(row: &Row<'_>) -> Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner: row.get(1)?,
            filename: row.get(2)?,
            file_id: row.get(3)?,
            file_path: row.get(4)?,
            status: row.get(5)?,
            options: ReportOptions {
                exclude_bibliography: row.get(6)?,
                exclude_quotes: row.get(7)?,
                exclude_citations: row.get(8)?,
                exclude_small_matches: row.get(9)?,
            },
            is_free_check: row.get(10)?,
            similarity_score: row.get(11)?,
            ai_score: row.get(12)?,
            source: row.get(13)?,
            error: row.get(14)?,
            created_at: parse_timestamp(row.get(15)?),
            started_at: parse_timestamp(row.get(16)?),
            finished_at: parse_timestamp(row.get(17)?),
        })
    }
}

fn status_list(statuses: &[SubmissionStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Inserts a row in `Created` and returns its id.
pub fn insert_submission(conn: &Connection, new: &NewSubmission, now: DateTime<Utc>) -> Result<i64> {
    conn.execute(
        "INSERT INTO submissions (telegram_id, filename, file_id, status, exclude_bibliography, exclude_quotes,
                                  exclude_citations, exclude_small_matches, is_free_check, created_at)
         VALUES (?1, ?2, ?3, 'created', ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            new.owner,
            new.filename,
            new.file_id,
            new.options.exclude_bibliography,
            new.options.exclude_quotes,
            new.options.exclude_citations,
            new.options.exclude_small_matches,
            new.is_free_check,
            format_timestamp(now),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn guarded_update(
    conn: &Connection,
    id: i64,
    to: SubmissionStatus,
    error: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let from = to.predecessors();
    if from.is_empty() {
        return Ok(false);
    }

    let sql = format!(
        "UPDATE submissions
         SET status = ?1,
             started_at = CASE WHEN ?1 = 'processing' THEN ?2 ELSE started_at END,
             finished_at = CASE WHEN ?3 THEN ?2 ELSE finished_at END,
             error = COALESCE(?4, error)
         WHERE id = ?5 AND status IN ({})",
        status_list(from)
    );
    let updated = conn.execute(
        &sql,
        params![to, format_timestamp(now), to.is_terminal(), error, id],
    )?;
    Ok(updated == 1)
}

/// Moves a submission to `to` if its current status allows it.
///
/// Returns false when the row is missing or already past the point where `to`
/// is reachable (e.g. `Done` after a cancellation).
pub fn transition(conn: &Connection, id: i64, to: SubmissionStatus, now: DateTime<Utc>) -> Result<bool> {
    guarded_update(conn, id, to, None, now)
}

/// `transition` to `Failed`, keeping the reason for the logs.
pub fn mark_failed(conn: &Connection, id: i64, reason: &str, now: DateTime<Utc>) -> Result<bool> {
    guarded_update(conn, id, SubmissionStatus::Failed, Some(reason), now)
}

pub fn get_submission(conn: &Connection, id: i64) -> Result<Option<Submission>> {
    conn.query_row(
        &format!("SELECT {} FROM submissions WHERE id = ?1", SUBMISSION_COLUMNS),
        [id],
        Submission::from_row,
    )
    .optional()
}

pub fn set_file_path(conn: &Connection, id: i64, path: &str) -> Result<()> {
    conn.execute("UPDATE submissions SET file_path = ?2 WHERE id = ?1", params![id, path])?;
    Ok(())
}

pub fn has_processing(conn: &Connection, owner: i64) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM submissions WHERE telegram_id = ?1 AND status = 'processing')",
        [owner],
        |row| row.get(0),
    )
}

pub fn oldest_queued_for_owner(conn: &Connection, owner: i64) -> Result<Option<Submission>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM submissions WHERE telegram_id = ?1 AND status = 'queued' ORDER BY id LIMIT 1",
            SUBMISSION_COLUMNS
        ),
        [owner],
        Submission::from_row,
    )
    .optional()
}

/// 1-based position of a queued submission among its owner's queued submissions
pub fn queue_position(conn: &Connection, owner: i64, id: i64) -> Result<u32> {
    conn.query_row(
        "SELECT COUNT(*) FROM submissions WHERE telegram_id = ?1 AND status = 'queued' AND id <= ?2",
        params![owner, id],
        |row| row.get(0),
    )
}

/// `Queued` and `Processing` submissions of one owner, oldest first
pub fn active_for_owner(conn: &Connection, owner: i64) -> Result<Vec<Submission>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM submissions WHERE telegram_id = ?1 AND status IN ('queued', 'processing') ORDER BY id",
        SUBMISSION_COLUMNS
    ))?;
    let rows = stmt.query_map([owner], Submission::from_row)?;
    rows.collect()
}

pub fn with_status(conn: &Connection, status: SubmissionStatus) -> Result<Vec<Submission>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM submissions WHERE status = ?1 ORDER BY id",
        SUBMISSION_COLUMNS
    ))?;
    let rows = stmt.query_map([status], Submission::from_row)?;
    rows.collect()
}

/// Stores the scores; only applies while the row is still `Processing`.
pub fn record_scores(conn: &Connection, id: i64, similarity: u8, ai: u8, source: &str) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE submissions SET similarity_score = ?2, ai_score = ?3, source = ?4
         WHERE id = ?1 AND status = 'processing'",
        params![id, similarity, ai, source],
    )?;
    Ok(updated == 1)
}

/// `Processing` rows started before `started_before`
pub fn stuck_processing(conn: &Connection, started_before: DateTime<Utc>) -> Result<Vec<Submission>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM submissions
         WHERE status = 'processing' AND (started_at IS NULL OR started_at < ?1)
         ORDER BY id",
        SUBMISSION_COLUMNS
    ))?;
    let rows = stmt.query_map([format_timestamp(started_before)], Submission::from_row)?;
    rows.collect()
}

pub fn recent_for_owner(conn: &Connection, owner: i64, limit: u32) -> Result<Vec<Submission>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM submissions WHERE telegram_id = ?1 ORDER BY id DESC LIMIT ?2",
        SUBMISSION_COLUMNS
    ))?;
    let rows = stmt.query_map(params![owner, limit], Submission::from_row)?;
    rows.collect()
}

pub fn count_by_status(conn: &Connection) -> Result<Vec<(SubmissionStatus, i64)>> {
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM submissions GROUP BY status ORDER BY status")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

/// Audit trail of scoring attempts
pub fn append_audit(
    conn: &Connection,
    submission_id: i64,
    success: bool,
    source: Option<&str>,
    message: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO scoring_audit (submission_id, success, source, message, created_at)
         VALUES (?1, ?2, ?3, ?4, datetime('now'))",
        params![submission_id, success, source, message],
    )?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub submission_id: i64,
    pub success: bool,
    pub source: Option<String>,
    pub message: Option<String>,
}

pub fn audit_for_submission(conn: &Connection, submission_id: i64) -> Result<Vec<AuditEntry>> {
    let mut stmt = conn.prepare(
        "SELECT submission_id, success, source, message FROM scoring_audit WHERE submission_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map([submission_id], |row| {
        Ok(AuditEntry {
            submission_id: row.get(0)?,
            success: row.get(1)?,
            source: row.get(2)?,
            message: row.get(3)?,
        })
    })?;
    rows.collect()
}

use rusqlite::{params, Connection, OptionalExtension, Result};

/// Upload waiting for its report options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpload {
    /// Telegram file id; the file is downloaded only after admission
    pub file_id: String,
    pub file_name: String,
}

/// Per-user workflow state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub awaiting_options: bool,
    pub pending: Option<PendingUpload>,
}

/// Missing rows read as an idle session.
pub fn get_session(conn: &Connection, telegram_id: i64) -> Result<Session> {
    let row = conn
        .query_row(
            "SELECT awaiting_options, pending_file_id, pending_file_name FROM sessions WHERE telegram_id = ?1",
            [telegram_id],
            |row| {
                Ok((
                    row.get::<_, bool>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            },
        )
        .optional()?;

    Ok(match row {
        Some((awaiting_options, Some(file_id), Some(file_name))) => Session {
            awaiting_options,
            pending: Some(PendingUpload { file_id, file_name }),
        },
        Some((awaiting_options, _, _)) => Session {
            awaiting_options,
            pending: None,
        },
        None => Session::default(),
    })
}

/// Stores the upload and starts waiting for options. A newer upload replaces the older one.
pub fn set_pending_upload(conn: &Connection, telegram_id: i64, upload: &PendingUpload) -> Result<()> {
    conn.execute(
        "INSERT INTO sessions (telegram_id, awaiting_options, pending_file_id, pending_file_name, updated_at)
         VALUES (?1, 1, ?2, ?3, datetime('now'))
         ON CONFLICT(telegram_id) DO UPDATE SET
            awaiting_options = 1,
            pending_file_id = excluded.pending_file_id,
            pending_file_name = excluded.pending_file_name,
            updated_at = excluded.updated_at",
        params![telegram_id, upload.file_id, upload.file_name],
    )?;
    Ok(())
}

/// Returns whether there was a pending upload to drop.
pub fn clear_session(conn: &Connection, telegram_id: i64) -> Result<bool> {
    let cleared = conn.execute(
        "UPDATE sessions
         SET awaiting_options = 0, pending_file_id = NULL, pending_file_name = NULL, updated_at = datetime('now')
         WHERE telegram_id = ?1 AND (awaiting_options = 1 OR pending_file_id IS NOT NULL)",
        [telegram_id],
    )?;
    Ok(cleared > 0)
}

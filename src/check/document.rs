use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::core::config::validation::{ALLOWED_EXTENSIONS, MAX_FILENAME_LEN};

/// `.pdf` or `.docx`, case-insensitive
pub fn is_allowed_filename(filename: &str) -> bool {
    let lower = filename.trim().to_ascii_lowercase();
    ALLOWED_EXTENSIONS
        .iter()
        .any(|ext| lower.len() > ext.len() && lower.ends_with(ext))
}

/// Keeps letters, digits, `.`, `-` and `_`; everything else becomes `_`.
pub fn sanitize_filename(filename: &str) -> String {
    let base = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document");

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.len() <= MAX_FILENAME_LEN {
        return cleaned.to_string();
    }
    // Keep the extension when truncating
    match cleaned.rfind('.') {
        Some(dot) if cleaned.len() - dot < MAX_FILENAME_LEN => {
            let ext = &cleaned[dot..];
            format!("{}{}", &cleaned[..MAX_FILENAME_LEN - ext.len()], ext)
        }
        _ => cleaned[..MAX_FILENAME_LEN].to_string(),
    }
}

/// `{dir}/{user_id}_{unix_ts}_{filename}`
pub fn scratch_path(dir: &Path, user_id: i64, now: DateTime<Utc>, filename: &str) -> PathBuf {
    dir.join(format!(
        "{}_{}_{}",
        user_id,
        now.timestamp(),
        sanitize_filename(filename)
    ))
}

/// Best-effort removal; a missing file is not an error.
pub async fn remove_scratch_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => log::debug!("🧹 Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove {}: {}", path.display(), e),
    }
}

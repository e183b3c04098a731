//! Test doubles for the chat transport
//!
//! [`RecordingTransport`] records every outbound call instead of talking to
//! Telegram, so handler and processor flows can be asserted end to end.
//!
//! ```no_run
//! use turnitq::testing::RecordingTransport;
//!
//! let transport = RecordingTransport::new();
//! // hand `Arc::new(transport)` to handlers, then inspect `transport.sent()`
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::core::error::{AppError, AppResult};
use crate::telegram::transport::{Button, ChatTransport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMessage {
    Text {
        chat_id: i64,
        text: String,
    },
    Buttons {
        chat_id: i64,
        text: String,
        buttons: Vec<Vec<Button>>,
    },
    Document {
        chat_id: i64,
        file_name: String,
        caption: String,
    },
}

impl SentMessage {
    pub fn chat_id(&self) -> i64 {
        match self {
            SentMessage::Text { chat_id, .. }
            | SentMessage::Buttons { chat_id, .. }
            | SentMessage::Document { chat_id, .. } => *chat_id,
        }
    }
}

/// Records outbound calls; downloads write canned contents.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<SentMessage>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    downloads: Mutex<Vec<PathBuf>>,
    refused_prefix: Option<String>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the bytes returned for a file id. Unknown ids fail to download.
    pub fn with_file(self, file_id: &str, contents: &[u8]) -> Self {
        self.lock_files().insert(file_id.to_string(), contents.to_vec());
        self
    }

    /// Makes `send_text` fail for texts starting with `prefix`; nothing is recorded for them.
    pub fn refusing_texts_starting_with(mut self, prefix: &str) -> Self {
        self.refused_prefix = Some(prefix.to_string());
        self
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.lock_sent().clone()
    }

    /// Plain texts and button captions sent to one chat, in order
    pub fn texts_to(&self, chat_id: i64) -> Vec<String> {
        self.lock_sent()
            .iter()
            .filter(|m| m.chat_id() == chat_id)
            .filter_map(|m| match m {
                SentMessage::Text { text, .. } | SentMessage::Buttons { text, .. } => Some(text.clone()),
                SentMessage::Document { .. } => None,
            })
            .collect()
    }

    pub fn last_text_to(&self, chat_id: i64) -> Option<String> {
        self.texts_to(chat_id).pop()
    }

    pub fn downloads(&self) -> Vec<PathBuf> {
        match self.downloads.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn clear(&self) {
        self.lock_sent().clear();
    }

    fn lock_sent(&self) -> std::sync::MutexGuard<'_, Vec<SentMessage>> {
        match self.sent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_files(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        match self.files.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_text(&self, chat_id: i64, text: &str) -> AppResult<()> {
        if let Some(prefix) = &self.refused_prefix {
            if text.starts_with(prefix.as_str()) {
                return Err(AppError::Validation(format!("chat {} refused the message", chat_id)));
            }
        }
        self.lock_sent().push(SentMessage::Text {
            chat_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_with_buttons(&self, chat_id: i64, text: &str, buttons: Vec<Vec<Button>>) -> AppResult<()> {
        self.lock_sent().push(SentMessage::Buttons {
            chat_id,
            text: text.to_string(),
            buttons,
        });
        Ok(())
    }

    async fn send_document(&self, chat_id: i64, path: &Path, caption: &str) -> AppResult<()> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.lock_sent().push(SentMessage::Document {
            chat_id,
            file_name,
            caption: caption.to_string(),
        });
        Ok(())
    }

    async fn download_file(&self, file_id: &str, dest: &Path) -> AppResult<()> {
        let contents = self
            .lock_files()
            .get(file_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("file {}", file_id)))?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, contents).await?;
        match self.downloads.lock() {
            Ok(mut guard) => guard.push(dest.to_path_buf()),
            Err(poisoned) => poisoned.into_inner().push(dest.to_path_buf()),
        }
        Ok(())
    }
}

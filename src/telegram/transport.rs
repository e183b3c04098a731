//! Outbound chat operations behind a trait, so handlers and the processor can be
//! driven by a recording transport in tests.

use async_trait::async_trait;
use std::path::Path;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{FileId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile};
use url::Url;

use crate::core::error::AppResult;
use crate::telegram::Bot;

/// Inline button
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Button {
    Callback { text: String, data: String },
    Link { text: String, url: Url },
}

impl Button {
    pub fn callback(text: impl Into<String>, data: impl Into<String>) -> Self {
        Button::Callback {
            text: text.into(),
            data: data.into(),
        }
    }

    pub fn link(text: impl Into<String>, url: Url) -> Self {
        Button::Link { text: text.into(), url }
    }

    fn to_inline(&self) -> InlineKeyboardButton {
        match self {
            Button::Callback { text, data } => InlineKeyboardButton::callback(text.clone(), data.clone()),
            Button::Link { text, url } => InlineKeyboardButton::url(text.clone(), url.clone()),
        }
    }
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> AppResult<()>;

    /// Text with a grid of inline buttons (one inner Vec per row)
    async fn send_with_buttons(&self, chat_id: i64, text: &str, buttons: Vec<Vec<Button>>) -> AppResult<()>;

    async fn send_document(&self, chat_id: i64, path: &Path, caption: &str) -> AppResult<()>;

    /// Fetches a file by its Telegram file id and writes it to `dest`
    async fn download_file(&self, file_id: &str, dest: &Path) -> AppResult<()>;
}

/// [`ChatTransport`] over the Telegram Bot API
#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_text(&self, chat_id: i64, text: &str) -> AppResult<()> {
        self.bot.send_message(ChatId(chat_id), text).await?;
        Ok(())
    }

    async fn send_with_buttons(&self, chat_id: i64, text: &str, buttons: Vec<Vec<Button>>) -> AppResult<()> {
        let rows: Vec<Vec<InlineKeyboardButton>> = buttons
            .iter()
            .map(|row| row.iter().map(Button::to_inline).collect())
            .collect();
        self.bot
            .send_message(ChatId(chat_id), text)
            .reply_markup(InlineKeyboardMarkup::new(rows))
            .await?;
        Ok(())
    }

    async fn send_document(&self, chat_id: i64, path: &Path, caption: &str) -> AppResult<()> {
        self.bot
            .send_document(ChatId(chat_id), InputFile::file(path.to_path_buf()))
            .caption(caption)
            .await?;
        Ok(())
    }

    async fn download_file(&self, file_id: &str, dest: &Path) -> AppResult<()> {
        let file = self.bot.get_file(FileId(file_id.to_string())).await?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut out = tokio::fs::File::create(dest).await?;
        self.bot.download_file(&file.path, &mut out).await?;
        log::info!("📥 Downloaded {} to {}", file_id, dest.display());
        Ok(())
    }
}

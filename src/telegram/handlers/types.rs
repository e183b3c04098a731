//! Handler types, dependencies, and shared reply helpers

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::billing::BillingProvider;
use crate::check::processor::SubmissionProcessor;
use crate::core::config;
use crate::core::error::AppResult;
use crate::core::quota::Rejection;
use crate::storage::DbPool;
use crate::telegram::keyboards;
use crate::telegram::texts;
use crate::telegram::transport::ChatTransport;

/// Error type for handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Dependencies required by handlers
#[derive(Clone)]
pub struct HandlerDeps {
    pub db_pool: Arc<DbPool>,
    pub transport: Arc<dyn ChatTransport>,
    pub processor: SubmissionProcessor,
    /// `None` when no payment provider is configured
    pub billing: Option<Arc<dyn BillingProvider>>,
    pub uploads_dir: PathBuf,
    pub cooldown: Duration,
}

impl HandlerDeps {
    /// Create new handler dependencies with the configured scratch directory and cooldown
    pub fn new(
        db_pool: Arc<DbPool>,
        transport: Arc<dyn ChatTransport>,
        processor: SubmissionProcessor,
        billing: Option<Arc<dyn BillingProvider>>,
    ) -> Self {
        Self {
            db_pool,
            transport,
            processor,
            billing,
            uploads_dir: PathBuf::from(config::UPLOADS_DIR.as_str()),
            cooldown: config::quota::cooldown(),
        }
    }
}

/// Sends the rejection text; quota rejections come with the plan buttons.
pub(super) async fn send_rejection(deps: &HandlerDeps, chat_id: i64, reason: &Rejection) -> AppResult<()> {
    let text = texts::rejection(reason);
    match reason {
        Rejection::FreeCheckUsed | Rejection::DailyLimitReached { .. } => {
            deps.transport
                .send_with_buttons(chat_id, &text, keyboards::plan_buttons())
                .await
        }
        Rejection::CooldownActive { .. } | Rejection::SystemAtCapacity => deps.transport.send_text(chat_id, &text).await,
    }
}

/// Logs a handler failure and tells the user something went wrong, without details.
pub(super) async fn report_failure(deps: &HandlerDeps, chat_id: i64, what: &str, result: AppResult<()>) {
    if let Err(e) = result {
        log::error!("❌ {} failed for chat {}: {}", what, chat_id, e);
        if let Err(send_err) = deps.transport.send_text(chat_id, texts::GENERIC_ERROR).await {
            log::warn!("Failed to send error notice to {}: {}", chat_id, send_err);
        }
    }
}

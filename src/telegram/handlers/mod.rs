//! Telegram bot handler tree configuration
//!
//! The dispatcher schema routes updates to plain async handlers over
//! [`HandlerDeps`]; integration tests call those handlers directly.

mod callbacks;
mod commands;
mod documents;
mod schema;
mod types;

pub use callbacks::handle_callback;
pub use commands::{handle_cancel, handle_check, handle_id, handle_start, handle_upgrade};
pub use documents::{handle_document, handle_options_reply};
pub use schema::schema;
pub use types::{HandlerDeps, HandlerError};

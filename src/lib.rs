//! TurnitQ - Telegram bot issuing similarity and AI-writing reports
//!
//! Users upload a `.pdf` or `.docx`, pick four report options and get the
//! reports back in chat. Checks are gated by a daily quota, a one-time free
//! check, a cooldown and a global daily ceiling; paid plans are bought through
//! Paystack.
//!
//! # Module Structure
//!
//! - `core`: configuration, errors, logging, metrics, quota engine, plans, housekeeping, web server
//! - `storage`: SQLite store (accounts, sessions, submissions, payments, counters)
//! - `check`: document validation, report options, scoring providers, reports, processor
//! - `billing`: checkout creation and payment confirmation
//! - `telegram`: chat transport, bot commands and handlers
//! - `testing`: recording chat transport for tests

pub mod billing;
pub mod check;
pub mod cli;
pub mod core;
pub mod storage;
pub mod telegram;
pub mod testing;

// Re-export commonly used types for convenience
pub use core::{config, AppError, AppResult};
pub use storage::{create_pool, get_connection, DbConnection, DbPool};

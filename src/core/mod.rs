//! Core utilities, configuration, and the quota, subscription and housekeeping logic

pub mod config;
pub mod error;
pub mod housekeeping;
pub mod logging;
pub mod metrics;
pub mod quota;
pub mod subscription;
pub mod web_server;

// Re-exports for convenience
pub use error::{AppError, AppResult};
pub use logging::{init_logger, log_startup_configuration};

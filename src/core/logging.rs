//! Logging initialization and startup diagnostics

use anyhow::Result;
use secrecy::ExposeSecret;
use simplelog::*;
use std::fs::OpenOptions;

use crate::core::config;
use crate::core::subscription::{Plan, PlanSpec};

/// Initialize logger for both console and file output
///
/// The file is opened in append mode so restarts keep the history.
pub fn init_logger(log_file_path: &str) -> Result<()> {
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path)
        .map_err(|e| anyhow::anyhow!("Failed to open log file: {}", e))?;

    CombinedLogger::init(vec![
        TermLogger::new(
            LevelFilter::Info,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(LevelFilter::Info, Config::default(), log_file),
    ])
    .map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

    Ok(())
}

fn secret_state(secret: &Option<secrecy::SecretString>) -> &'static str {
    match secret {
        Some(s) if !s.expose_secret().is_empty() => "set",
        _ => "NOT SET",
    }
}

/// Logs the effective configuration at startup. Secrets are reported as set/unset only.
pub fn log_startup_configuration() {
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("⚙️  TurnitQ Configuration");
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("Database:        {}", *config::DATABASE_PATH);
    log::info!("Uploads dir:     {}", *config::UPLOADS_DIR);
    log::info!("Web port:        {}", *config::WEB_PORT);
    match config::PUBLIC_BASE_URL.as_deref() {
        Some(base) => log::info!("Public base URL: {}", base),
        None => log::warn!("⚠️  PUBLIC_BASE_URL not set: payment callbacks and webhook mode are unavailable"),
    }

    log::info!(
        "Quota:           cooldown={}s, global_daily_max={}",
        *config::quota::COOLDOWN_SECONDS,
        *config::quota::GLOBAL_DAILY_MAX
    );
    for plan in [Plan::Free, Plan::Tier1, Plan::Tier2, Plan::Tier3] {
        let spec = PlanSpec::for_plan(plan);
        log::info!(
            "Plan {:<6} ({:<7}) daily_limit={}, price={} {}, days={}",
            plan,
            spec.name,
            spec.daily_limit,
            spec.price,
            *config::payment::CURRENCY,
            spec.duration_days
        );
    }

    log::info!(
        "Processing:      workers={}, timeout={}s, stuck_after={}min",
        *config::processing::MAX_CONCURRENT_CHECKS,
        *config::processing::TIMEOUT_SECS,
        *config::processing::STUCK_AFTER_MINUTES
    );
    match config::vendor::API_URL.as_deref() {
        Some(url) => log::info!("✅ Vendor scorer: {} (timeout {}s)", url, *config::vendor::TIMEOUT_SECS),
        None => log::info!("Vendor scorer:   disabled, local scorer only"),
    }

    log::info!(
        "Paystack:        secret={}, api={}",
        secret_state(&config::payment::PAYSTACK_SECRET_KEY),
        *config::payment::PAYSTACK_API_URL
    );
    if config::payment::PAYSTACK_SECRET_KEY.is_none() {
        log::warn!("⚠️  PAYSTACK_SECRET_KEY not set: upgrades and payment callbacks will be refused");
    }

    log::info!(
        "Housekeeping:    daily reset at {:02}:00 local, expiry sweep every {}s",
        *config::housekeeping::DAILY_RESET_HOUR,
        *config::housekeeping::EXPIRY_SWEEP_INTERVAL_SECS
    );
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

use once_cell::sync::Lazy;
use secrecy::SecretString;
use std::env;
use std::time::Duration;

/// Reads a numeric variable, falling back to `default` when unset or unparsable.
fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name).ok().and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

/// Reads an optional string variable; empty values count as unset.
fn env_non_empty(name: &str) -> Option<String> {
    env::var(name).ok().and_then(|s| {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Bot token
/// Read from BOT_TOKEN or TELOXIDE_TOKEN environment variable
pub static BOT_TOKEN: Lazy<String> = Lazy::new(|| {
    env::var("BOT_TOKEN")
        .or_else(|_| env::var("TELOXIDE_TOKEN"))
        .unwrap_or_else(|_| String::new())
});

/// Database file path
/// Read from DATABASE_PATH environment variable
/// Default: turnitq.db
pub static DATABASE_PATH: Lazy<String> =
    Lazy::new(|| env::var("DATABASE_PATH").unwrap_or_else(|_| "turnitq.db".to_string()));

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: turnitq.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "turnitq.log".to_string()));

/// Scratch directory for uploaded documents and rendered reports
/// Read from UPLOADS_DIR environment variable
/// Default: uploads
pub static UPLOADS_DIR: Lazy<String> = Lazy::new(|| env::var("UPLOADS_DIR").unwrap_or_else(|_| "uploads".to_string()));

/// Externally reachable base URL (no trailing slash)
/// Used to build the billing callback, the payment return page and the Telegram webhook URL
pub static PUBLIC_BASE_URL: Lazy<Option<String>> =
    Lazy::new(|| env_non_empty("PUBLIC_BASE_URL").map(|s| s.trim_end_matches('/').to_string()));

/// Port of the HTTP listener (billing callback, health, metrics, webhook)
/// Default: 8080
pub static WEB_PORT: Lazy<u16> = Lazy::new(|| env_parse("WEB_PORT", 8080));

/// Builds an absolute URL under PUBLIC_BASE_URL
pub fn public_url(path: &str) -> Option<String> {
    PUBLIC_BASE_URL.as_ref().map(|base| format!("{}{}", base, path))
}

/// Quota and admission configuration
pub mod quota {
    use super::{env_parse, Duration, Lazy};

    /// Minimum spacing between two submissions of the same user (seconds)
    /// Read from CHECK_COOLDOWN_SECONDS, default 60
    pub static COOLDOWN_SECONDS: Lazy<u64> = Lazy::new(|| env_parse("CHECK_COOLDOWN_SECONDS", 60));

    /// System-wide ceiling of admitted submissions per day
    /// Read from GLOBAL_DAILY_MAX, default 500
    pub static GLOBAL_DAILY_MAX: Lazy<u32> = Lazy::new(|| env_parse("GLOBAL_DAILY_MAX", 500));

    /// Cooldown window duration
    pub fn cooldown() -> Duration {
        Duration::from_secs(*COOLDOWN_SECONDS)
    }
}

/// Plan table: daily limit, price (major currency units) and duration per tier
pub mod plans {
    use super::{env_parse, Lazy};

    pub static FREE_DAILY_LIMIT: Lazy<u32> = Lazy::new(|| env_parse("FREE_DAILY_LIMIT", 1));

    pub static TIER1_DAILY_LIMIT: Lazy<u32> = Lazy::new(|| env_parse("TIER1_DAILY_LIMIT", 3));
    pub static TIER1_PRICE: Lazy<u32> = Lazy::new(|| env_parse("TIER1_PRICE", 3000));
    pub static TIER1_DURATION_DAYS: Lazy<i64> = Lazy::new(|| env_parse("TIER1_DURATION_DAYS", 30));

    pub static TIER2_DAILY_LIMIT: Lazy<u32> = Lazy::new(|| env_parse("TIER2_DAILY_LIMIT", 10));
    pub static TIER2_PRICE: Lazy<u32> = Lazy::new(|| env_parse("TIER2_PRICE", 8000));
    pub static TIER2_DURATION_DAYS: Lazy<i64> = Lazy::new(|| env_parse("TIER2_DURATION_DAYS", 30));

    pub static TIER3_DAILY_LIMIT: Lazy<u32> = Lazy::new(|| env_parse("TIER3_DAILY_LIMIT", 25));
    pub static TIER3_PRICE: Lazy<u32> = Lazy::new(|| env_parse("TIER3_PRICE", 15000));
    pub static TIER3_DURATION_DAYS: Lazy<i64> = Lazy::new(|| env_parse("TIER3_DURATION_DAYS", 30));
}

/// Payment provider configuration
pub mod payment {
    use super::{env, env_non_empty, Lazy, SecretString};

    /// Paystack secret key; also the HMAC key of webhook signatures
    /// Read from PAYSTACK_SECRET_KEY
    pub static PAYSTACK_SECRET_KEY: Lazy<Option<SecretString>> =
        Lazy::new(|| env_non_empty("PAYSTACK_SECRET_KEY").map(SecretString::from));

    /// Paystack API base URL
    /// Default: https://api.paystack.co
    pub static PAYSTACK_API_URL: Lazy<String> =
        Lazy::new(|| env::var("PAYSTACK_API_URL").unwrap_or_else(|_| "https://api.paystack.co".to_string()));

    /// Currency code of all charges
    /// Default: NGN
    pub static CURRENCY: Lazy<String> =
        Lazy::new(|| env::var("PAYMENT_CURRENCY").unwrap_or_else(|_| "NGN".to_string()).to_uppercase());

    /// Minor units per major unit (kobo per naira, cents per dollar)
    pub const MINOR_UNITS: i64 = 100;
}

/// Submission processing configuration
pub mod processing {
    use super::{env_parse, Duration, Lazy};

    /// Worker-pool width
    pub static MAX_CONCURRENT_CHECKS: Lazy<usize> = Lazy::new(|| env_parse::<usize>("MAX_CONCURRENT_CHECKS", 2).max(1));

    /// Upper bound for one submission from start to terminal state (seconds)
    pub static TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| env_parse("PROCESSING_TIMEOUT_SECS", 600));

    /// Processing rows older than this are reaped by housekeeping (minutes)
    pub static STUCK_AFTER_MINUTES: Lazy<i64> = Lazy::new(|| env_parse("STUCK_SUBMISSION_MINUTES", 30));

    pub fn timeout() -> Duration {
        Duration::from_secs(*TIMEOUT_SECS)
    }

    pub fn stuck_after() -> chrono::Duration {
        chrono::Duration::minutes(*STUCK_AFTER_MINUTES)
    }
}

/// Best-effort external plagiarism vendor
pub mod vendor {
    use super::{env_non_empty, env_parse, Duration, Lazy, SecretString};

    /// Vendor endpoint accepting a multipart upload; unset disables the primary scorer
    pub static API_URL: Lazy<Option<String>> = Lazy::new(|| env_non_empty("VENDOR_API_URL"));

    pub static API_KEY: Lazy<Option<SecretString>> = Lazy::new(|| env_non_empty("VENDOR_API_KEY").map(SecretString::from));

    /// Default: 60 seconds
    pub static TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| env_parse("VENDOR_TIMEOUT_SECS", 60));

    pub fn timeout() -> Duration {
        Duration::from_secs(*TIMEOUT_SECS)
    }
}

/// Scheduled jobs
pub mod housekeeping {
    use super::{env_parse, Duration, Lazy};

    /// Local hour (0-23) of the daily counter reset
    pub static DAILY_RESET_HOUR: Lazy<u32> = Lazy::new(|| env_parse::<u32>("DAILY_RESET_HOUR", 0).min(23));

    /// Interval of the subscription expiry sweep (seconds)
    pub static EXPIRY_SWEEP_INTERVAL_SECS: Lazy<u64> =
        Lazy::new(|| env_parse::<u64>("EXPIRY_SWEEP_INTERVAL_SECS", 3600).max(60));

    /// Interval of the stuck-submission reaper (seconds)
    pub const STUCK_REAPER_INTERVAL_SECS: u64 = 300;

    pub fn expiry_sweep_interval() -> Duration {
        Duration::from_secs(*EXPIRY_SWEEP_INTERVAL_SECS)
    }

    pub fn stuck_reaper_interval() -> Duration {
        Duration::from_secs(STUCK_REAPER_INTERVAL_SECS)
    }
}

/// Network configuration
pub mod network {
    use super::Duration;

    /// Request timeout for Telegram API calls (seconds); uploads of reports are small
    pub const REQUEST_TIMEOUT_SECS: u64 = 120;

    pub fn timeout() -> Duration {
        Duration::from_secs(REQUEST_TIMEOUT_SECS)
    }
}

/// Validation configuration
pub mod validation {
    /// File extensions accepted for checking
    pub const ALLOWED_EXTENSIONS: [&str; 2] = [".pdf", ".docx"];

    /// Longest file name kept when building scratch paths
    pub const MAX_FILENAME_LEN: usize = 120;
}

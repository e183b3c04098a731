//! User-facing messages

use crate::check::options::FORMAT_HINT;
use crate::core::config;
use crate::core::quota::Rejection;
use crate::core::subscription::{Plan, PlanSpec};
use crate::storage::accounts::Account;

pub const WELCOME: &str = "👋 Welcome to TurnitQ!\n\n\
    Send /check to get a similarity and AI-writing report for your document.\n\
    Your first check is free.";

pub const CHECK_PROMPT: &str = "📄 Send your document as a .pdf or .docx file.";

pub const UNSUPPORTED_FILE: &str = "⚠️ Only .pdf and .docx files are supported.";

pub const DOWNLOAD_FAILED: &str = "⚠️ We couldn't fetch your file. Please send it again.";

pub const GENERIC_ERROR: &str = "⚠️ Something went wrong. Please try again later.";

pub const CHECK_FAILED: &str = "⚠️ We couldn't finish checking your document. Please try again later.";

pub const NOTHING_TO_CANCEL: &str = "There is nothing to cancel.";

pub const PAYMENTS_UNAVAILABLE: &str = "⚠️ Payments are not available right now. Please try again later.";

pub const UPGRADE_PROMPT: &str = "⭐ Enjoyed your free check? Upgrade for more daily checks and the full AI report.";

pub const RENEWAL_NOTICE: &str = "⌛ Your TurnitQ subscription has expired and you're back on the Free plan.\n\
    Renew any time with /upgrade.";

pub fn options_format_error() -> String {
    format!("⚠️ Please reply with four answers, for example: {}", FORMAT_HINT)
}

pub fn rejection(reason: &Rejection) -> String {
    match reason {
        Rejection::FreeCheckUsed => {
            "You've already used your free check. Upgrade with /upgrade to keep checking.".to_string()
        }
        Rejection::DailyLimitReached { limit } => format!(
            "You've reached your daily limit of {} check(s). Your quota resets tomorrow, or /upgrade for more.",
            limit
        ),
        Rejection::CooldownActive { remaining_secs } => {
            format!("⏳ Please wait {} seconds before your next check.", remaining_secs)
        }
        Rejection::SystemAtCapacity => {
            "🚦 TurnitQ has reached today's capacity. Please try again tomorrow.".to_string()
        }
    }
}

pub fn processing_started(filename: &str) -> String {
    format!("🔍 Checking {}... your report will arrive shortly.", filename)
}

pub fn queued(filename: &str, position: u32) -> String {
    format!(
        "🕒 Your assignment {} is queued (position {}). It starts as soon as your current check finishes.",
        filename, position
    )
}

pub fn report_caption(filename: &str, similarity: u8) -> String {
    format!("📊 Similarity report for {}: {}%", filename, similarity)
}

pub fn ai_caption(filename: &str, ai: u8) -> String {
    format!("🤖 AI-writing report for {}: {}%", filename, ai)
}

pub fn cancelled(count: usize) -> String {
    format!("❌ Cancelled {} check(s).", count)
}

pub fn pending_upload_dropped() -> String {
    "❌ Your pending upload was discarded.".to_string()
}

pub fn account_summary(account: &Account) -> String {
    let spec = PlanSpec::for_plan(account.plan);
    let mut text = format!(
        "🆔 User ID: {}\n📦 Plan: {}\n📈 Used today: {}/{}",
        account.telegram_id, spec.name, account.used_today, account.daily_limit
    );
    if let Some(expiry) = account.expiry {
        text.push_str(&format!("\n📅 Expires: {}", expiry.format("%Y-%m-%d %H:%M UTC")));
    }
    if account.plan == Plan::Free {
        let status = if account.free_check_used { "used" } else { "available" };
        text.push_str(&format!("\n🎁 Free check: {}", status));
    }
    text
}

pub fn plan_line(spec: &PlanSpec) -> String {
    format!(
        "{}: {} checks/day, {} {} for {} days",
        spec.name,
        spec.daily_limit,
        spec.price,
        *config::payment::CURRENCY,
        spec.duration_days
    )
}

pub fn plan_details() -> String {
    let mut text = String::from("💼 TurnitQ plans\n\n");
    text.push_str("Free: one lifetime check with both reports\n");
    for plan in Plan::paid() {
        text.push_str(&format!("{}\n", plan_line(&PlanSpec::for_plan(plan))));
    }
    text.push_str("\nPaid plans include the AI-writing report with every check.");
    text
}

pub fn checkout_ready(spec: &PlanSpec) -> String {
    format!("💳 Tap below to pay for {}. Your plan activates as soon as payment is confirmed.", spec.name)
}

pub fn subscription_activated(account: &Account) -> String {
    let spec = PlanSpec::for_plan(account.plan);
    let mut text = format!(
        "🎉 Payment received! You're on {} with {} checks per day.",
        spec.name, account.daily_limit
    );
    if let Some(expiry) = account.expiry {
        text.push_str(&format!("\nValid until {}.", expiry.format("%Y-%m-%d")));
    }
    text
}

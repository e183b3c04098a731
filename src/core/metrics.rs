//! Prometheus metrics
//!
//! - Admissions by outcome (started, queued, or the rejection reason)
//! - Finished submissions by terminal status
//! - Which scoring path produced each result
//! - Payment callbacks by result
//! - Housekeeping runs by job and result

#![allow(clippy::expect_used)]

use once_cell::sync::Lazy;
use prometheus::{register_counter_vec, CounterVec, Encoder, TextEncoder};

/// Admission attempts
/// Labels: outcome (started/queued/free_check_used/daily_limit/cooldown/capacity)
pub static ADMISSIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "turnitq_admissions_total",
        "Admission decisions by outcome",
        &["outcome"]
    )
    .expect("register turnitq_admissions_total")
});

/// Submissions reaching a terminal state
/// Labels: status (done/failed/cancelled)
pub static SUBMISSIONS_FINISHED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "turnitq_submissions_finished_total",
        "Submissions that reached a terminal state",
        &["status"]
    )
    .expect("register turnitq_submissions_finished_total")
});

/// Labels: source (vendor/local)
pub static SCORING_SOURCE_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "turnitq_scoring_source_total",
        "Scoring results by the provider that produced them",
        &["source"]
    )
    .expect("register turnitq_scoring_source_total")
});

/// Labels: result (activated/duplicate/amount_mismatch/unattributed/ignored/bad_signature)
pub static PAYMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "turnitq_payments_total",
        "Payment provider callbacks by result",
        &["result"]
    )
    .expect("register turnitq_payments_total")
});

/// Labels: job (daily_reset/expiry_sweep/stuck_reaper), result (ok/error/skipped)
pub static HOUSEKEEPING_RUNS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "turnitq_housekeeping_runs_total",
        "Scheduled housekeeping runs",
        &["job", "result"]
    )
    .expect("register turnitq_housekeeping_runs_total")
});

/// Registers every metric so /metrics lists them before the first event
pub fn init_metrics() {
    log::info!("Initializing metrics registry...");

    for outcome in ["started", "queued"] {
        ADMISSIONS_TOTAL.with_label_values(&[outcome]);
    }
    for status in ["done", "failed", "cancelled"] {
        SUBMISSIONS_FINISHED_TOTAL.with_label_values(&[status]);
    }
    for source in ["vendor", "local"] {
        SCORING_SOURCE_TOTAL.with_label_values(&[source]);
    }
    PAYMENTS_TOTAL.with_label_values(&["activated"]);
    for job in ["daily_reset", "expiry_sweep", "stuck_reaper"] {
        HOUSEKEEPING_RUNS_TOTAL.with_label_values(&[job, "ok"]);
    }
}

pub fn record_finished(status: &str) {
    SUBMISSIONS_FINISHED_TOTAL.with_label_values(&[status]).inc();
}

pub fn record_scoring_source(source: &str) {
    SCORING_SOURCE_TOTAL.with_label_values(&[source]).inc();
}

pub fn record_payment(result: &str) {
    PAYMENTS_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_housekeeping(job: &str, result: &str) {
    HOUSEKEEPING_RUNS_TOTAL.with_label_values(&[job, result]).inc();
}

/// Text exposition of the default registry
pub fn render() -> Result<(String, String), prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok((
        encoder.format_type().to_string(),
        String::from_utf8_lossy(&buffer).into_owned(),
    ))
}

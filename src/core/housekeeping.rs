//! Scheduled jobs: daily counter reset, subscription expiry sweep, stuck-submission reaper
//!
//! All jobs are idempotent. They share one guard so two never run at the same
//! time. The sweep and the reaper skip a tick when the guard is taken; the daily
//! reset waits for it.

use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::check::processor::SubmissionProcessor;
use crate::core::config;
use crate::core::error::AppResult;
use crate::core::metrics;
use crate::storage::submissions::{self, Submission};
use crate::storage::{accounts, get_connection, meta, DbPool};
use crate::telegram::texts;
use crate::telegram::transport::ChatTransport;

/// Zeroes every account's `used_today` and the global counter in one transaction.
/// Returns the number of accounts that had usage.
pub fn reset_daily_counters(conn: &mut Connection) -> AppResult<usize> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let accounts_reset = accounts::reset_daily_usage(&tx)?;
    meta::reset_global_used(&tx)?;
    tx.commit()?;
    Ok(accounts_reset)
}

/// Downgrades every active subscription whose expiry has passed. Returns the affected account ids.
pub fn expire_subscriptions(conn: &mut Connection, now: DateTime<Utc>) -> AppResult<Vec<i64>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut expired = Vec::new();
    for account in accounts::expired_subscriptions(&tx, now)? {
        if accounts::downgrade_to_free(&tx, account.telegram_id)? {
            log::info!(
                "⌛ Subscription expired: user={}, plan={}, expiry={:?}",
                account.telegram_id,
                account.plan,
                account.expiry
            );
            expired.push(account.telegram_id);
        }
    }
    tx.commit()?;
    Ok(expired)
}

/// Forces `Processing` rows started more than `max_age` ago to `Failed`.
pub fn reap_stuck_submissions(
    conn: &Connection,
    now: DateTime<Utc>,
    max_age: ChronoDuration,
) -> AppResult<Vec<Submission>> {
    let mut reaped = Vec::new();
    for submission in submissions::stuck_processing(conn, now - max_age)? {
        if submissions::mark_failed(conn, submission.id, "stuck in processing", now)? {
            log::warn!(
                "🧟 Reaped stuck submission {} for user {} (started {:?})",
                submission.id,
                submission.owner,
                submission.started_at
            );
            reaped.push(submission);
        }
    }
    Ok(reaped)
}

/// Time from `now` until the next `hour:00` (strictly in the future).
pub fn until_next_reset(now: NaiveDateTime, hour: u32) -> Duration {
    let today = now.date().and_hms_opt(hour.min(23), 0, 0).unwrap_or(now);
    let target = if today > now { today } else { today + ChronoDuration::days(1) };
    (target - now).to_std().unwrap_or(Duration::from_secs(1))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRun {
    Completed(usize),
    Skipped,
    Failed,
}

/// Owns the schedules and the non-overlap guard
pub struct Housekeeping {
    pool: Arc<DbPool>,
    transport: Arc<dyn ChatTransport>,
    processor: Option<SubmissionProcessor>,
    guard: Mutex<()>,
}

impl Housekeeping {
    pub fn new(pool: Arc<DbPool>, transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            pool,
            transport,
            processor: None,
            guard: Mutex::new(()),
        }
    }

    /// Lets the reaper promote queued work after failing a stuck submission
    pub fn with_processor(mut self, processor: SubmissionProcessor) -> Self {
        self.processor = Some(processor);
        self
    }

    fn finish(job: &str, result: AppResult<usize>) -> JobRun {
        match result {
            Ok(count) => {
                metrics::record_housekeeping(job, "ok");
                JobRun::Completed(count)
            }
            Err(e) => {
                log::error!("Housekeeping job {} failed: {}", job, e);
                metrics::record_housekeeping(job, "error");
                JobRun::Failed
            }
        }
    }

    /// Waits for any running job instead of skipping; a missed reset would hold a whole day.
    pub async fn run_daily_reset(&self) -> JobRun {
        let _guard = self.guard.lock().await;

        let result = get_connection(&self.pool)
            .map_err(Into::into)
            .and_then(|mut conn| reset_daily_counters(&mut conn));
        if let Ok(count) = &result {
            log::info!("🌅 Daily reset done: {} account(s) had usage, global counter zeroed", count);
        }
        Self::finish("daily_reset", result)
    }

    pub async fn run_expiry_sweep(&self) -> JobRun {
        let Ok(_guard) = self.guard.try_lock() else {
            log::warn!("Expiry sweep skipped: another housekeeping job is running");
            metrics::record_housekeeping("expiry_sweep", "skipped");
            return JobRun::Skipped;
        };

        let expired = get_connection(&self.pool)
            .map_err(Into::into)
            .and_then(|mut conn| expire_subscriptions(&mut conn, Utc::now()));

        let result = match expired {
            Ok(ids) => {
                for id in &ids {
                    if let Err(e) = self.transport.send_text(*id, texts::RENEWAL_NOTICE).await {
                        log::warn!("Failed to send renewal notice to {}: {}", id, e);
                    }
                }
                if !ids.is_empty() {
                    log::info!("Expired {} subscription(s)", ids.len());
                }
                Ok(ids.len())
            }
            Err(e) => Err(e),
        };
        Self::finish("expiry_sweep", result)
    }

    pub async fn run_stuck_reaper(&self) -> JobRun {
        let Ok(_guard) = self.guard.try_lock() else {
            metrics::record_housekeeping("stuck_reaper", "skipped");
            return JobRun::Skipped;
        };

        let reaped = get_connection(&self.pool)
            .map_err(Into::into)
            .and_then(|conn| reap_stuck_submissions(&conn, Utc::now(), config::processing::stuck_after()));

        let result = match reaped {
            Ok(reaped) => {
                for submission in &reaped {
                    metrics::record_finished("failed");
                    if let Some(processor) = &self.processor {
                        processor.cancel(submission.id);
                    }
                    if let Err(e) = self.transport.send_text(submission.owner, texts::CHECK_FAILED).await {
                        log::warn!("Failed to notify {} about reaped submission: {}", submission.owner, e);
                    }
                    if let Some(processor) = &self.processor {
                        if let Err(e) = processor.promote_next(submission.owner).await {
                            log::error!("Failed to promote queue of {}: {}", submission.owner, e);
                        }
                    }
                }
                Ok(reaped.len())
            }
            Err(e) => Err(e),
        };
        Self::finish("stuck_reaper", result)
    }

    /// Spawns the three schedules. They stop when `shutdown` is cancelled.
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let reset_hour = *config::housekeeping::DAILY_RESET_HOUR;
        log::info!(
            "Housekeeping started: daily reset at {:02}:00, expiry sweep every {:?}, stuck reaper every {:?}",
            reset_hour,
            config::housekeeping::expiry_sweep_interval(),
            config::housekeeping::stuck_reaper_interval()
        );

        let daily = {
            let this = Arc::clone(&self);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let wait = until_next_reset(Local::now().naive_local(), reset_hour);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(wait) => {
                            this.run_daily_reset().await;
                        }
                    }
                }
            })
        };

        let expiry = Self::spawn_interval(
            Arc::clone(&self),
            shutdown.clone(),
            config::housekeeping::expiry_sweep_interval(),
            |hk| Box::pin(async move { hk.run_expiry_sweep().await }),
        );

        let reaper = Self::spawn_interval(
            self,
            shutdown,
            config::housekeeping::stuck_reaper_interval(),
            |hk| Box::pin(async move { hk.run_stuck_reaper().await }),
        );

        vec![daily, expiry, reaper]
    }

    fn spawn_interval<F>(this: Arc<Self>, shutdown: CancellationToken, period: Duration, job: F) -> JoinHandle<()>
    where
        F: Fn(Arc<Self>) -> std::pin::Pin<Box<dyn std::future::Future<Output = JobRun> + Send>> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        job(Arc::clone(&this)).await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::subscription::Plan;
    use crate::storage::create_pool;
    use crate::storage::migrations::run_migrations_for_test;
    use crate::storage::submissions::{NewSubmission, SubmissionStatus};
    use crate::testing::RecordingTransport;
    use chrono::{NaiveDate, TimeZone};
    use pretty_assertions::assert_eq;

    fn conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations_for_test(&mut conn).unwrap();
        conn
    }

    #[test]
    fn test_daily_reset_is_idempotent() {
        let mut conn = conn();
        accounts::ensure_account(&conn, 1, None).unwrap();
        accounts::record_admission(&conn, 1, Utc::now(), true).unwrap();
        meta::increment_global_used(&conn).unwrap();

        assert_eq!(reset_daily_counters(&mut conn).unwrap(), 1);
        assert_eq!(reset_daily_counters(&mut conn).unwrap(), 0);

        let account = accounts::get_account(&conn, 1).unwrap().unwrap();
        assert_eq!(account.used_today, 0);
        assert!(account.free_check_used, "reset never restores the free check");
        assert_eq!(meta::global_allocation(&conn).unwrap().used, 0);
    }

    #[test]
    fn test_expiry_downgrades_any_plan() {
        let mut conn = conn();
        let now = Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap();
        for (id, plan) in [(1, Plan::Tier1), (2, Plan::Tier2), (3, Plan::Tier3)] {
            accounts::ensure_account(&conn, id, None).unwrap();
            accounts::activate_subscription(&conn, id, plan, 10, now - ChronoDuration::minutes(1)).unwrap();
        }
        accounts::ensure_account(&conn, 4, None).unwrap();
        accounts::activate_subscription(&conn, 4, Plan::Tier1, 3, now + ChronoDuration::days(2)).unwrap();

        let expired = expire_subscriptions(&mut conn, now).unwrap();
        assert_eq!(expired, vec![1, 2, 3]);
        for id in [1, 2, 3] {
            let account = accounts::get_account(&conn, id).unwrap().unwrap();
            assert_eq!(account.plan, Plan::Free);
            assert!(!account.subscription_active);
            assert_eq!(account.expiry, None);
            assert_eq!(account.daily_limit, 1);
        }
        assert_eq!(accounts::get_account(&conn, 4).unwrap().unwrap().plan, Plan::Tier1);
        assert!(expire_subscriptions(&mut conn, now).unwrap().is_empty());
    }

    #[test]
    fn test_reaper_fails_only_old_processing_rows() {
        let conn = conn();
        let now = Utc::now();
        let new = |owner| NewSubmission {
            owner,
            filename: "a.pdf".to_string(),
            file_id: "f".to_string(),
            options: Default::default(),
            is_free_check: false,
        };
        let old = submissions::insert_submission(&conn, &new(1), now).unwrap();
        submissions::transition(&conn, old, SubmissionStatus::Processing, now - ChronoDuration::hours(1)).unwrap();
        let fresh = submissions::insert_submission(&conn, &new(2), now).unwrap();
        submissions::transition(&conn, fresh, SubmissionStatus::Processing, now).unwrap();

        let reaped = reap_stuck_submissions(&conn, now, ChronoDuration::minutes(30)).unwrap();
        assert_eq!(reaped.iter().map(|s| s.id).collect::<Vec<_>>(), vec![old]);
        let status = |id| submissions::get_submission(&conn, id).unwrap().unwrap().status;
        assert_eq!(status(old), SubmissionStatus::Failed);
        assert_eq!(status(fresh), SubmissionStatus::Processing);
    }

    #[test]
    fn test_until_next_reset() {
        let at = |h, m| NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(h, m, 0).unwrap();
        assert_eq!(until_next_reset(at(23, 30), 0), Duration::from_secs(30 * 60));
        assert_eq!(until_next_reset(at(0, 0), 0), Duration::from_secs(24 * 3600));
        assert_eq!(until_next_reset(at(1, 0), 3), Duration::from_secs(2 * 3600));
    }

    #[tokio::test]
    async fn test_jobs_do_not_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(create_pool(dir.path().join("hk.db").to_str().unwrap()).unwrap());
        let hk = Housekeeping::new(pool, Arc::new(RecordingTransport::new()));

        let _held = hk.guard.lock().await;
        assert_eq!(hk.run_expiry_sweep().await, JobRun::Skipped);
        assert_eq!(hk.run_stuck_reaper().await, JobRun::Skipped);
    }

    #[tokio::test]
    async fn test_daily_reset_waits_for_a_running_job() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(create_pool(dir.path().join("hk.db").to_str().unwrap()).unwrap());
        {
            let conn = pool.get().unwrap();
            accounts::ensure_account(&conn, 1, None).unwrap();
            accounts::record_admission(&conn, 1, Utc::now(), true).unwrap();
            meta::increment_global_used(&conn).unwrap();
        }
        let hk = Arc::new(Housekeeping::new(Arc::clone(&pool), Arc::new(RecordingTransport::new())));

        let held = hk.guard.lock().await;
        let reset = tokio::spawn({
            let hk = Arc::clone(&hk);
            async move { hk.run_daily_reset().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!reset.is_finished());
        drop(held);

        assert_eq!(reset.await.unwrap(), JobRun::Completed(1));
        let conn = pool.get().unwrap();
        assert_eq!(accounts::get_account(&conn, 1).unwrap().unwrap().used_today, 0);
        assert_eq!(meta::global_allocation(&conn).unwrap().used, 0);
    }

    #[tokio::test]
    async fn test_expiry_sweep_sends_renewal_notice() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(create_pool(dir.path().join("hk.db").to_str().unwrap()).unwrap());
        {
            let conn = pool.get().unwrap();
            accounts::ensure_account(&conn, 12, None).unwrap();
            accounts::activate_subscription(&conn, 12, Plan::Tier2, 10, Utc::now() - ChronoDuration::hours(1))
                .unwrap();
        }
        let transport = Arc::new(RecordingTransport::new());
        let hk = Housekeeping::new(pool, transport.clone());

        assert_eq!(hk.run_expiry_sweep().await, JobRun::Completed(1));
        assert_eq!(transport.texts_to(12), vec![texts::RENEWAL_NOTICE.to_string()]);
        assert_eq!(hk.run_expiry_sweep().await, JobRun::Completed(0));
    }
}

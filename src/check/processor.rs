//! Submission processor
//!
//! Each admitted submission runs as one task gated by a semaphore. A supervisor
//! wraps the job in a timeout and a panic boundary, so a row never stays
//! `Processing` after its task is gone. When a job ends, the owner's oldest
//! `Queued` submission is promoted and dispatched.
//!
//! Cancellation is cooperative: the job polls its [`CancellationToken`] before
//! scoring and after the primary attempt, and the final `Processing -> Done`
//! update is conditional, so a row cancelled mid-flight is never delivered.

use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::check::document::remove_scratch_file;
use crate::check::report::{self, ReportContext};
use crate::check::scoring::{Document, ScoringError, ScoringProvider, Scores};
use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::core::metrics;
use crate::storage::accounts;
use crate::storage::submissions::{self, Submission, SubmissionStatus};
use crate::storage::{get_connection, DbPool};
use crate::telegram::keyboards;
use crate::telegram::texts;
use crate::telegram::transport::ChatTransport;

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub workers: usize,
    pub timeout: Duration,
    /// Scratch directory; reports are rendered here before delivery
    pub uploads_dir: PathBuf,
}

impl ProcessorConfig {
    pub fn from_env() -> Self {
        Self {
            workers: *config::processing::MAX_CONCURRENT_CHECKS,
            timeout: config::processing::timeout(),
            uploads_dir: PathBuf::from(config::UPLOADS_DIR.as_str()),
        }
    }
}

/// How a job ended, when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Done(Scores),
    Cancelled,
    /// The row was no longer `Processing` when the job started
    Skipped,
}

struct Inner {
    pool: Arc<DbPool>,
    transport: Arc<dyn ChatTransport>,
    primary: Option<Arc<dyn ScoringProvider>>,
    fallback: Arc<dyn ScoringProvider>,
    semaphore: Arc<Semaphore>,
    tokens: Mutex<HashMap<i64, CancellationToken>>,
    config: ProcessorConfig,
}

#[derive(Clone)]
pub struct SubmissionProcessor {
    inner: Arc<Inner>,
}

impl SubmissionProcessor {
    pub fn new(
        pool: Arc<DbPool>,
        transport: Arc<dyn ChatTransport>,
        primary: Option<Arc<dyn ScoringProvider>>,
        fallback: Arc<dyn ScoringProvider>,
        config: ProcessorConfig,
    ) -> Self {
        log::info!(
            "Submission processor: {} worker(s), timeout {:?}, primary scorer {}",
            config.workers,
            config.timeout,
            if primary.is_some() { "enabled" } else { "disabled" }
        );
        Self {
            inner: Arc::new(Inner {
                pool,
                transport,
                primary,
                fallback,
                semaphore: Arc::new(Semaphore::new(config.workers.max(1))),
                tokens: Mutex::new(HashMap::new()),
                config,
            }),
        }
    }

    /// Schedules a `Processing` submission. The returned handle resolves when
    /// this submission (not any promoted follower) has finished.
    pub fn dispatch(&self, submission_id: i64) -> JoinHandle<()> {
        let token = CancellationToken::new();
        self.lock_tokens().insert(submission_id, token.clone());

        let this = self.clone();
        tokio::spawn(async move {
            let _permit = match Arc::clone(&this.inner.semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    log::error!("Failed to acquire worker permit for submission {}: {}", submission_id, e);
                    this.finish_failed(submission_id, "worker pool closed").await;
                    this.forget(submission_id);
                    return;
                }
            };
            log::info!(
                "Processing submission {} (permits available: {})",
                submission_id,
                this.inner.semaphore.available_permits()
            );
            this.supervise(submission_id, token).await;
        })
    }

    /// Signals a running or waiting job to stop. Returns false if no job is registered.
    pub fn cancel(&self, submission_id: i64) -> bool {
        match self.lock_tokens().get(&submission_id) {
            Some(token) => {
                token.cancel();
                log::info!("🛑 Cancellation requested for submission {}", submission_id);
                true
            }
            None => false,
        }
    }

    /// Number of registered jobs (running or waiting for a permit)
    pub fn in_flight(&self) -> usize {
        self.lock_tokens().len()
    }

    fn lock_tokens(&self) -> std::sync::MutexGuard<'_, HashMap<i64, CancellationToken>> {
        // The map holds no invariants a panic could break
        match self.inner.tokens.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn forget(&self, submission_id: i64) {
        self.lock_tokens().remove(&submission_id);
    }

    async fn supervise(&self, submission_id: i64, token: CancellationToken) {
        let this = self.clone();
        let job_token = token.clone();
        let mut handle = tokio::spawn(async move { this.process(submission_id, job_token).await });

        match tokio::time::timeout(self.inner.config.timeout, &mut handle).await {
            Ok(Ok(Ok(JobOutcome::Done(scores)))) => {
                log::info!(
                    "✅ Submission {} done: similarity={}%, ai={}%, source={}",
                    submission_id,
                    scores.similarity,
                    scores.ai,
                    scores.source
                );
            }
            Ok(Ok(Ok(JobOutcome::Cancelled))) => {
                log::info!("Submission {} stopped after cancellation", submission_id);
            }
            Ok(Ok(Ok(JobOutcome::Skipped))) => {
                log::info!("Submission {} was not processing, skipped", submission_id);
            }
            Ok(Ok(Err(e))) => {
                log::error!("❌ Submission {} failed: {}", submission_id, e);
                self.finish_failed(submission_id, &e.to_string()).await;
            }
            Ok(Err(join_error)) => {
                log::error!("❌ Submission {} task crashed: {}", submission_id, join_error);
                self.finish_failed(submission_id, "internal error").await;
            }
            Err(_) => {
                token.cancel();
                handle.abort();
                log::error!(
                    "⏰ Submission {} exceeded {:?}, forcing failure",
                    submission_id,
                    self.inner.config.timeout
                );
                self.finish_failed(submission_id, "processing timeout").await;
            }
        }

        self.cleanup_upload(submission_id).await;
        self.forget(submission_id);

        if let Some(owner) = self.owner_of(submission_id) {
            if let Err(e) = self.promote_next(owner).await {
                log::error!("Failed to promote queued submission for user {}: {}", owner, e);
            }
        }
    }

    fn owner_of(&self, submission_id: i64) -> Option<i64> {
        let conn = get_connection(&self.inner.pool).ok()?;
        submissions::get_submission(&conn, submission_id)
            .ok()
            .flatten()
            .map(|s| s.owner)
    }

    fn load(&self, submission_id: i64) -> AppResult<Submission> {
        let conn = get_connection(&self.inner.pool)?;
        submissions::get_submission(&conn, submission_id)?
            .ok_or_else(|| AppError::NotFound(format!("submission {}", submission_id)))
    }

    fn is_still_processing(&self, submission_id: i64) -> AppResult<bool> {
        Ok(self.load(submission_id)?.status == SubmissionStatus::Processing)
    }

    fn audit(&self, submission_id: i64, success: bool, source: &str, message: &str) {
        let result = get_connection(&self.inner.pool)
            .map_err(AppError::from)
            .and_then(|conn| Ok(submissions::append_audit(&conn, submission_id, success, Some(source), message)?));
        if let Err(e) = result {
            log::warn!("Failed to write scoring audit for submission {}: {}", submission_id, e);
        }
    }

    async fn process(&self, submission_id: i64, token: CancellationToken) -> AppResult<JobOutcome> {
        let submission = self.load(submission_id)?;
        if submission.status != SubmissionStatus::Processing {
            return Ok(JobOutcome::Skipped);
        }

        let path = submission
            .file_path
            .clone()
            .ok_or_else(|| AppError::Validation(format!("submission {} has no local file", submission_id)))?;
        let document = Document {
            path: PathBuf::from(path),
            filename: submission.filename.clone(),
            options: submission.options,
        };

        // Checkpoint: before scoring
        if token.is_cancelled() || !self.is_still_processing(submission_id)? {
            return Ok(JobOutcome::Cancelled);
        }

        let mut scores = None;
        if let Some(primary) = &self.inner.primary {
            match primary.score(&document, &token).await {
                Ok(result) => {
                    self.audit(submission_id, true, &primary.source().to_string(), "ok");
                    scores = Some(result);
                }
                Err(ScoringError::Cancelled) => return Ok(JobOutcome::Cancelled),
                Err(e) => {
                    log::warn!("Primary scorer failed for submission {}: {}", submission_id, e);
                    self.audit(submission_id, false, &primary.source().to_string(), &e.to_string());
                }
            }
        }

        // Checkpoint: after the primary attempt
        if token.is_cancelled() || !self.is_still_processing(submission_id)? {
            return Ok(JobOutcome::Cancelled);
        }

        let scores = match scores {
            Some(scores) => scores,
            None => {
                let fallback = &self.inner.fallback;
                match fallback.score(&document, &token).await {
                    Ok(result) => {
                        self.audit(submission_id, true, &fallback.source().to_string(), "ok");
                        result
                    }
                    Err(ScoringError::Cancelled) => return Ok(JobOutcome::Cancelled),
                    Err(e) => {
                        self.audit(submission_id, false, &fallback.source().to_string(), &e.to_string());
                        return Err(AppError::Scoring(e.to_string()));
                    }
                }
            }
        };

        let finished = {
            let conn = get_connection(&self.inner.pool)?;
            let source = scores.source.to_string();
            submissions::record_scores(&conn, submission_id, scores.similarity, scores.ai, &source)?
                && submissions::transition(&conn, submission_id, SubmissionStatus::Done, Utc::now())?
        };
        // Conditional update lost the race against a cancellation
        if !finished {
            return Ok(JobOutcome::Cancelled);
        }
        metrics::record_finished("done");
        metrics::record_scoring_source(&scores.source.to_string());

        self.deliver(&submission, &scores).await;
        Ok(JobOutcome::Done(scores))
    }

    /// Sends the reports. Delivery problems are logged, never escalated.
    async fn deliver(&self, submission: &Submission, scores: &Scores) {
        let owner = submission.owner;
        let paid = {
            let account = get_connection(&self.inner.pool)
                .map_err(AppError::from)
                .and_then(|conn| Ok(accounts::get_account(&conn, owner)?));
            match account {
                Ok(Some(account)) => account.plan.is_paid(),
                Ok(None) => false,
                Err(e) => {
                    log::warn!("Failed to load account {} for delivery: {}", owner, e);
                    false
                }
            }
        };

        let ctx = ReportContext {
            submission_id: submission.id,
            filename: &submission.filename,
            options: &submission.options,
            scores,
            generated_at: Utc::now(),
        };
        let dir = &self.inner.config.uploads_dir;
        let transport = &self.inner.transport;

        match report::write_similarity_report(dir, &ctx).await {
            Ok(path) => {
                let caption = texts::report_caption(&submission.filename, scores.similarity);
                if let Err(e) = transport.send_document(owner, &path, &caption).await {
                    log::error!("Failed to deliver similarity report {} to {}: {}", submission.id, owner, e);
                }
                remove_scratch_file(&path).await;
            }
            Err(e) => log::error!("Failed to render similarity report {}: {}", submission.id, e),
        }

        if paid || submission.is_free_check {
            match report::write_ai_report(dir, &ctx).await {
                Ok(path) => {
                    let caption = texts::ai_caption(&submission.filename, scores.ai);
                    if let Err(e) = transport.send_document(owner, &path, &caption).await {
                        log::error!("Failed to deliver AI report {} to {}: {}", submission.id, owner, e);
                    }
                    remove_scratch_file(&path).await;
                }
                Err(e) => log::error!("Failed to render AI report {}: {}", submission.id, e),
            }
        }

        if submission.is_free_check {
            if let Err(e) = transport
                .send_with_buttons(owner, texts::UPGRADE_PROMPT, keyboards::plan_buttons())
                .await
            {
                log::warn!("Failed to send upgrade prompt to {}: {}", owner, e);
            }
        }
    }

    /// Forces `Failed` if the row is still active and tells the user.
    async fn finish_failed(&self, submission_id: i64, reason: &str) {
        let failed = get_connection(&self.inner.pool)
            .map_err(AppError::from)
            .and_then(|conn| {
                let failed = submissions::mark_failed(&conn, submission_id, reason, Utc::now())?;
                let owner = submissions::get_submission(&conn, submission_id)?.map(|s| s.owner);
                Ok(failed.then_some(owner).flatten())
            });

        match failed {
            Ok(Some(owner)) => {
                metrics::record_finished("failed");
                if let Err(e) = self.inner.transport.send_text(owner, texts::CHECK_FAILED).await {
                    log::warn!("Failed to notify {} about failed submission {}: {}", owner, submission_id, e);
                }
            }
            Ok(None) => {}
            Err(e) => log::error!("Failed to mark submission {} as failed: {}", submission_id, e),
        }
    }

    /// Deletes the uploaded copy, whatever the outcome.
    async fn cleanup_upload(&self, submission_id: i64) {
        if let Ok(submission) = self.load(submission_id) {
            if let Some(path) = submission.file_path {
                remove_scratch_file(Path::new(&path)).await;
            }
        }
    }

    /// Starts the owner's oldest `Queued` submission if nothing of theirs is processing.
    pub async fn promote_next(&self, owner: i64) -> AppResult<Option<i64>> {
        let promoted = {
            let conn = get_connection(&self.inner.pool)?;
            if submissions::has_processing(&conn, owner)? {
                return Ok(None);
            }
            match submissions::oldest_queued_for_owner(&conn, owner)? {
                Some(next) => submissions::transition(&conn, next.id, SubmissionStatus::Processing, Utc::now())?
                    .then_some(next),
                None => None,
            }
        };

        let Some(next) = promoted else {
            return Ok(None);
        };

        log::info!("⏭️  Promoted queued submission {} for user {}", next.id, owner);
        if let Err(e) = self
            .inner
            .transport
            .send_text(owner, &texts::processing_started(&next.filename))
            .await
        {
            log::warn!("Failed to notify {} about promotion: {}", owner, e);
        }
        self.dispatch(next.id);
        Ok(Some(next.id))
    }

    /// Resumes work left over from a previous run: re-dispatches `Processing`
    /// rows whose file is still on disk, fails the rest, and promotes queues
    /// with nothing running.
    pub async fn recover(&self) -> AppResult<usize> {
        let (processing, queued) = {
            let conn = get_connection(&self.inner.pool)?;
            (
                submissions::with_status(&conn, SubmissionStatus::Processing)?,
                submissions::with_status(&conn, SubmissionStatus::Queued)?,
            )
        };

        let mut resumed = 0;
        for submission in processing {
            let on_disk = match &submission.file_path {
                Some(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
                None => false,
            };
            if on_disk {
                log::info!("♻️  Resuming submission {} for user {}", submission.id, submission.owner);
                self.dispatch(submission.id);
                resumed += 1;
            } else {
                log::warn!("Submission {} lost its upload during restart", submission.id);
                self.finish_failed(submission.id, "interrupted").await;
            }
        }

        let mut owners: Vec<i64> = queued.iter().map(|s| s.owner).collect();
        owners.sort_unstable();
        owners.dedup();
        for owner in owners {
            if self.promote_next(owner).await?.is_some() {
                resumed += 1;
            }
        }

        if resumed > 0 {
            log::info!("Recovered {} submission(s) after restart", resumed);
        }
        Ok(resumed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::options::ReportOptions;
    use crate::check::scoring::{LocalScorer, ScoreSource};
    use crate::core::quota::{self, Admission, AdmissionRequest};
    use crate::core::subscription::Plan;
    use crate::storage::create_pool;
    use crate::testing::{RecordingTransport, SentMessage};
    use async_trait::async_trait;

    struct FailingScorer;

    #[async_trait]
    impl ScoringProvider for FailingScorer {
        fn source(&self) -> ScoreSource {
            ScoreSource::Vendor
        }

        async fn score(&self, _document: &Document, _cancel: &CancellationToken) -> Result<Scores, ScoringError> {
            Err(ScoringError::Unavailable("offline".to_string()))
        }
    }

    /// Waits on the token, so tests can cancel mid-flight
    struct BlockingScorer;

    #[async_trait]
    impl ScoringProvider for BlockingScorer {
        fn source(&self) -> ScoreSource {
            ScoreSource::Vendor
        }

        async fn score(&self, _document: &Document, cancel: &CancellationToken) -> Result<Scores, ScoringError> {
            cancel.cancelled().await;
            Err(ScoringError::Cancelled)
        }
    }

    struct PanickingScorer;

    #[async_trait]
    impl ScoringProvider for PanickingScorer {
        fn source(&self) -> ScoreSource {
            ScoreSource::Local
        }

        async fn score(&self, _document: &Document, _cancel: &CancellationToken) -> Result<Scores, ScoringError> {
            panic!("scorer bug");
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        pool: Arc<DbPool>,
        transport: Arc<RecordingTransport>,
        uploads: PathBuf,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let pool = Arc::new(create_pool(dir.path().join("t.db").to_str().unwrap()).unwrap());
            let uploads = dir.path().join("uploads");
            std::fs::create_dir_all(&uploads).unwrap();
            Self {
                _dir: dir,
                pool,
                transport: Arc::new(RecordingTransport::new()),
                uploads,
            }
        }

        fn processor(
            &self,
            primary: Option<Arc<dyn ScoringProvider>>,
            fallback: Arc<dyn ScoringProvider>,
            timeout: Duration,
        ) -> SubmissionProcessor {
            SubmissionProcessor::new(
                Arc::clone(&self.pool),
                self.transport.clone(),
                primary,
                fallback,
                ProcessorConfig {
                    workers: 2,
                    timeout,
                    uploads_dir: self.uploads.clone(),
                },
            )
        }

        fn admit(&self, owner: i64, name: &str) -> (Admission, PathBuf) {
            let mut conn = self.pool.get().unwrap();
            let path = self.uploads.join(format!("{}_{}", owner, name));
            std::fs::write(&path, format!("contents of {}", name)).unwrap();
            let admission = quota::admit(
                &mut conn,
                &AdmissionRequest {
                    owner,
                    filename: name.to_string(),
                    file_id: format!("file-{}", name),
                    options: ReportOptions::default(),
                    file_path: Some(path.to_string_lossy().into_owned()),
                },
                Utc::now(),
                Duration::ZERO,
            )
            .unwrap();
            (admission, path)
        }

        fn status(&self, id: i64) -> SubmissionStatus {
            let conn = self.pool.get().unwrap();
            submissions::get_submission(&conn, id).unwrap().unwrap().status
        }

        async fn wait_for(&self, id: i64, status: SubmissionStatus) {
            for _ in 0..200 {
                if self.status(id) == status {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            panic!("submission {} never reached {}, is {}", id, status, self.status(id));
        }
    }

    #[tokio::test]
    async fn test_free_check_falls_back_and_delivers_everything() {
        let h = Harness::new();
        let processor = h.processor(Some(Arc::new(FailingScorer)), Arc::new(LocalScorer), Duration::from_secs(10));
        let (admission, upload) = h.admit(1, "report.pdf");
        let id = admission.submission_id().unwrap();

        processor.dispatch(id).await.unwrap();

        assert_eq!(h.status(id), SubmissionStatus::Done);
        assert!(!upload.exists());
        let conn = h.pool.get().unwrap();
        let done = submissions::get_submission(&conn, id).unwrap().unwrap();
        assert_eq!(done.source.as_deref(), Some("local"));
        let audit = submissions::audit_for_submission(&conn, id).unwrap();
        assert_eq!(audit.iter().map(|a| a.success).collect::<Vec<_>>(), vec![false, true]);

        let sent = h.transport.sent();
        let documents = sent.iter().filter(|m| matches!(m, SentMessage::Document { .. })).count();
        assert_eq!(documents, 2, "similarity and AI report for the free check");
        assert!(sent
            .iter()
            .any(|m| matches!(m, SentMessage::Buttons { text, .. } if text == texts::UPGRADE_PROMPT)));
        assert_eq!(processor.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_paid_plan_gets_ai_report_without_upgrade_prompt() {
        let h = Harness::new();
        {
            let conn = h.pool.get().unwrap();
            accounts::ensure_account(&conn, 2, None).unwrap();
            accounts::activate_subscription(&conn, 2, Plan::Tier1, 3, Utc::now() + chrono::Duration::days(30))
                .unwrap();
        }
        let processor = h.processor(None, Arc::new(LocalScorer), Duration::from_secs(10));
        let (admission, _) = h.admit(2, "thesis.docx");

        processor.dispatch(admission.submission_id().unwrap()).await.unwrap();

        let sent = h.transport.sent();
        assert_eq!(sent.iter().filter(|m| matches!(m, SentMessage::Document { .. })).count(), 2);
        assert!(!sent.iter().any(|m| matches!(m, SentMessage::Buttons { .. })));
    }

    #[tokio::test]
    async fn test_free_plan_without_free_check_gets_similarity_only() {
        let h = Harness::new();
        let (admission, _) = h.admit(3, "a.pdf");
        let id = admission.submission_id().unwrap();
        {
            let conn = h.pool.get().unwrap();
            conn.execute("UPDATE submissions SET is_free_check = 0 WHERE id = ?1", [id]).unwrap();
        }
        let processor = h.processor(None, Arc::new(LocalScorer), Duration::from_secs(10));

        processor.dispatch(id).await.unwrap();

        let sent = h.transport.sent();
        assert_eq!(sent.iter().filter(|m| matches!(m, SentMessage::Document { .. })).count(), 1);
    }

    #[tokio::test]
    async fn test_total_failure_marks_failed_and_notifies() {
        let h = Harness::new();
        let processor = h.processor(Some(Arc::new(FailingScorer)), Arc::new(FailingScorer), Duration::from_secs(10));
        let (admission, upload) = h.admit(4, "x.pdf");
        let id = admission.submission_id().unwrap();

        processor.dispatch(id).await.unwrap();

        assert_eq!(h.status(id), SubmissionStatus::Failed);
        assert!(!upload.exists());
        assert!(h.transport.texts_to(4).iter().any(|t| t == texts::CHECK_FAILED));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let h = Harness::new();
        let processor = h.processor(None, Arc::new(PanickingScorer), Duration::from_secs(10));
        let (admission, _) = h.admit(5, "y.pdf");
        let id = admission.submission_id().unwrap();

        processor.dispatch(id).await.unwrap();
        assert_eq!(h.status(id), SubmissionStatus::Failed);
    }

    #[tokio::test]
    async fn test_timeout_forces_failed() {
        let h = Harness::new();
        let processor = h.processor(Some(Arc::new(BlockingScorer)), Arc::new(LocalScorer), Duration::from_millis(100));
        let (admission, _) = h.admit(6, "slow.pdf");
        let id = admission.submission_id().unwrap();

        processor.dispatch(id).await.unwrap();
        assert_eq!(h.status(id), SubmissionStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancel_mid_flight_delivers_nothing() {
        let h = Harness::new();
        let processor = h.processor(Some(Arc::new(BlockingScorer)), Arc::new(LocalScorer), Duration::from_secs(10));
        let (admission, upload) = h.admit(7, "z.pdf");
        let id = admission.submission_id().unwrap();

        let handle = processor.dispatch(id);
        tokio::time::sleep(Duration::from_millis(50)).await;
        {
            let conn = h.pool.get().unwrap();
            assert!(submissions::transition(&conn, id, SubmissionStatus::Cancelled, Utc::now()).unwrap());
        }
        assert!(processor.cancel(id));
        handle.await.unwrap();

        assert_eq!(h.status(id), SubmissionStatus::Cancelled);
        assert!(!upload.exists());
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_queued_submission_is_promoted_after_completion() {
        let h = Harness::new();
        {
            let conn = h.pool.get().unwrap();
            accounts::ensure_account(&conn, 8, None).unwrap();
            accounts::activate_subscription(&conn, 8, Plan::Tier2, 10, Utc::now() + chrono::Duration::days(30))
                .unwrap();
        }
        let processor = h.processor(None, Arc::new(LocalScorer), Duration::from_secs(10));
        let (first, _) = h.admit(8, "one.pdf");
        let (second, _) = h.admit(8, "two.pdf");
        assert!(matches!(second, Admission::Queued { .. }));
        let second_id = second.submission_id().unwrap();

        processor.dispatch(first.submission_id().unwrap()).await.unwrap();

        h.wait_for(second_id, SubmissionStatus::Done).await;
        assert!(h
            .transport
            .texts_to(8)
            .iter()
            .any(|t| t == &texts::processing_started("two.pdf")));
    }

    #[tokio::test]
    async fn test_recover_promotes_once_per_owner_with_interleaved_queue() {
        let h = Harness::new();
        {
            let conn = h.pool.get().unwrap();
            for owner in [3, 4] {
                accounts::ensure_account(&conn, owner, None).unwrap();
                accounts::activate_subscription(&conn, owner, Plan::Tier3, 25, Utc::now() + chrono::Duration::days(30))
                    .unwrap();
            }
        }
        let (a_running, _) = h.admit(3, "a1.pdf");
        let (a_next, _) = h.admit(3, "a2.pdf");
        let (b_running, _) = h.admit(4, "b1.pdf");
        let (b_next, _) = h.admit(4, "b2.pdf");
        let (a_last, _) = h.admit(3, "a3.pdf");
        {
            let conn = h.pool.get().unwrap();
            for id in [a_running.submission_id().unwrap(), b_running.submission_id().unwrap()] {
                assert!(submissions::mark_failed(&conn, id, "interrupted", Utc::now()).unwrap());
            }
        }

        let processor = h.processor(None, Arc::new(LocalScorer), Duration::from_secs(10));
        let resumed = processor.recover().await.unwrap();

        assert_eq!(resumed, 2);
        h.wait_for(a_next.submission_id().unwrap(), SubmissionStatus::Done).await;
        h.wait_for(b_next.submission_id().unwrap(), SubmissionStatus::Done).await;
        h.wait_for(a_last.submission_id().unwrap(), SubmissionStatus::Done).await;
    }

    #[tokio::test]
    async fn test_recover_fails_lost_uploads_and_promotes_queue() {
        let h = Harness::new();
        {
            let conn = h.pool.get().unwrap();
            accounts::ensure_account(&conn, 9, None).unwrap();
            accounts::activate_subscription(&conn, 9, Plan::Tier3, 25, Utc::now() + chrono::Duration::days(30))
                .unwrap();
        }
        let (first, first_upload) = h.admit(9, "lost.pdf");
        let (second, _) = h.admit(9, "kept.pdf");
        std::fs::remove_file(first_upload).unwrap();

        let processor = h.processor(None, Arc::new(LocalScorer), Duration::from_secs(10));
        let resumed = processor.recover().await.unwrap();

        assert_eq!(resumed, 1);
        assert_eq!(h.status(first.submission_id().unwrap()), SubmissionStatus::Failed);
        h.wait_for(second.submission_id().unwrap(), SubmissionStatus::Done).await;
    }
}

//! Test environment shared by the integration tests

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use turnitq::check::processor::{ProcessorConfig, SubmissionProcessor};
use turnitq::check::scoring::{Document, LocalScorer, ScoreSource, Scores, ScoringError, ScoringProvider};
use turnitq::core::subscription::{self, Plan};
use turnitq::storage::accounts::{self, Account};
use turnitq::storage::submissions::{self, Submission, SubmissionStatus};
use turnitq::storage::{create_pool, meta, DbPool};
use turnitq::telegram::HandlerDeps;
use turnitq::testing::RecordingTransport;

/// Scorer that waits for a permit before delegating to [`LocalScorer`].
///
/// Lets a test hold a submission in `Processing` and release it on demand.
pub struct GatedScorer {
    gate: Arc<Semaphore>,
}

impl GatedScorer {
    pub fn new() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (Self { gate: Arc::clone(&gate) }, gate)
    }
}

#[async_trait]
impl ScoringProvider for GatedScorer {
    fn source(&self) -> ScoreSource {
        ScoreSource::Local
    }

    async fn score(&self, document: &Document, cancel: &CancellationToken) -> Result<Scores, ScoringError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(ScoringError::Cancelled),
            permit = self.gate.acquire() => {
                if let Ok(permit) = permit {
                    permit.forget();
                }
                LocalScorer.score(document, cancel).await
            }
        }
    }
}

/// On-disk database, scratch directory, recording transport and handler deps
pub struct TestEnvironment {
    _dir: tempfile::TempDir,
    pub pool: Arc<DbPool>,
    pub transport: Arc<RecordingTransport>,
    pub uploads: PathBuf,
    pub deps: HandlerDeps,
}

impl TestEnvironment {
    /// Environment whose checks complete immediately
    pub fn new(transport: RecordingTransport) -> Self {
        Self::with_scorer(transport, Arc::new(LocalScorer))
    }

    /// Environment whose checks block until the returned gate gets a permit
    pub fn gated(transport: RecordingTransport) -> (Self, Arc<Semaphore>) {
        let (scorer, gate) = GatedScorer::new();
        (Self::with_scorer(transport, Arc::new(scorer)), gate)
    }

    pub fn with_scorer(transport: RecordingTransport, scorer: Arc<dyn ScoringProvider>) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("turnitq.db");
        let pool = Arc::new(create_pool(db_path.to_str().expect("utf-8 path")).expect("pool"));
        let uploads = dir.path().join("uploads");
        std::fs::create_dir_all(&uploads).expect("uploads dir");

        let transport = Arc::new(transport);
        let processor = SubmissionProcessor::new(
            Arc::clone(&pool),
            transport.clone(),
            None,
            scorer,
            ProcessorConfig {
                workers: 4,
                timeout: Duration::from_secs(10),
                uploads_dir: uploads.clone(),
            },
        );

        let mut deps = HandlerDeps::new(Arc::clone(&pool), transport.clone(), processor, None);
        deps.uploads_dir = uploads.clone();
        deps.cooldown = Duration::ZERO;

        Self {
            _dir: dir,
            pool,
            transport,
            uploads,
            deps,
        }
    }

    pub fn account(&self, user_id: i64) -> Account {
        let conn = self.pool.get().expect("connection");
        accounts::get_account(&conn, user_id).expect("query").expect("account exists")
    }

    pub fn activate(&self, user_id: i64, plan: Plan) -> Account {
        let conn = self.pool.get().expect("connection");
        accounts::ensure_account(&conn, user_id, None).expect("account");
        subscription::activate_subscription(&conn, user_id, plan, chrono::Utc::now()).expect("activation")
    }

    pub fn set_global_max(&self, max: u32) {
        let conn = self.pool.get().expect("connection");
        meta::set_global_max(&conn, max).expect("global max");
    }

    pub fn global_used(&self) -> u32 {
        let conn = self.pool.get().expect("connection");
        meta::global_allocation(&conn).expect("allocation").used
    }

    pub fn submissions_of(&self, user_id: i64) -> Vec<Submission> {
        let conn = self.pool.get().expect("connection");
        submissions::recent_for_owner(&conn, user_id, 50).expect("submissions")
    }

    pub fn status(&self, submission_id: i64) -> SubmissionStatus {
        let conn = self.pool.get().expect("connection");
        submissions::get_submission(&conn, submission_id)
            .expect("query")
            .expect("submission exists")
            .status
    }
}

/// Polls `check` until it holds or roughly five seconds pass.
pub async fn wait_until<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..250 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {}", what);
}

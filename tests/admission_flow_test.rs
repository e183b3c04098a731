//! End-to-end admission flows: upload, options reply, quota, queue and delivery

mod common;

use common::{wait_until, TestEnvironment};
use pretty_assertions::assert_eq;

use turnitq::check::options::ReportOptions;
use turnitq::core::quota::Rejection;
use turnitq::core::subscription::Plan;
use turnitq::storage::sessions;
use turnitq::storage::submissions::SubmissionStatus;
use turnitq::telegram::handlers::{handle_cancel, handle_check, handle_document, handle_options_reply, handle_start};
use turnitq::telegram::texts;
use turnitq::testing::{RecordingTransport, SentMessage};

const USER: i64 = 4242;

fn documents_to(env: &TestEnvironment, chat: i64) -> Vec<(String, String)> {
    env.transport
        .sent()
        .into_iter()
        .filter_map(|m| match m {
            SentMessage::Document {
                chat_id,
                file_name,
                caption,
            } if chat_id == chat => Some((file_name, caption)),
            _ => None,
        })
        .collect()
}

fn has_buttons(env: &TestEnvironment, chat: i64, text: &str) -> bool {
    env.transport.sent().iter().any(|m| {
        matches!(m, SentMessage::Buttons { chat_id, text: t, buttons } if *chat_id == chat && t == text && !buttons.is_empty())
    })
}

async fn upload_and_answer(env: &TestEnvironment, user: i64, filename: &str, file_id: &str) -> bool {
    handle_document(&env.deps, user, Some("student"), filename, file_id)
        .await
        .expect("upload handled");
    handle_options_reply(&env.deps, user, "Yes, No, Yes, Yes")
        .await
        .expect("reply handled")
}

#[tokio::test]
async fn test_free_check_delivers_both_reports_and_upgrade_prompt() {
    let env = TestEnvironment::new(RecordingTransport::new().with_file("f1", b"my essay about rivers"));

    handle_start(&env.deps, USER, Some("student")).await.unwrap();
    handle_document(&env.deps, USER, Some("student"), "essay.docx", "f1")
        .await
        .unwrap();
    assert_eq!(env.transport.last_text_to(USER), Some(ReportOptions::prompt()));

    assert!(handle_options_reply(&env.deps, USER, "Yes, No, Yes, Yes").await.unwrap());
    assert!(env
        .transport
        .texts_to(USER)
        .contains(&texts::processing_started("essay.docx")));

    wait_until("upgrade prompt after the free check", || {
        env.transport.texts_to(USER).iter().any(|t| t == texts::UPGRADE_PROMPT)
    })
    .await;

    let docs = documents_to(&env, USER);
    assert_eq!(docs.len(), 2, "similarity and AI report: {:?}", docs);
    assert!(docs[0].1.starts_with("📊 Similarity report for essay.docx"));
    assert!(docs[1].1.starts_with("🤖 AI-writing report for essay.docx"));
    assert!(has_buttons(&env, USER, texts::UPGRADE_PROMPT));

    let account = env.account(USER);
    assert!(account.free_check_used);
    assert_eq!(account.used_today, 1);
    assert!(account.last_submission_at.is_some());
    assert_eq!(env.global_used(), 1);

    let submissions = env.submissions_of(USER);
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].status, SubmissionStatus::Done);
    assert!(submissions[0].options.exclude_bibliography);
    assert!(!submissions[0].options.exclude_quotes);
}

#[tokio::test]
async fn test_undeliverable_start_notice_still_runs_the_check() {
    let env = TestEnvironment::new(
        RecordingTransport::new()
            .with_file("f1", b"my essay about rivers")
            .refusing_texts_starting_with("🔍 Checking"),
    );
    env.activate(USER, Plan::Tier1);

    assert!(upload_and_answer(&env, USER, "essay.pdf", "f1").await);
    assert!(!env
        .transport
        .texts_to(USER)
        .contains(&texts::processing_started("essay.pdf")));

    let submission_id = env.submissions_of(USER)[0].id;
    wait_until("check finishes despite the lost notice", || {
        env.status(submission_id) == SubmissionStatus::Done && documents_to(&env, USER).len() == 2
    })
    .await;
    assert_eq!(env.account(USER).used_today, 1);
}

#[tokio::test]
async fn test_second_free_upload_is_rejected_before_download() {
    let env = TestEnvironment::new(
        RecordingTransport::new()
            .with_file("f1", b"first essay")
            .with_file("f2", b"second essay"),
    );

    assert!(upload_and_answer(&env, USER, "first.pdf", "f1").await);
    wait_until("first check delivered", || {
        env.transport.texts_to(USER).iter().any(|t| t == texts::UPGRADE_PROMPT)
    })
    .await;
    env.transport.clear();

    handle_document(&env.deps, USER, None, "second.pdf", "f2").await.unwrap();

    let rejection = texts::rejection(&Rejection::FreeCheckUsed);
    assert_eq!(env.transport.last_text_to(USER), Some(rejection.clone()));
    assert!(has_buttons(&env, USER, &rejection));
    assert_eq!(env.transport.downloads().len(), 1, "second file never downloaded");

    let conn = env.pool.get().unwrap();
    assert!(sessions::get_session(&conn, USER).unwrap().pending.is_none());
    assert_eq!(env.account(USER).used_today, 1);
    assert_eq!(env.submissions_of(USER).len(), 1);
}

#[tokio::test]
async fn test_check_command_reports_rejection_up_front() {
    let env = TestEnvironment::new(RecordingTransport::new().with_file("f1", b"essay"));

    handle_check(&env.deps, USER, None).await.unwrap();
    assert_eq!(env.transport.last_text_to(USER).as_deref(), Some(texts::CHECK_PROMPT));

    assert!(upload_and_answer(&env, USER, "essay.pdf", "f1").await);
    wait_until("free check delivered", || {
        env.transport.texts_to(USER).iter().any(|t| t == texts::UPGRADE_PROMPT)
    })
    .await;

    handle_check(&env.deps, USER, None).await.unwrap();
    assert_eq!(
        env.transport.last_text_to(USER),
        Some(texts::rejection(&Rejection::FreeCheckUsed))
    );
}

#[tokio::test]
async fn test_paid_daily_limit_rejects_without_touching_counters() {
    let mut transport = RecordingTransport::new();
    for i in 0..4 {
        transport = transport.with_file(&format!("f{}", i), format!("essay number {}", i).as_bytes());
    }
    let env = TestEnvironment::new(transport);
    let account = env.activate(USER, Plan::Tier1);
    let limit = account.daily_limit;

    for i in 0..limit {
        assert!(upload_and_answer(&env, USER, &format!("essay{}.pdf", i), &format!("f{}", i)).await);
        let expected = (i + 1) as usize;
        wait_until("check done", || {
            env.submissions_of(USER)
                .iter()
                .filter(|s| s.status == SubmissionStatus::Done)
                .count()
                == expected
        })
        .await;
    }
    let used_before = env.account(USER).used_today;
    let global_before = env.global_used();
    assert_eq!(used_before, limit);

    handle_document(&env.deps, USER, None, "one_more.pdf", &format!("f{}", limit))
        .await
        .unwrap();

    let rejection = texts::rejection(&Rejection::DailyLimitReached { limit });
    assert_eq!(env.transport.last_text_to(USER), Some(rejection.clone()));
    assert!(has_buttons(&env, USER, &rejection));
    assert_eq!(env.account(USER).used_today, used_before);
    assert_eq!(env.global_used(), global_before);
    assert_eq!(env.submissions_of(USER).len(), limit as usize);
}

#[tokio::test]
async fn test_paid_checks_include_ai_report_without_upgrade_prompt() {
    let env = TestEnvironment::new(RecordingTransport::new().with_file("f1", b"paid essay"));
    env.activate(USER, Plan::Tier2);

    assert!(upload_and_answer(&env, USER, "paid.docx", "f1").await);
    wait_until("both reports", || documents_to(&env, USER).len() == 2).await;

    assert!(!env.transport.texts_to(USER).iter().any(|t| t == texts::UPGRADE_PROMPT));
    assert!(!env.account(USER).free_check_used);
}

#[tokio::test]
async fn test_second_submission_queues_behind_running_one() {
    let (env, gate) = TestEnvironment::gated(
        RecordingTransport::new()
            .with_file("a", b"first assignment")
            .with_file("b", b"second assignment"),
    );
    env.activate(USER, Plan::Tier2);

    assert!(upload_and_answer(&env, USER, "a.pdf", "a").await);
    assert!(upload_and_answer(&env, USER, "b.pdf", "b").await);

    assert!(env.transport.texts_to(USER).contains(&texts::queued("b.pdf", 1)));
    let account = env.account(USER);
    assert_eq!(account.used_today, 2, "queued admissions count immediately");
    assert_eq!(env.global_used(), 2);

    let mut subs = env.submissions_of(USER);
    subs.sort_by_key(|s| s.id);
    assert_eq!(subs[0].status, SubmissionStatus::Processing);
    assert_eq!(subs[1].status, SubmissionStatus::Queued);
    assert!(subs[1].file_path.is_some());

    gate.add_permits(2);

    let (first, second) = (subs[0].id, subs[1].id);
    wait_until("both submissions done", || {
        env.status(first) == SubmissionStatus::Done && env.status(second) == SubmissionStatus::Done
    })
    .await;
    wait_until("four reports delivered", || documents_to(&env, USER).len() == 4).await;
}

#[tokio::test]
async fn test_malformed_options_keep_the_upload_pending() {
    let env = TestEnvironment::new(RecordingTransport::new().with_file("f1", b"essay"));

    handle_document(&env.deps, USER, None, "essay.pdf", "f1").await.unwrap();
    assert!(handle_options_reply(&env.deps, USER, "Yes, Maybe, No").await.unwrap());

    assert_eq!(env.transport.last_text_to(USER), Some(texts::options_format_error()));
    let conn = env.pool.get().unwrap();
    let session = sessions::get_session(&conn, USER).unwrap();
    assert!(session.awaiting_options);
    assert_eq!(session.pending.map(|p| p.file_name).as_deref(), Some("essay.pdf"));
    drop(conn);
    assert!(env.transport.downloads().is_empty());
    assert!(env.submissions_of(USER).is_empty());

    assert!(handle_options_reply(&env.deps, USER, "no, no, no, no").await.unwrap());
    wait_until("check done after a valid reply", || {
        env.submissions_of(USER)
            .first()
            .is_some_and(|s| s.status == SubmissionStatus::Done)
    })
    .await;
}

#[tokio::test]
async fn test_text_without_pending_upload_is_not_consumed() {
    let env = TestEnvironment::new(RecordingTransport::new());
    assert!(!handle_options_reply(&env.deps, USER, "Yes, No, Yes, Yes").await.unwrap());
    assert!(env.transport.sent().is_empty());
}

#[tokio::test]
async fn test_unsupported_file_type_is_refused() {
    let env = TestEnvironment::new(RecordingTransport::new());

    handle_document(&env.deps, USER, None, "notes.txt", "f1").await.unwrap();

    assert_eq!(env.transport.last_text_to(USER).as_deref(), Some(texts::UNSUPPORTED_FILE));
    let conn = env.pool.get().unwrap();
    assert!(sessions::get_session(&conn, USER).unwrap().pending.is_none());
}

#[tokio::test]
async fn test_failed_download_clears_the_session() {
    let env = TestEnvironment::new(RecordingTransport::new());

    handle_document(&env.deps, USER, None, "essay.pdf", "missing").await.unwrap();
    assert!(handle_options_reply(&env.deps, USER, "Yes, Yes, Yes, Yes").await.unwrap());

    assert_eq!(env.transport.last_text_to(USER).as_deref(), Some(texts::DOWNLOAD_FAILED));
    let conn = env.pool.get().unwrap();
    assert!(sessions::get_session(&conn, USER).unwrap().pending.is_none());
    drop(conn);
    assert!(env.submissions_of(USER).is_empty());
    assert_eq!(env.account(USER).used_today, 0);
}

#[tokio::test]
async fn test_cancel_stops_queued_and_running_checks() {
    let (env, _gate) = TestEnvironment::gated(
        RecordingTransport::new()
            .with_file("a", b"first assignment")
            .with_file("b", b"second assignment"),
    );
    env.activate(USER, Plan::Tier2);

    assert!(upload_and_answer(&env, USER, "a.pdf", "a").await);
    assert!(upload_and_answer(&env, USER, "b.pdf", "b").await);
    let queued_path = env
        .submissions_of(USER)
        .into_iter()
        .find(|s| s.status == SubmissionStatus::Queued)
        .and_then(|s| s.file_path)
        .expect("queued submission has its file");

    handle_cancel(&env.deps, USER).await.unwrap();

    assert_eq!(env.transport.last_text_to(USER), Some(texts::cancelled(2)));
    for submission in env.submissions_of(USER) {
        assert_eq!(submission.status, SubmissionStatus::Cancelled);
    }
    assert!(!std::path::Path::new(&queued_path).exists());
    assert!(documents_to(&env, USER).is_empty());
    assert_eq!(env.account(USER).used_today, 2, "cancellation does not refund");

    wait_until("running job released", || env.deps.processor.in_flight() == 0).await;
}

#[tokio::test]
async fn test_cancel_with_nothing_active() {
    let env = TestEnvironment::new(RecordingTransport::new());
    handle_cancel(&env.deps, USER).await.unwrap();
    assert_eq!(env.transport.last_text_to(USER).as_deref(), Some(texts::NOTHING_TO_CANCEL));

    handle_document(&env.deps, USER, None, "essay.pdf", "f1").await.unwrap();
    handle_cancel(&env.deps, USER).await.unwrap();
    assert_eq!(env.transport.last_text_to(USER), Some(texts::pending_upload_dropped()));
}

#[tokio::test]
async fn test_cooldown_rejects_rapid_submissions() {
    let mut env = TestEnvironment::new(
        RecordingTransport::new()
            .with_file("a", b"first")
            .with_file("b", b"second"),
    );
    env.deps.cooldown = std::time::Duration::from_secs(60);
    env.activate(USER, Plan::Tier3);

    assert!(upload_and_answer(&env, USER, "a.pdf", "a").await);
    handle_document(&env.deps, USER, None, "b.pdf", "b").await.unwrap();

    let last = env.transport.last_text_to(USER).unwrap_or_default();
    assert!(last.starts_with("⏳ Please wait"), "got {:?}", last);
    assert_eq!(env.account(USER).used_today, 1);
}

#[tokio::test]
async fn test_global_capacity_rejects_everyone() {
    let env = TestEnvironment::new(
        RecordingTransport::new()
            .with_file("a", b"first")
            .with_file("b", b"second"),
    );
    env.set_global_max(1);

    assert!(upload_and_answer(&env, 1, "a.pdf", "a").await);
    handle_document(&env.deps, 2, None, "b.pdf", "b").await.unwrap();

    assert_eq!(
        env.transport.last_text_to(2),
        Some(texts::rejection(&Rejection::SystemAtCapacity))
    );
    assert_eq!(env.global_used(), 1);
}

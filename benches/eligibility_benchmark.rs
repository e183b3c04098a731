//! Eligibility and admission benchmarks
//!
//! Run with: cargo bench --bench eligibility_benchmark

use chrono::{Duration as ChronoDuration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

use turnitq::check::options::ReportOptions;
use turnitq::check::scoring::LocalScorer;
use turnitq::core::quota::{self, AdmissionRequest};
use turnitq::core::subscription::{self, Plan};
use turnitq::storage::accounts::{self, Account};
use turnitq::storage::create_pool;
use turnitq::storage::meta::{self, GlobalAllocation};

const COOLDOWN: Duration = Duration::from_secs(60);

fn sample_accounts() -> Vec<(&'static str, Account)> {
    let now = Utc::now();
    let fresh = Account::new_free(1);

    let mut free_used = Account::new_free(2);
    free_used.free_check_used = true;
    free_used.used_today = 1;

    let mut cooling = Account::new_free(3);
    cooling.plan = Plan::Tier2;
    cooling.daily_limit = 10;
    cooling.used_today = 4;
    cooling.last_submission_at = Some(now - ChronoDuration::seconds(10));

    let mut at_limit = Account::new_free(4);
    at_limit.plan = Plan::Tier1;
    at_limit.daily_limit = 3;
    at_limit.used_today = 3;

    vec![
        ("fresh_free", fresh),
        ("free_used", free_used),
        ("cooldown", cooling),
        ("daily_limit", at_limit),
    ]
}

fn bench_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate");
    let alloc = GlobalAllocation { used: 10, max: 500 };
    let now = Utc::now();

    for (name, account) in sample_accounts() {
        group.bench_with_input(BenchmarkId::from_parameter(name), &account, |b, account| {
            b.iter(|| quota::evaluate(black_box(account), black_box(&alloc), now, COOLDOWN));
        });
    }
    group.finish();
}

fn bench_admit(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let pool = create_pool(dir.path().join("bench.db").to_str().expect("utf-8 path")).expect("pool");
    let mut conn = pool.get().expect("connection");
    meta::set_global_max(&conn, u32::MAX).expect("global max");
    accounts::ensure_account(&conn, 7, None).expect("account");
    subscription::activate_subscription(&conn, 7, Plan::Tier3, Utc::now()).expect("activation");

    let request = AdmissionRequest {
        owner: 7,
        filename: "bench.pdf".to_string(),
        file_id: "bench".to_string(),
        options: ReportOptions::default(),
        file_path: None,
    };

    c.bench_function("admit_transaction", |b| {
        b.iter(|| {
            // keep the account under its limit so every iteration commits
            conn.execute("UPDATE accounts SET used_today = 0 WHERE telegram_id = 7", [])
                .expect("reset");
            quota::admit(&mut conn, black_box(&request), Utc::now(), Duration::ZERO).expect("admit")
        });
    });
}

fn bench_local_scorer(c: &mut Criterion) {
    let mut group = c.benchmark_group("local_scorer");
    let options = ReportOptions::default();

    for size in [4 * 1024usize, 256 * 1024, 2 * 1024 * 1024] {
        let content = vec![0x5au8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &content, |b, content| {
            b.iter(|| LocalScorer::scores_for(black_box(content), &options));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_evaluate, bench_admit, bench_local_scorer);
criterion_main!(benches);

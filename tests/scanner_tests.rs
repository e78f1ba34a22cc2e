use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use dialog_scan_rs::api::ApiError;
use dialog_scan_rs::config::ScanConfig;
use dialog_scan_rs::dialogs;
use dialog_scan_rs::report::build_report;
use dialog_scan_rs::scanner::{ScanOrchestrator, ScanProgress};
use dialog_scan_rs::sim::{SimApi, SimDialog};
use dialog_scan_rs::timeouts::TimeoutOverride;
use dialog_scan_rs::types::ScanStatus;

fn cfg(concurrency: usize, timeout_sec: u64, retries: u32) -> ScanConfig {
    ScanConfig {
        concurrency,
        default_timeout: Duration::from_secs(timeout_sec),
        max_rate_limit_retries: retries,
        pacing: Duration::ZERO,
        overrides: Vec::new(),
        leave_ids: HashSet::new(),
    }
}

fn quick_channel(id: i64, members: u64) -> SimDialog {
    let mut d = SimDialog::channel(id, &format!("channel {id}"));
    d.full.participants_count = Some(members);
    d
}

#[tokio::test(start_paused = true)]
async fn one_row_per_target_even_when_one_hangs() {
    let mut dialogs: Vec<SimDialog> = (1..=5).map(|id| quick_channel(id, 10)).collect();
    dialogs[2].hang = true;
    let api = Arc::new(SimApi::new(dialogs));

    let targets = dialogs::enumerate(api.as_ref()).await.unwrap();
    let progress = ScanProgress::new();
    let started = Instant::now();
    let outcomes = ScanOrchestrator::new(api.clone(), &cfg(2, 1, 3))
        .run(&targets, progress.clone())
        .await;
    let wall = started.elapsed();

    let report = build_report(outcomes);
    assert_eq!(report.total, 5);
    assert_eq!(report.ok, 4);
    assert_eq!(report.timed_out, 1);
    assert_eq!(
        report.records.iter().map(|r| r.id).collect::<Vec<_>>(),
        vec![1, 2, 3, 4, 5]
    );

    let hung = &report.records[2];
    assert_eq!(hung.status, ScanStatus::Timeout);
    assert!(
        (1_000..=1_200).contains(&hung.elapsed_ms),
        "timeout fired at {}ms",
        hung.elapsed_ms
    );

    // two slots, five targets: a couple of scheduling rounds plus one timeout
    assert!(wall <= Duration::from_secs(4), "scan took {wall:?}");
    assert_eq!(progress.snapshot(), (5, 5, 4, 1));
}

#[tokio::test(start_paused = true)]
async fn concurrency_cap_is_respected_and_saturated() {
    let dialogs: Vec<SimDialog> = (1..=8).map(|id| quick_channel(id, 10)).collect();
    let api = Arc::new(SimApi::new(dialogs));

    let targets = dialogs::enumerate(api.as_ref()).await.unwrap();
    let outcomes = ScanOrchestrator::new(api.clone(), &cfg(3, 5, 0))
        .run(&targets, ScanProgress::new())
        .await;

    assert_eq!(build_report(outcomes).ok, 8);
    assert!(api.peak_in_flight() <= 3);
    assert_eq!(api.peak_in_flight(), 3);
}

#[tokio::test(start_paused = true)]
async fn flood_wait_then_success_reports_ok_after_the_wait() {
    let mut d = quick_channel(1, 10);
    d.flood_waits = vec![2];
    let api = Arc::new(SimApi::new(vec![d]));

    let targets = dialogs::enumerate(api.as_ref()).await.unwrap();
    let outcomes = ScanOrchestrator::new(api.clone(), &cfg(1, 30, 3))
        .run(&targets, ScanProgress::new())
        .await;

    let report = build_report(outcomes);
    let row = &report.records[0];
    assert_eq!(row.status, ScanStatus::Ok);
    assert!(row.elapsed_ms >= 2_000, "retried before the wait: {}ms", row.elapsed_ms);
    assert!(row.elapsed_ms < 30_000);
}

#[tokio::test(start_paused = true)]
async fn flood_wait_larger_than_the_budget_times_out_immediately() {
    let mut d = quick_channel(1, 10);
    d.flood_waits = vec![60];
    let api = Arc::new(SimApi::new(vec![d]));

    let targets = dialogs::enumerate(api.as_ref()).await.unwrap();
    let outcomes = ScanOrchestrator::new(api.clone(), &cfg(1, 5, 3))
        .run(&targets, ScanProgress::new())
        .await;

    let row = &build_report(outcomes).records[0];
    assert_eq!(row.status, ScanStatus::Timeout);
    // no point sleeping 60s into a 5s budget
    assert!(row.elapsed_ms < 1_000, "slept past the budget: {}ms", row.elapsed_ms);
}

#[tokio::test(start_paused = true)]
async fn persistent_throttling_exhausts_the_retry_budget() {
    let mut d = quick_channel(1, 10);
    d.flood_waits = vec![1, 1, 1];
    let api = Arc::new(SimApi::new(vec![d]));

    let targets = dialogs::enumerate(api.as_ref()).await.unwrap();
    let outcomes = ScanOrchestrator::new(api.clone(), &cfg(1, 60, 2))
        .run(&targets, ScanProgress::new())
        .await;

    let report = build_report(outcomes);
    let row = &report.records[0];
    assert_eq!(row.status, ScanStatus::RetryExhausted);
    assert_eq!(report.retry_exhausted, 1);
    assert_eq!(report.timed_out, 0);
    assert!(row.elapsed_ms >= 2_000);
    assert_eq!(row.error.as_deref(), Some("rate limited after 3 attempts"));
}

async fn scan_ids_with_latencies(latencies: &[u64]) -> Vec<(i64, ScanStatus)> {
    let dialogs: Vec<SimDialog> = latencies
        .iter()
        .enumerate()
        .map(|(n, ms)| {
            let mut d = quick_channel(n as i64 + 1, 10);
            d.latency = Duration::from_millis(*ms);
            d
        })
        .collect();
    let api = Arc::new(SimApi::new(dialogs));
    let targets = dialogs::enumerate(api.as_ref()).await.unwrap();
    let outcomes = ScanOrchestrator::new(api.clone(), &cfg(3, 10, 0))
        .run(&targets, ScanProgress::new())
        .await;
    build_report(outcomes)
        .records
        .iter()
        .map(|r| (r.id, r.status))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn completion_order_does_not_affect_the_report() {
    let ascending = scan_ids_with_latencies(&[10, 50, 90, 130, 170, 210]).await;
    let descending = scan_ids_with_latencies(&[210, 170, 130, 90, 50, 10]).await;
    assert_eq!(ascending, descending);
    assert_eq!(
        ascending.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
        vec![1, 2, 3, 4, 5, 6]
    );
}

#[tokio::test]
async fn leave_actions_are_recorded_and_never_abort() {
    let d1 = quick_channel(1, 10);
    let mut d2 = quick_channel(2, 10);
    d2.fail_leave = true;
    let api = Arc::new(SimApi::new(vec![d1, d2]));

    let targets = dialogs::enumerate(api.as_ref()).await.unwrap();
    let mut config = cfg(1, 10, 0);
    config.leave_ids = [1i64, 2].into_iter().collect();
    let outcomes = ScanOrchestrator::new(api.clone(), &config)
        .run(&targets, ScanProgress::new())
        .await;

    let report = build_report(outcomes);
    assert_eq!(report.ok, 2);
    assert_eq!(report.records[0].left, Some(true));
    assert_eq!(report.records[1].left, Some(false));
    assert_eq!(api.left_ids(), vec![1, 2]);
}

#[tokio::test]
async fn enumeration_failure_is_fatal_and_yields_no_report() {
    let api = SimApi::new(Vec::new()).with_listing_error(ApiError::Rpc("dc down".into()));
    let err = dialogs::enumerate(&api).await.unwrap_err();
    assert_eq!(err, ApiError::Rpc("dc down".into()));
}

#[tokio::test]
async fn cancelled_scan_still_reports_every_target() {
    let dialogs: Vec<SimDialog> = (1..=3).map(|id| quick_channel(id, 10)).collect();
    let api = Arc::new(SimApi::new(dialogs));
    let targets = dialogs::enumerate(api.as_ref()).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcomes = ScanOrchestrator::new(api.clone(), &cfg(2, 10, 0))
        .run_with_cancel(&targets, ScanProgress::new(), cancel)
        .await;

    let report = build_report(outcomes);
    assert_eq!(report.total, 3);
    assert_eq!(report.failed, 3);
    for row in &report.records {
        assert_eq!(row.status, ScanStatus::Error);
        assert!(row.error.as_deref().unwrap().contains("scan cancelled"));
    }
}

#[tokio::test(start_paused = true)]
async fn timeout_overrides_grant_slow_targets_more_time() {
    let mut slow_with_override = quick_channel(1, 10);
    slow_with_override.latency = Duration::from_secs(2);
    let mut slow_without = quick_channel(2, 10);
    slow_without.latency = Duration::from_secs(2);
    let api = Arc::new(SimApi::new(vec![slow_with_override, slow_without]));

    let targets = dialogs::enumerate(api.as_ref()).await.unwrap();
    let mut config = cfg(2, 1, 0);
    config.overrides = vec![TimeoutOverride {
        name: "long-timeout".into(),
        timeout: Duration::from_secs(5),
        ids: [1i64].into_iter().collect(),
    }];
    let outcomes = ScanOrchestrator::new(api.clone(), &config)
        .run(&targets, ScanProgress::new())
        .await;

    let report = build_report(outcomes);
    assert_eq!(report.records[0].status, ScanStatus::Ok);
    assert_eq!(report.records[1].status, ScanStatus::Timeout);
}

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::api::{ApiError, DialogApi};
use crate::config::ScanConfig;
use crate::fetch::{EntityFetcher, FetchError};
use crate::timeouts::TimeoutPolicy;
use crate::types::{FetchOutcome, ScanTarget};

/// Progress counters for one scan run.
///
/// Constructed per run and passed in explicitly, so concurrent runs (e.g.
/// under test) never share mutable state.
#[derive(Clone, Debug, Default)]
pub struct ScanProgress {
    pub total: Arc<AtomicU64>,
    pub done: Arc<AtomicU64>,
    pub ok: Arc<AtomicU64>,
    pub failed: Arc<AtomicU64>,
}

impl ScanProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// (total, done, ok, failed) at this instant.
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.total.load(Ordering::Relaxed),
            self.done.load(Ordering::Relaxed),
            self.ok.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
        )
    }
}

/// One finished target, tagged with its enumeration position so the report
/// can restore a deterministic order regardless of completion order.
#[derive(Debug, Clone)]
pub struct TargetOutcome {
    pub index: usize,
    pub target: ScanTarget,
    pub outcome: FetchOutcome,
    pub elapsed: Duration,
    /// Result of the leave action, when one was configured for this id.
    pub left: Option<bool>,
}

/// Runs the fetcher over every enumerated target under a global concurrency
/// cap, enforcing per-target timeouts and flood-wait backoff, and emitting
/// exactly one outcome per target.
pub struct ScanOrchestrator {
    api: Arc<dyn DialogApi>,
    policy: TimeoutPolicy,
    concurrency: usize,
    max_retries: u32,
    pacing: Duration,
    leave_ids: HashSet<i64>,
}

impl ScanOrchestrator {
    pub fn new(api: Arc<dyn DialogApi>, cfg: &ScanConfig) -> Self {
        Self {
            api,
            policy: cfg.timeout_policy(),
            concurrency: cfg.concurrency,
            max_retries: cfg.max_rate_limit_retries,
            pacing: cfg.pacing,
            leave_ids: cfg.leave_ids.clone(),
        }
    }

    pub async fn run(&self, targets: &[ScanTarget], progress: ScanProgress) -> Vec<TargetOutcome> {
        self.run_with_cancel(targets, progress, CancellationToken::new())
            .await
    }

    /// Variant that accepts a `CancellationToken`. Cancellation stops the
    /// admission of new targets and interrupts running attempts; every target
    /// still yields exactly one outcome.
    pub async fn run_with_cancel(
        &self,
        targets: &[ScanTarget],
        progress: ScanProgress,
        cancel: CancellationToken,
    ) -> Vec<TargetOutcome> {
        progress.total.store(targets.len() as u64, Ordering::Relaxed);

        let sem = Arc::new(Semaphore::new(self.concurrency.clamp(1, 1_024)));
        let mut set = JoinSet::new();

        for (index, target) in targets.iter().cloned().enumerate() {
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = sem.clone().acquire_owned() => permit.expect("semaphore in scope"),
            };

            let fetcher = EntityFetcher::new(self.api.clone());
            let api = self.api.clone();
            let budget = self.policy.timeout_for(target.id);
            let max_retries = self.max_retries;
            let pacing = self.pacing;
            let leave = self.leave_ids.contains(&target.id);
            let cancel = cancel.clone();
            let progress = progress.clone();

            set.spawn(async move {
                let _permit = permit; // held until the task, incl. pacing, ends

                let started = Instant::now();
                let (outcome, left) = tokio::select! {
                    _ = cancel.cancelled() => (cancelled_outcome(), None),
                    outcome = scan_one(&fetcher, &target, budget, max_retries) => {
                        let left = match &outcome {
                            FetchOutcome::Success(_) if leave => Some(
                                run_leave(
                                    api.as_ref(),
                                    target.id,
                                    budget.saturating_sub(started.elapsed()),
                                )
                                .await,
                            ),
                            _ => None,
                        };
                        (outcome, left)
                    }
                };
                let elapsed = started.elapsed();

                progress.done.fetch_add(1, Ordering::Relaxed);
                match &outcome {
                    FetchOutcome::Success(_) => progress.ok.fetch_add(1, Ordering::Relaxed),
                    _ => progress.failed.fetch_add(1, Ordering::Relaxed),
                };

                // Inter-request pacing: hold the slot briefly so each slot's
                // request turnover stays below the server's comfort level.
                if !pacing.is_zero() && !cancel.is_cancelled() {
                    time::sleep(pacing).await;
                }

                TargetOutcome {
                    index,
                    target,
                    outcome,
                    elapsed,
                    left,
                }
            });
        }

        let mut outcomes: Vec<TargetOutcome> = Vec::with_capacity(targets.len());
        let mut seen = vec![false; targets.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(out) => {
                    seen[out.index] = true;
                    outcomes.push(out);
                }
                Err(e) => {
                    log::error!("scan task failed: {e}");
                }
            }
        }

        // Targets that never produced an outcome (cancelled before admission,
        // or a crashed task) still get one, keeping one row per target.
        for (index, seen) in seen.into_iter().enumerate() {
            if !seen {
                outcomes.push(TargetOutcome {
                    index,
                    target: targets[index].clone(),
                    outcome: cancelled_outcome(),
                    elapsed: Duration::ZERO,
                    left: None,
                });
            }
        }
        outcomes
    }
}

/// One target's attempt loop.
///
/// Every round races the fetch against the *remaining* share of the target's
/// total budget; flood-wait rounds sleep and retry inside that same budget, a
/// bounded number of times, without giving up the slot. The budget never
/// resets, so one throttled target cannot stall its slot indefinitely.
async fn scan_one(
    fetcher: &EntityFetcher,
    target: &ScanTarget,
    budget: Duration,
    max_retries: u32,
) -> FetchOutcome {
    let started = Instant::now();
    let mut attempts: u32 = 0;
    loop {
        let remaining = match budget.checked_sub(started.elapsed()) {
            Some(r) if !r.is_zero() => r,
            _ => return FetchOutcome::Timeout,
        };
        match time::timeout(remaining, fetcher.fetch(target)).await {
            Err(_) => return FetchOutcome::Timeout,
            Ok(Ok(detail)) => return FetchOutcome::Success(detail),
            Ok(Err(FetchError::RateLimited { seconds })) => {
                attempts += 1;
                if attempts > max_retries {
                    log::warn!(
                        "dialog {}: still throttled after {max_retries} retries",
                        target.id
                    );
                    return FetchOutcome::RetryExhausted { attempts };
                }
                let wait = Duration::from_secs(seconds);
                if started.elapsed() + wait >= budget {
                    log::debug!(
                        "dialog {}: flood wait {seconds}s does not fit the remaining budget",
                        target.id
                    );
                    return FetchOutcome::Timeout;
                }
                log::debug!(
                    "dialog {}: flood wait {seconds}s (retry {attempts}/{max_retries})",
                    target.id
                );
                time::sleep(wait).await;
            }
            Ok(Err(FetchError::Terminal(cause))) => return FetchOutcome::Failed(cause),
        }
    }
}

/// Leave hook for successfully fetched targets. Bounded by the target's
/// leftover budget; the result is recorded on the row, never propagated.
async fn run_leave(api: &dyn DialogApi, id: i64, remaining: Duration) -> bool {
    let window = remaining.max(Duration::from_secs(5));
    match time::timeout(window, api.leave_dialog(id)).await {
        Ok(Ok(())) => {
            log::info!("left dialog {id}");
            true
        }
        Ok(Err(e)) => {
            log::warn!("leaving dialog {id} failed: {e}");
            false
        }
        Err(_) => {
            log::warn!("leaving dialog {id} timed out");
            false
        }
    }
}

fn cancelled_outcome() -> FetchOutcome {
    FetchOutcome::Failed(ApiError::Rpc("scan cancelled".into()))
}

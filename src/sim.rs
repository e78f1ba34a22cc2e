//! Scripted in-memory [`DialogApi`] implementation.
//!
//! Drives the binary's demo mode and the integration tests: each dialog
//! carries a small behavior script (latency, flood waits, denials, hangs), and
//! the backend is instrumented with an in-flight gauge so tests can verify the
//! concurrency cap from the outside.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time;

use crate::api::{ApiError, DialogApi, DialogEntry, FullDialog, TopicEntry};

/// Script for one simulated dialog.
#[derive(Debug, Clone)]
pub struct SimDialog {
    pub entry: DialogEntry,
    pub full: FullDialog,
    /// Latency of the primary detail call.
    pub latency: Duration,
    /// Never resolve the primary detail call.
    pub hang: bool,
    /// Flood waits consumed one per attempt before the primary call works.
    pub flood_waits: Vec<u64>,
    /// Flood waits raised by the participant listing, one per call.
    pub participant_flood_waits: Vec<u64>,
    /// Fail the primary call terminally with this message.
    pub fail: Option<String>,
    /// Deny the primary call (field-degradation path).
    pub deny_full: bool,
    pub deny_participants: bool,
    pub deny_topics: bool,
    /// Population served to the fallback participant counter.
    pub fallback_members: Option<u64>,
    /// Topics served to the forum topic listing.
    pub topic_count: u64,
    pub fail_leave: bool,
}

impl SimDialog {
    fn base(id: i64, title: &str) -> Self {
        Self {
            entry: DialogEntry {
                id,
                title: Some(title.to_string()),
                ..DialogEntry::default()
            },
            full: FullDialog::default(),
            latency: Duration::from_millis(10),
            hang: false,
            flood_waits: Vec::new(),
            participant_flood_waits: Vec::new(),
            fail: None,
            deny_full: false,
            deny_participants: false,
            deny_topics: false,
            fallback_members: None,
            topic_count: 0,
            fail_leave: false,
        }
    }

    pub fn channel(id: i64, title: &str) -> Self {
        let mut d = Self::base(id, title);
        d.entry.broadcast = true;
        d
    }

    pub fn group(id: i64, title: &str) -> Self {
        let mut d = Self::base(id, title);
        d.entry.megagroup = true;
        d
    }

    pub fn forum(id: i64, title: &str) -> Self {
        let mut d = Self::base(id, title);
        d.entry.megagroup = true;
        d.entry.forum = true;
        d
    }

    pub fn private(id: i64, title: &str) -> Self {
        let mut d = Self::base(id, title);
        d.entry.one_to_one = true;
        d
    }
}

/// Scripted backend plus instrumentation counters.
pub struct SimApi {
    dialogs: Vec<SimDialog>,
    by_id: HashMap<i64, usize>,
    /// Titles resolvable for peers outside the listing (linked groups).
    titles: HashMap<i64, String>,
    listing_error: Mutex<Option<ApiError>>,
    flood: Mutex<HashMap<i64, VecDeque<u64>>>,
    participant_flood: Mutex<HashMap<i64, VecDeque<u64>>>,
    /// Ids of dialogs a leave call was issued for, in call order.
    pub leaves: Mutex<Vec<i64>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl SimApi {
    pub fn new(dialogs: Vec<SimDialog>) -> Self {
        let by_id = dialogs
            .iter()
            .enumerate()
            .map(|(i, d)| (d.entry.id, i))
            .collect();
        let flood = dialogs
            .iter()
            .filter(|d| !d.flood_waits.is_empty())
            .map(|d| (d.entry.id, d.flood_waits.iter().copied().collect()))
            .collect();
        let participant_flood = dialogs
            .iter()
            .filter(|d| !d.participant_flood_waits.is_empty())
            .map(|d| (d.entry.id, d.participant_flood_waits.iter().copied().collect()))
            .collect();
        Self {
            dialogs,
            by_id,
            titles: HashMap::new(),
            listing_error: Mutex::new(None),
            flood: Mutex::new(flood),
            participant_flood: Mutex::new(participant_flood),
            leaves: Mutex::new(Vec::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_listing_error(self, error: ApiError) -> Self {
        *self.listing_error.lock().unwrap() = Some(error);
        self
    }

    pub fn with_title(mut self, id: i64, title: &str) -> Self {
        self.titles.insert(id, title.to_string());
        self
    }

    /// Highest number of primary detail calls ever in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn left_ids(&self) -> Vec<i64> {
        self.leaves.lock().unwrap().clone()
    }

    fn dialog(&self, id: i64) -> Result<&SimDialog, ApiError> {
        self.by_id
            .get(&id)
            .map(|&i| &self.dialogs[i])
            .ok_or(ApiError::NotFound)
    }

    fn enter(&self) -> InFlightGuard {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlightGuard {
            gauge: self.in_flight.clone(),
        }
    }
}

/// Decrements the gauge even when the surrounding fetch is abandoned by a
/// timeout race.
struct InFlightGuard {
    gauge: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.gauge.fetch_sub(1, Ordering::SeqCst);
    }
}

fn page_of_ids(total: u64, offset: u64, limit: u64) -> Vec<i64> {
    let end = total.min(offset.saturating_add(limit));
    (offset..end).map(|i| 1_000_000 + i as i64).collect()
}

#[async_trait]
impl DialogApi for SimApi {
    async fn list_dialogs(&self) -> Result<Vec<DialogEntry>, ApiError> {
        if let Some(err) = self.listing_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self.dialogs.iter().map(|d| d.entry.clone()).collect())
    }

    async fn fetch_full(&self, id: i64) -> Result<FullDialog, ApiError> {
        let dialog = self.dialog(id)?;

        if let Some(wait) = self
            .flood
            .lock()
            .unwrap()
            .get_mut(&id)
            .and_then(|q| q.pop_front())
        {
            return Err(ApiError::FloodWait { seconds: wait });
        }
        if dialog.deny_full {
            return Err(ApiError::PermissionDenied);
        }
        if let Some(message) = &dialog.fail {
            return Err(ApiError::Rpc(message.clone()));
        }

        let _guard = self.enter();
        if dialog.hang {
            // Raced against the orchestrator's timeout; never resolves.
            std::future::pending::<()>().await;
        }
        time::sleep(dialog.latency).await;
        Ok(dialog.full.clone())
    }

    async fn participants_page(
        &self,
        id: i64,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<i64>, ApiError> {
        let dialog = self.dialog(id)?;
        if let Some(wait) = self
            .participant_flood
            .lock()
            .unwrap()
            .get_mut(&id)
            .and_then(|q| q.pop_front())
        {
            return Err(ApiError::FloodWait { seconds: wait });
        }
        if dialog.deny_participants {
            return Err(ApiError::PermissionDenied);
        }
        Ok(page_of_ids(dialog.fallback_members.unwrap_or(0), offset, limit))
    }

    async fn forum_topics_page(
        &self,
        id: i64,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<TopicEntry>, ApiError> {
        let dialog = self.dialog(id)?;
        if dialog.deny_topics {
            return Err(ApiError::PermissionDenied);
        }
        Ok(page_of_ids(dialog.topic_count, offset, limit)
            .into_iter()
            .map(|topic_id| TopicEntry {
                id: topic_id,
                title: format!("topic {topic_id}"),
            })
            .collect())
    }

    async fn resolve_title(&self, id: i64) -> Result<String, ApiError> {
        if let Some(title) = self.titles.get(&id) {
            return Ok(title.clone());
        }
        let dialog = self.dialog(id)?;
        Ok(dialog
            .entry
            .title
            .clone()
            .unwrap_or_else(|| crate::dialogs::UNTITLED.to_string()))
    }

    async fn leave_dialog(&self, id: i64) -> Result<(), ApiError> {
        let dialog = self.dialog(id)?;
        self.leaves.lock().unwrap().push(id);
        if dialog.fail_leave {
            return Err(ApiError::Rpc("leave rejected".into()));
        }
        Ok(())
    }
}

/// Deterministic directory for the binary's demo mode: a mix of kinds with a
/// few scripted misbehaviors so every status shows up in the report.
pub fn demo_directory(size: usize) -> Vec<SimDialog> {
    let mut dialogs = Vec::with_capacity(size);
    for n in 0..size {
        let id = 100 + n as i64;
        let mut dialog = match n % 4 {
            0 => {
                let mut d = SimDialog::channel(id, &format!("channel {n}"));
                d.entry.username = Some(format!("channel_{n}"));
                d.full.participants_count = Some(1_000 + 37 * n as u64);
                d.full.about = Some(format!("broadcast feed {n}"));
                d
            }
            1 => {
                let mut d = SimDialog::group(id, &format!("group {n}"));
                d.fallback_members = Some(40 + n as u64);
                d
            }
            2 => {
                let mut d = SimDialog::forum(id, &format!("forum {n}"));
                d.full.participants_count = Some(250 + n as u64);
                d.topic_count = 12;
                d
            }
            _ => {
                let mut d = SimDialog::private(id, &format!("contact {n}"));
                d.entry.last_activity = Some(1_700_000_000 + n as i64);
                d
            }
        };
        dialog.latency = Duration::from_millis(20 + (n as u64 % 7) * 15);
        // a few scripted misbehaviors, spread deterministically
        match n % 11 {
            5 => dialog.flood_waits = vec![1],
            7 => dialog.hang = true,
            9 => dialog.fail = Some("peer id invalid".into()),
            _ => {}
        }
        dialogs.push(dialog);
    }
    dialogs
}

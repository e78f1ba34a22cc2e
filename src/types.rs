use std::fmt;

use serde::{Deserialize, Serialize};

use crate::api::ApiError;

/// Kind of a scanned dialog. Fixed once at enumeration time; the fetch path
/// never re-probes what a dialog is.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// Broadcast channel.
    Channel,
    /// Basic group or supergroup (megagroup).
    Group,
    /// Supergroup with forum topics enabled.
    ForumSupergroup,
    /// One-to-one conversation.
    Private,
}

impl TargetKind {
    /// Short label used in the text report.
    pub fn label(&self) -> &'static str {
        match self {
            TargetKind::Channel => "channel",
            TargetKind::Group => "group",
            TargetKind::ForumSupergroup => "forum",
            TargetKind::Private => "private",
        }
    }
}

/// One dialog selected for scanning, carrying everything the listing already
/// told us so later stages never have to re-fetch it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScanTarget {
    pub id: i64,
    pub kind: TargetKind,
    pub title: String,
    pub username: Option<String>,
    /// Unix seconds of the newest activity seen in the dialog listing.
    pub last_activity: Option<i64>,
    /// Participant count already present in the listing, if any.
    pub member_hint: Option<u64>,
}

impl ScanTarget {
    pub fn is_public(&self) -> bool {
        self.username.is_some()
    }

    /// Link to the dialog: `https://t.me/<username>` for public dialogs,
    /// `tg://resolve?domain=<id>` otherwise.
    pub fn link(&self) -> String {
        match &self.username {
            Some(name) => format!("https://t.me/{name}"),
            None => format!("tg://resolve?domain={}", self.id),
        }
    }
}

/// A possibly-partial count. `AtLeast` means an enumeration ceiling was hit;
/// `Unavailable` means the server refused access to the number.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CountEstimate {
    Exact(u64),
    AtLeast(u64),
    Unavailable,
}

impl CountEstimate {
    /// Numeric key for descending presentation sorts. Unknown counts sort last.
    pub fn sort_key(&self) -> u64 {
        match self {
            CountEstimate::Exact(n) | CountEstimate::AtLeast(n) => *n,
            CountEstimate::Unavailable => 0,
        }
    }
}

impl fmt::Display for CountEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CountEstimate::Exact(n) => write!(f, "{n}"),
            CountEstimate::AtLeast(n) => write!(f, ">{n}"),
            CountEstimate::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Detail payload of one successful fetch.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DialogDetail {
    pub about: Option<String>,
    pub participants: CountEstimate,
    /// Unix seconds of dialog creation, when the server reports it.
    pub created: Option<i64>,
    /// Title of the linked discussion group, for channels that have one.
    pub linked_title: Option<String>,
    /// Topic count for forum supergroups.
    pub topics: Option<CountEstimate>,
}

/// Final accepted outcome for one target. Intermediate flood-wait rounds are
/// absorbed by the orchestrator's retry loop and never surface here.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Success(DialogDetail),
    Timeout,
    RetryExhausted { attempts: u32 },
    Failed(ApiError),
}

/// Status column of the report.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Ok,
    Timeout,
    RetryExhausted,
    Error,
}

impl ScanStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ScanStatus::Ok => "ok",
            ScanStatus::Timeout => "timeout",
            ScanStatus::RetryExhausted => "retry_exhausted",
            ScanStatus::Error => "error",
        }
    }
}

/// One report row. Identity fields are always present; rows for targets that
/// never produced a payload keep the listing metadata and carry a status flag
/// instead, so consumers never special-case a missing row.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScanRecord {
    pub id: i64,
    pub kind: TargetKind,
    pub title: String,
    pub username: Option<String>,
    pub link: String,
    pub is_public: bool,
    pub status: ScanStatus,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participants: Option<CountEstimate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topics: Option<CountEstimate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linked_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Result of the leave action, when one was configured for this id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left: Option<bool>,
    pub scanned_at: String,
}

/// Aggregate report: summary counters plus one record per enumerated target,
/// in enumeration order.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ScanReport {
    pub total: u64,
    pub ok: u64,
    pub timed_out: u64,
    pub retry_exhausted: u64,
    pub failed: u64,
    pub generated_at: String,
    pub records: Vec<ScanRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_estimate_sort_keys() {
        assert_eq!(CountEstimate::Exact(42).sort_key(), 42);
        assert_eq!(CountEstimate::AtLeast(10_000).sort_key(), 10_000);
        assert_eq!(CountEstimate::Unavailable.sort_key(), 0);
    }

    #[test]
    fn count_estimate_display() {
        assert_eq!(CountEstimate::Exact(7).to_string(), "7");
        assert_eq!(CountEstimate::AtLeast(10_000).to_string(), ">10000");
        assert_eq!(CountEstimate::Unavailable.to_string(), "unavailable");
    }

    #[test]
    fn links_for_public_and_private_dialogs() {
        let public = ScanTarget {
            id: 1,
            kind: TargetKind::Channel,
            title: "news".into(),
            username: Some("daily_news".into()),
            last_activity: None,
            member_hint: None,
        };
        assert!(public.is_public());
        assert_eq!(public.link(), "https://t.me/daily_news");

        let private = ScanTarget {
            username: None,
            ..public
        };
        assert!(!private.is_public());
        assert_eq!(private.link(), "tg://resolve?domain=1");
    }
}

use async_trait::async_trait;
use thiserror::Error;

/// Error surface of the remote API.
///
/// `FloodWait` is the only retryable variant; `PermissionDenied` and
/// `NotFound` degrade a single field of the fetch; everything else is terminal
/// for the current target.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The account is throttled; the server asks us to wait before retrying.
    #[error("flood wait: retry in {seconds}s")]
    FloodWait { seconds: u64 },
    /// The account lacks the rights for this lookup.
    #[error("permission denied")]
    PermissionDenied,
    #[error("peer not found")]
    NotFound,
    #[error("rpc error: {0}")]
    Rpc(String),
}

/// Raw entry from the dialog listing, before classification.
///
/// The listing is the only place kind flags are inspected; downstream code
/// works with the closed [`crate::types::TargetKind`] set instead.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DialogEntry {
    pub id: i64,
    pub title: Option<String>,
    pub username: Option<String>,
    pub broadcast: bool,
    pub megagroup: bool,
    pub forum: bool,
    pub basic_group: bool,
    pub one_to_one: bool,
    /// Unix seconds of the newest message in the dialog, if listed.
    pub last_activity: Option<i64>,
    /// Participant count the listing already knows, if any.
    pub member_hint: Option<u64>,
}

/// Full dialog info returned by the primary detail lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FullDialog {
    pub about: Option<String>,
    pub participants_count: Option<u64>,
    /// Unix seconds of dialog creation.
    pub created: Option<i64>,
    /// Discussion group linked to a broadcast channel.
    pub linked_id: Option<i64>,
}

/// One forum topic as returned by the topic listing.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicEntry {
    pub id: i64,
    pub title: String,
}

/// Opaque fetch primitive for the remote service.
///
/// A single shared connection backs all concurrent calls; callers bound their
/// own concurrency. The rate limit behind `FloodWait` is account-wide, so any
/// call may raise it regardless of which dialog triggered the throttle.
#[async_trait]
pub trait DialogApi: Send + Sync {
    /// List every dialog visible to the account, in listing order.
    async fn list_dialogs(&self) -> Result<Vec<DialogEntry>, ApiError>;

    /// Primary detail lookup for one dialog.
    async fn fetch_full(&self, id: i64) -> Result<FullDialog, ApiError>;

    /// One page of participant ids, used for fallback counting when the
    /// direct count is unavailable.
    async fn participants_page(
        &self,
        id: i64,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<i64>, ApiError>;

    /// One page of forum topics.
    async fn forum_topics_page(
        &self,
        id: i64,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<TopicEntry>, ApiError>;

    /// Resolve a peer's title (used for linked discussion groups).
    async fn resolve_title(&self, id: i64) -> Result<String, ApiError>;

    /// Leave the given dialog.
    async fn leave_dialog(&self, id: i64) -> Result<(), ApiError>;
}

use std::sync::Arc;

use thiserror::Error;

use crate::api::{ApiError, DialogApi};
use crate::types::{CountEstimate, DialogDetail, ScanTarget, TargetKind};

/// Hard ceiling for fallback participant counting.
pub const PARTICIPANT_COUNT_CEILING: u64 = 10_000;
/// Page size for fallback participant counting.
const PARTICIPANT_PAGE: u64 = 200;
/// Page size for forum topic listing.
const TOPIC_PAGE: u64 = 100;
/// Pages of topics fetched before giving up with a partial count.
pub const TOPIC_PAGE_CAP: u64 = 20;

/// How one fetch attempt ended, short of success.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The account is throttled. The orchestrator owns the backoff; the
    /// fetcher never sleeps.
    #[error("rate limited for {seconds}s")]
    RateLimited { seconds: u64 },
    #[error("{0}")]
    Terminal(ApiError),
}

/// Gathers the consolidated detail record for one dialog.
///
/// All lookups run against the shared [`DialogApi`]. A flood wait anywhere
/// abandons the remaining sub-lookups for this attempt; a retry re-runs the
/// whole fetch from scratch. `fetch` is idempotent, so that is safe.
pub struct EntityFetcher {
    api: Arc<dyn DialogApi>,
}

impl EntityFetcher {
    pub fn new(api: Arc<dyn DialogApi>) -> Self {
        Self { api }
    }

    pub async fn fetch(&self, target: &ScanTarget) -> Result<DialogDetail, FetchError> {
        let full = match self.api.fetch_full(target.id).await {
            Ok(full) => Some(full),
            Err(ApiError::FloodWait { seconds }) => {
                return Err(FetchError::RateLimited { seconds })
            }
            Err(ApiError::PermissionDenied) => {
                log::debug!("full info denied for dialog {}", target.id);
                None
            }
            Err(e) => return Err(FetchError::Terminal(e)),
        };

        let direct = full
            .as_ref()
            .and_then(|f| f.participants_count)
            .or(target.member_hint);
        let participants = match direct {
            Some(n) => CountEstimate::Exact(n),
            None if matches!(target.kind, TargetKind::Group | TargetKind::ForumSupergroup) => {
                self.count_participants(target.id).await?
            }
            None => CountEstimate::Unavailable,
        };

        let linked_title = match full.as_ref().and_then(|f| f.linked_id) {
            Some(linked) => self.resolve_linked(linked).await?,
            None => None,
        };

        let topics = if target.kind == TargetKind::ForumSupergroup {
            Some(self.count_topics(target.id).await?)
        } else {
            None
        };

        Ok(DialogDetail {
            about: full.as_ref().and_then(|f| f.about.clone()),
            participants,
            created: full.as_ref().and_then(|f| f.created),
            linked_title,
            topics,
        })
    }

    /// Count members by paged enumeration when no direct count exists.
    /// Stops at [`PARTICIPANT_COUNT_CEILING`] and reports a partial count.
    async fn count_participants(&self, id: i64) -> Result<CountEstimate, FetchError> {
        let mut counted: u64 = 0;
        loop {
            let page = match self
                .api
                .participants_page(id, counted, PARTICIPANT_PAGE)
                .await
            {
                Ok(page) => page,
                Err(ApiError::FloodWait { seconds }) => {
                    return Err(FetchError::RateLimited { seconds })
                }
                Err(ApiError::PermissionDenied) | Err(ApiError::NotFound) => {
                    log::debug!("participant listing denied for dialog {id}");
                    return Ok(CountEstimate::Unavailable);
                }
                Err(e) => return Err(FetchError::Terminal(e)),
            };
            counted += page.len() as u64;
            if counted >= PARTICIPANT_COUNT_CEILING {
                return Ok(CountEstimate::AtLeast(PARTICIPANT_COUNT_CEILING));
            }
            if (page.len() as u64) < PARTICIPANT_PAGE {
                return Ok(CountEstimate::Exact(counted));
            }
        }
    }

    async fn resolve_linked(&self, id: i64) -> Result<Option<String>, FetchError> {
        match self.api.resolve_title(id).await {
            Ok(title) => Ok(Some(title)),
            Err(ApiError::FloodWait { seconds }) => Err(FetchError::RateLimited { seconds }),
            Err(ApiError::PermissionDenied) | Err(ApiError::NotFound) => {
                log::debug!("linked dialog {id} could not be resolved");
                Ok(None)
            }
            Err(e) => Err(FetchError::Terminal(e)),
        }
    }

    /// Topic listing with an explicit page cap so a misbehaving server cannot
    /// drag one target through unbounded pagination.
    async fn count_topics(&self, id: i64) -> Result<CountEstimate, FetchError> {
        let mut counted: u64 = 0;
        for _ in 0..TOPIC_PAGE_CAP {
            let page = match self.api.forum_topics_page(id, counted, TOPIC_PAGE).await {
                Ok(page) => page,
                Err(ApiError::FloodWait { seconds }) => {
                    return Err(FetchError::RateLimited { seconds })
                }
                Err(ApiError::PermissionDenied) | Err(ApiError::NotFound) => {
                    log::debug!("topic listing denied for dialog {id}");
                    return Ok(CountEstimate::Unavailable);
                }
                Err(e) => return Err(FetchError::Terminal(e)),
            };
            counted += page.len() as u64;
            if (page.len() as u64) < TOPIC_PAGE {
                return Ok(CountEstimate::Exact(counted));
            }
        }
        Ok(CountEstimate::AtLeast(counted))
    }
}

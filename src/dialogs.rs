use crate::api::{ApiError, DialogApi, DialogEntry};
use crate::types::{ScanTarget, TargetKind};

/// Title used when the listing carries none.
pub const UNTITLED: &str = "(untitled)";

/// List and classify every scannable dialog, preserving listing order.
///
/// Only the listing call itself is fatal. Entries whose flags identify nothing
/// scannable are skipped with a diagnostic, not propagated.
pub async fn enumerate(api: &dyn DialogApi) -> Result<Vec<ScanTarget>, ApiError> {
    let entries = api.list_dialogs().await?;
    log::info!("dialog listing returned {} entries", entries.len());

    let mut targets = Vec::with_capacity(entries.len());
    let mut skipped = 0usize;
    for entry in entries {
        let Some(kind) = classify(&entry) else {
            skipped += 1;
            log::debug!(
                "skipping unclassifiable dialog id={} title={:?}",
                entry.id,
                entry.title
            );
            continue;
        };
        targets.push(ScanTarget {
            id: entry.id,
            kind,
            title: entry.title.unwrap_or_else(|| UNTITLED.to_string()),
            username: entry.username,
            last_activity: entry.last_activity,
            member_hint: entry.member_hint,
        });
    }

    if skipped > 0 {
        log::info!("skipped {skipped} unclassifiable dialog entries");
    }
    log::info!("{} dialogs selected for scanning", targets.len());
    Ok(targets)
}

/// Flag precedence: one-to-one beats everything, forum beats broadcast, and a
/// megagroup without the forum flag is an ordinary group.
fn classify(entry: &DialogEntry) -> Option<TargetKind> {
    if entry.one_to_one {
        Some(TargetKind::Private)
    } else if entry.forum {
        Some(TargetKind::ForumSupergroup)
    } else if entry.broadcast {
        Some(TargetKind::Channel)
    } else if entry.megagroup || entry.basic_group {
        Some(TargetKind::Group)
    } else {
        None
    }
}

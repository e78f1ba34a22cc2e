use std::fs::File;
use std::path::Path;

use ::time::{format_description::well_known, OffsetDateTime};
use anyhow::Result;

use crate::scanner::TargetOutcome;
use crate::types::{CountEstimate, FetchOutcome, ScanRecord, ScanReport, ScanStatus};

/// RFC3339 UTC timestamp for report stamping.
pub fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

/// Assemble the final report from the orchestrator's outcomes.
///
/// Membership and order are a deterministic function of the enumeration:
/// outcomes arrive in completion order and are restored to enumeration order
/// here, and every target gets exactly one record, placeholder or not.
pub fn build_report(mut outcomes: Vec<TargetOutcome>) -> ScanReport {
    outcomes.sort_by_key(|o| o.index);
    let stamp = now_rfc3339();

    let mut report = ScanReport {
        total: outcomes.len() as u64,
        generated_at: stamp.clone(),
        ..ScanReport::default()
    };
    for outcome in outcomes {
        let record = to_record(outcome, &stamp);
        match record.status {
            ScanStatus::Ok => report.ok += 1,
            ScanStatus::Timeout => report.timed_out += 1,
            ScanStatus::RetryExhausted => report.retry_exhausted += 1,
            ScanStatus::Error => report.failed += 1,
        }
        report.records.push(record);
    }
    report
}

fn to_record(outcome: TargetOutcome, stamp: &str) -> ScanRecord {
    let TargetOutcome {
        target,
        outcome,
        elapsed,
        left,
        ..
    } = outcome;

    let mut record = ScanRecord {
        id: target.id,
        kind: target.kind,
        title: target.title.clone(),
        username: target.username.clone(),
        link: target.link(),
        is_public: target.is_public(),
        status: ScanStatus::Error,
        elapsed_ms: elapsed.as_millis() as u64,
        about: None,
        participants: None,
        topics: None,
        linked_title: None,
        created: None,
        last_activity: target.last_activity,
        error: None,
        left,
        scanned_at: stamp.to_string(),
    };

    match outcome {
        FetchOutcome::Success(detail) => {
            record.status = ScanStatus::Ok;
            record.about = detail.about;
            record.participants = Some(detail.participants);
            record.topics = detail.topics;
            record.linked_title = detail.linked_title;
            record.created = detail.created;
        }
        FetchOutcome::Timeout => {
            record.status = ScanStatus::Timeout;
        }
        FetchOutcome::RetryExhausted { attempts } => {
            record.status = ScanStatus::RetryExhausted;
            record.error = Some(format!("rate limited after {attempts} attempts"));
        }
        FetchOutcome::Failed(cause) => {
            record.status = ScanStatus::Error;
            record.error = Some(cause.to_string());
        }
    }

    // Placeholder rows still show the member count the listing already knew.
    if record.participants.is_none() {
        record.participants = target.member_hint.map(CountEstimate::Exact);
    }
    record
}

/// Presentation sort: descending member count, unknown counts treated as
/// zero, ids as a stable tie-break. Returns a new vector; the report itself
/// keeps enumeration order.
pub fn sorted_by_participants(report: &ScanReport) -> Vec<ScanRecord> {
    let mut rows = report.records.clone();
    rows.sort_by(|a, b| {
        let ka = a.participants.map(|c| c.sort_key()).unwrap_or(0);
        let kb = b.participants.map(|c| c.sort_key()).unwrap_or(0);
        kb.cmp(&ka).then_with(|| a.id.cmp(&b.id))
    });
    rows
}

/// Write the report as pretty JSON.
pub fn write_json(path: impl AsRef<Path>, report: &ScanReport) -> Result<()> {
    let file = File::create(path.as_ref())?;
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}

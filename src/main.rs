use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use dialog_scan_rs::config::ScanConfig;
use dialog_scan_rs::dialogs;
use dialog_scan_rs::report::{self, sorted_by_participants};
use dialog_scan_rs::scanner::{ScanOrchestrator, ScanProgress};
use dialog_scan_rs::sim::{self, SimApi};
use dialog_scan_rs::types::ScanRecord;

/// dialog-scan-rs — Resilient async Telegram dialog scanner with bounded
/// concurrency and flood-wait aware retries.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "dialog-scan-rs",
    version,
    about = "Resilient async Telegram dialog scanner with bounded concurrency and flood-wait aware retries.",
    long_about = None
)]
struct Cli {
    /// Path to the JSON config file.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Write the report as pretty JSON to this path (optional).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Override the configured concurrency cap.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Size of the built-in demo directory to scan. A production deployment
    /// plugs its own `DialogApi` into the library instead.
    #[arg(long = "demo-size", default_value_t = 24)]
    demo_size: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut cfg = ScanConfig::load(&cli.config);
    if let Some(c) = cli.concurrency {
        if c > 0 {
            cfg.concurrency = c;
        }
    }

    log::info!("dialog-scan-rs configuration:");
    log::info!("  config             : {}", cli.config.display());
    log::info!("  concurrency        : {}", cfg.concurrency);
    log::info!("  default timeout    : {:?}", cfg.default_timeout);
    log::info!("  rate-limit retries : {}", cfg.max_rate_limit_retries);
    log::info!("  pacing             : {:?}", cfg.pacing);
    for o in &cfg.overrides {
        log::info!(
            "  timeout override {:?}: {:?} for {} ids",
            o.name,
            o.timeout,
            o.ids.len()
        );
    }
    if !cfg.leave_ids.is_empty() {
        log::info!("  leave after scan   : {} ids", cfg.leave_ids.len());
    }

    let api = Arc::new(SimApi::new(sim::demo_directory(cli.demo_size)));

    let targets = dialogs::enumerate(api.as_ref())
        .await
        .context("failed to enumerate dialogs")?;

    // Ctrl-C cancels the scan; every target still gets a report row.
    let cancel = CancellationToken::new();
    let cancel_ctrlc = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        log::warn!("interrupt received, cancelling scan");
        cancel_ctrlc.cancel();
    });

    let progress = ScanProgress::new();
    let orchestrator = ScanOrchestrator::new(api.clone(), &cfg);
    let outcomes = orchestrator
        .run_with_cancel(&targets, progress.clone(), cancel)
        .await;

    let report = report::build_report(outcomes);
    print_report_table(&sorted_by_participants(&report));

    log::info!(
        "scan finished: {} dialogs, ok {}, timeout {}, retry_exhausted {}, error {}",
        report.total,
        report.ok,
        report.timed_out,
        report.retry_exhausted,
        report.failed
    );

    if let Some(path) = cli.output.as_deref() {
        report::write_json(path, &report)
            .with_context(|| format!("failed to write JSON report to {}", path.display()))?;
        log::info!("wrote JSON report to {}", path.display());
    }

    Ok(())
}

fn print_report_table(rows: &[ScanRecord]) {
    let mut title_w = "title".len();
    let mut members_w = "members".len();
    let mut status_w = "status".len();
    for r in rows {
        title_w = title_w.max(r.title.len().min(40));
        members_w = members_w.max(members_cell(r).len());
        status_w = status_w.max(r.status.label().len());
    }
    let kind_w = "kind".len().max(7);
    let lat_w = "elapsed_ms".len();

    println!("\nScanned dialogs: {}", rows.len());
    println!(
        "{:<title_w$}  {:<kind_w$}  {:>members_w$}  {:<status_w$}  {:>lat_w$}",
        "title",
        "kind",
        "members",
        "status",
        "elapsed_ms",
        title_w = title_w,
        kind_w = kind_w,
        members_w = members_w,
        status_w = status_w,
        lat_w = lat_w
    );
    println!(
        "{:-<title_w$}  {:-<kind_w$}  {:-<members_w$}  {:-<status_w$}  {:-<lat_w$}",
        "",
        "",
        "",
        "",
        "",
        title_w = title_w,
        kind_w = kind_w,
        members_w = members_w,
        status_w = status_w,
        lat_w = lat_w
    );
    for r in rows {
        let mut title = r.title.clone();
        if title.len() > 40 {
            title.truncate(40);
        }
        println!(
            "{:<title_w$}  {:<kind_w$}  {:>members_w$}  {:<status_w$}  {:>lat_w$}",
            title,
            r.kind.label(),
            members_cell(r),
            r.status.label(),
            r.elapsed_ms,
            title_w = title_w,
            kind_w = kind_w,
            members_w = members_w,
            status_w = status_w,
            lat_w = lat_w
        );
    }
}

fn members_cell(r: &ScanRecord) -> String {
    r.participants
        .map(|c| c.to_string())
        .unwrap_or_else(|| "-".to_string())
}

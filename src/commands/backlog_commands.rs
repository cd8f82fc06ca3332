use std::path::PathBuf;

use anyhow::Context;

use crate::services::directory_window::buckets_since;
use crate::services::orchestrator::{self, BacklogReport};
use crate::state::AppContext;

/// Month directories from `since` through the current month that exist under the root.
pub fn backlog_dirs(ctx: &AppContext, since: &str, today: chrono::NaiveDate) -> Vec<PathBuf> {
    buckets_since(since, today)
        .into_iter()
        .map(|bucket| ctx.root().join(bucket))
        .filter(|dir| dir.is_dir())
        .collect()
}

pub async fn backlog(ctx: &AppContext, since: Option<&str>) -> anyhow::Result<()> {
    let since = since.unwrap_or(ctx.settings.processing.backlog_since.as_str());
    anyhow::ensure!(
        since.len() == 6 && since.chars().all(|c| c.is_ascii_digit()),
        "start month must be YYYYMM, got {since:?}"
    );

    let dirs = backlog_dirs(ctx, since, chrono::Local::now().date_naive());
    println!("Reconciling {} month directories since {since}", dirs.len());

    let report = orchestrator::reconcile_directories(ctx, &dirs)
        .await
        .context("backlog pass failed")?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &BacklogReport) {
    println!(
        "Handled {} files, deferred {}, failed {}",
        report.ingested, report.deferred, report.failed
    );
    println!(
        "Staged units: {} promoted, {} waiting, {} failed",
        report.promotion.promoted, report.promotion.waiting, report.promotion.failed
    );
    for (dir, remaining) in &report.remaining {
        println!("Missing from {}: {remaining} files", dir.display());
    }
}

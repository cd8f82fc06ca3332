use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::data::repository;
use crate::error::AppError;
use crate::services::directory_window::DirectoryWindow;
use crate::services::ingestion_service::{EmptyPolicy, IngestOutcome, PromotionSummary};
use crate::services::missing_files;
use crate::services::readiness::Readiness;
use crate::services::watch_service::{self, WatchHandle};
use crate::state::AppContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Rotating,
    BacklogScan,
    Watching,
    CloseWatchers,
    ShutDown,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BacklogReport {
    pub ingested: usize,
    pub deferred: usize,
    pub failed: usize,
    pub promotion: PromotionSummary,
    /// Files still without a sample row after the pass, per directory.
    pub remaining: Vec<(PathBuf, usize)>,
}

/// Sleeps unless cancelled first. Returns false on cancellation.
pub async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    pause_until(Instant::now() + duration, cancel).await
}

/// Sleeps until `deadline` unless cancelled first. A deadline already in the past
/// returns at once.
pub async fn pause_until(deadline: Instant, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep_until(deadline) => true,
    }
}

/// Runs the blocking engine off the async workers.
pub async fn ingest_blocking(
    ctx: &AppContext,
    path: PathBuf,
    policy: EmptyPolicy,
) -> Result<IngestOutcome, AppError> {
    let engine = ctx.engine.clone();
    tokio::task::spawn_blocking(move || engine.ingest_with(&path, policy))
        .await
        .map_err(|e| AppError::General(format!("ingest task failed: {e}")))?
}

async fn missing_in(ctx: &AppContext, dir: &Path) -> Result<Vec<String>, AppError> {
    let db = ctx.db.clone();
    let dir = dir.to_path_buf();
    let extension = ctx.settings.processing.extension.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().unwrap_or_else(|p| p.into_inner());
        missing_files::find_missing(&conn, &dir, &extension)
    })
    .await
    .map_err(|e| AppError::General(format!("scan task failed: {e}")))?
}

/// Gate and ingest every missing file of `dirs`, then try every staged unit once.
pub async fn reconcile_directories(
    ctx: &AppContext,
    dirs: &[PathBuf],
) -> Result<BacklogReport, AppError> {
    let mut report = BacklogReport::default();

    'dirs: for dir in dirs {
        let missing = missing_in(ctx, dir).await?;
        info!(dir = %dir.display(), missing = missing.len(), "Backlog scan");

        for name in missing {
            if ctx.cancel.is_cancelled() {
                break 'dirs;
            }
            let path = dir.join(&name);
            match ctx.gate.check(&path, &ctx.cancel).await? {
                Readiness::Ready(ready) => match ingest_blocking(ctx, ready, EmptyPolicy::BySize).await {
                    Ok(outcome) => {
                        debug!(file = %name, outcome = ?outcome, "Backlog file handled");
                        report.ingested += 1;
                    }
                    Err(e) => {
                        error!(file = %path.display(), error = %e, "Backlog ingest failed");
                        report.failed += 1;
                    }
                },
                Readiness::Cancelled => break 'dirs,
                Readiness::AlreadyProcessed => {}
                Readiness::Missing | Readiness::Locked => report.deferred += 1,
            }
        }
    }

    if ctx.cancel.is_cancelled() {
        return Ok(report);
    }

    let engine = ctx.engine.clone();
    let today = chrono::Local::now().date_naive();
    report.promotion = tokio::task::spawn_blocking(move || engine.promote_pending(today))
        .await
        .map_err(|e| AppError::General(format!("promotion task failed: {e}")))??;

    for dir in dirs {
        let remaining = missing_in(ctx, dir).await?.len();
        info!(dir = %dir.display(), remaining, "Missing after backlog pass");
        report.remaining.push((dir.clone(), remaining));
    }
    Ok(report)
}

/// Handles one watcher discovery: settle, gate, settle again, ingest.
pub async fn process_discovered(ctx: Arc<AppContext>, path: PathBuf) {
    let processing = &ctx.settings.processing;
    if !processing.matches_extension(&path) {
        return;
    }
    if !pause(processing.file_wait(), &ctx.cancel).await {
        return;
    }

    let ready = match ctx.gate.check(&path, &ctx.cancel).await {
        Ok(Readiness::Ready(ready)) => ready,
        Ok(other) => {
            debug!(file = %path.display(), readiness = ?other, "Not ingesting now");
            return;
        }
        Err(e) => {
            error!(file = %path.display(), error = %e, "Readiness check failed");
            return;
        }
    };

    if !pause(processing.settle(), &ctx.cancel).await {
        return;
    }
    match ingest_blocking(&ctx, ready, EmptyPolicy::BySize).await {
        Ok(outcome) => info!(file = %path.display(), outcome = ?outcome, "Ingested"),
        Err(e) => error!(file = %path.display(), error = %e, "Ingest failed"),
    }
}

/// Drains the discovery queue until it closes or the token fires, then waits for
/// in-flight files to finish or abandon their waits.
pub async fn consume_queue(ctx: Arc<AppContext>, mut queue: UnboundedReceiver<PathBuf>) {
    let mut in_flight = JoinSet::new();
    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            next = queue.recv() => match next {
                Some(path) => {
                    in_flight.spawn(process_discovered(ctx.clone(), path));
                }
                None => break,
            },
            Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = done {
                    error!(error = %e, "File task panicked");
                }
            }
        }
    }
    while let Some(done) = in_flight.join_next().await {
        if let Err(e) = done {
            error!(error = %e, "File task panicked");
        }
    }
    debug!("Queue consumer stopped");
}

fn open_watchers(
    dirs: &[PathBuf],
    queue: &tokio::sync::mpsc::UnboundedSender<PathBuf>,
) -> Vec<WatchHandle> {
    dirs.iter()
        .filter(|dir| dir.is_dir())
        .filter_map(|dir| match watch_service::start_watching(dir, queue.clone()) {
            Ok(handle) => {
                info!(dir = %dir.display(), "Watching");
                Some(handle)
            }
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Could not watch directory");
                None
            }
        })
        .collect()
}

/// Rotation, backlog and watching until the context is cancelled.
pub async fn run(ctx: Arc<AppContext>) -> Result<(), AppError> {
    let (queue_tx, queue_rx) = unbounded_channel::<PathBuf>();
    let consumer = tokio::spawn(consume_queue(ctx.clone(), queue_rx));

    let root = ctx.root().to_path_buf();
    let mut phase = Phase::Rotating;
    let mut window = DirectoryWindow::now();
    let mut rotate_at = Instant::now();
    let mut watchers: Vec<WatchHandle> = Vec::new();

    loop {
        if ctx.cancel.is_cancelled() && phase != Phase::CloseWatchers {
            phase = if watchers.is_empty() {
                Phase::ShutDown
            } else {
                Phase::CloseWatchers
            };
        }
        debug!(phase = ?phase, "Orchestrator phase");

        phase = match phase {
            Phase::Rotating => {
                window = DirectoryWindow::now();
                rotate_at = Instant::now() + window.until_rotation();
                info!(
                    buckets = ?window.buckets(),
                    until_rotation_secs = window.until_rotation().as_secs(),
                    "Directory window"
                );
                Phase::BacklogScan
            }
            Phase::BacklogScan => {
                match reconcile_directories(&ctx, &window.backlog_paths(&root)).await {
                    Ok(report) => info!(
                        ingested = report.ingested,
                        deferred = report.deferred,
                        failed = report.failed,
                        promoted = report.promotion.promoted,
                        "Backlog pass finished"
                    ),
                    Err(e) => error!(error = %e, "Backlog pass failed"),
                }
                Phase::Watching
            }
            Phase::Watching => {
                watchers = open_watchers(&window.paths(&root), &queue_tx);
                pause_until(rotate_at, &ctx.cancel).await;
                Phase::CloseWatchers
            }
            Phase::CloseWatchers => {
                for handle in watchers.drain(..) {
                    watch_service::stop_watching(handle);
                }
                if ctx.cancel.is_cancelled() {
                    Phase::ShutDown
                } else {
                    Phase::Rotating
                }
            }
            Phase::ShutDown => break,
        };
    }

    drop(queue_tx);
    consumer
        .await
        .map_err(|e| AppError::General(format!("consumer task failed: {e}")))?;
    info!("Orchestrator shut down");
    Ok(())
}

/// Committed-vs-on-disk counts for one month bucket.
pub fn month_status(ctx: &AppContext, bucket: &str) -> Result<(usize, usize), AppError> {
    let dir = ctx.root().join(bucket);
    let extension = &ctx.settings.processing.extension;
    let on_disk = missing_files::list_instrument_files(&dir, extension).len();
    let conn = ctx.db.lock().unwrap_or_else(|p| p.into_inner());
    let missing = missing_files::find_missing(&conn, &dir, extension)?.len();
    Ok((on_disk, missing))
}

/// Months that have committed projects.
pub fn known_months(ctx: &AppContext) -> Result<Vec<String>, AppError> {
    let conn = ctx.db.lock().unwrap_or_else(|p| p.into_inner());
    repository::project_months(&conn)
}

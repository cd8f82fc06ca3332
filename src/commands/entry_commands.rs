use std::path::{Path, PathBuf};

use tracing::error;

use crate::services::ingestion_service::{CommitOutcome, EmptyPolicy, IngestOutcome};
use crate::services::orchestrator;
use crate::services::readiness::Readiness;
use crate::state::AppContext;

fn describe_commit(outcome: &CommitOutcome) -> String {
    match outcome {
        CommitOutcome::Committed { project_id } => format!("added to project {project_id}"),
        CommitOutcome::NewProject {
            project_id,
            promoted,
        } if promoted.is_empty() => format!("created project {project_id}"),
        CommitOutcome::NewProject {
            project_id,
            promoted,
        } => format!(
            "created project {project_id}, promoted {} staged samples",
            promoted.len()
        ),
        CommitOutcome::Staged { unit } => format!("no fitting project yet, staged as {unit}"),
        CommitOutcome::Duplicate => "already in database".to_string(),
    }
}

pub fn describe(outcome: &IngestOutcome) -> String {
    match outcome {
        IngestOutcome::Stored(commit) => describe_commit(commit),
        IngestOutcome::Corrupt(CommitOutcome::Duplicate) => {
            "corrupt, already in database".to_string()
        }
        IngestOutcome::Corrupt(commit) => format!("recorded as corrupt, {}", describe_commit(commit)),
        IngestOutcome::EmptyForInspection => {
            "no scans but above size threshold, logged for inspection".to_string()
        }
    }
}

/// Resolves a user-supplied file, also looking in sibling month directories.
fn locate(ctx: &AppContext, file: &Path) -> Option<PathBuf> {
    if !ctx.settings.processing.matches_extension(file) {
        println!(
            "{}: not a .{} file, skipped",
            file.display(),
            ctx.settings.processing.extension
        );
        return None;
    }
    let found = ctx.gate.resolve(file);
    if found.is_none() {
        println!("{}: file not found", file.display());
    }
    found
}

pub async fn insert(ctx: &AppContext, files: &[PathBuf], policy: EmptyPolicy) -> anyhow::Result<()> {
    let mut failed = 0usize;
    for file in files {
        let Some(path) = locate(ctx, file) else {
            failed += 1;
            continue;
        };

        let ready = if policy == EmptyPolicy::BySize {
            match ctx.gate.check(&path, &ctx.cancel).await? {
                Readiness::Ready(ready) => ready,
                Readiness::AlreadyProcessed => {
                    println!("{}: already in database", path.display());
                    continue;
                }
                Readiness::Cancelled => break,
                other => {
                    println!("{}: not ready ({other:?})", path.display());
                    failed += 1;
                    continue;
                }
            }
        } else {
            path
        };

        match orchestrator::ingest_blocking(ctx, ready.clone(), policy).await {
            Ok(outcome) => println!("{}: {}", ready.display(), describe(&outcome)),
            Err(e) => {
                error!(file = %ready.display(), error = %e, "Insert failed");
                println!("{}: failed: {e}", ready.display());
                failed += 1;
            }
        }
    }

    anyhow::ensure!(failed == 0, "{failed} of {} files were not inserted", files.len());
    Ok(())
}

pub async fn replace(ctx: &AppContext, files: &[PathBuf]) -> anyhow::Result<()> {
    let mut failed = 0usize;
    for file in files {
        let Some(path) = locate(ctx, file) else {
            failed += 1;
            continue;
        };

        let engine = ctx.engine.clone();
        let target = path.clone();
        let result = tokio::task::spawn_blocking(move || engine.replace_error_entry(&target)).await?;
        match result {
            Ok(outcome) => println!("{}: replaced, {}", path.display(), describe_commit(&outcome)),
            Err(e) => {
                error!(file = %path.display(), error = %e, "Replace failed");
                println!("{}: failed: {e}", path.display());
                failed += 1;
            }
        }
    }

    anyhow::ensure!(failed == 0, "{failed} of {} files were not replaced", files.len());
    Ok(())
}

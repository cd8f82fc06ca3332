use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fs2::FileExt;
use rusqlite::Connection;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ProcessingSettings;
use crate::data::repository;
use crate::error::AppError;
use crate::models::ProjectId;

const PROBE_BYTES: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready(PathBuf),
    AlreadyProcessed,
    /// Not found on disk, or vanished while being checked.
    Missing,
    /// Still locked after the last retry.
    Locked,
    Cancelled,
}

impl Readiness {
    pub fn ready_path(self) -> Option<PathBuf> {
        match self {
            Readiness::Ready(path) => Some(path),
            _ => None,
        }
    }
}

enum Probe {
    Readable,
    Busy,
    Gone,
}

/// Decides whether a discovered file is fully written and not yet ingested.
#[derive(Clone)]
pub struct ReadinessGate {
    db: Arc<Mutex<Connection>>,
    root: PathBuf,
    retry_ceiling: u32,
    retry_delay: Duration,
}

impl ReadinessGate {
    pub fn new(db: Arc<Mutex<Connection>>, root: &Path, settings: &ProcessingSettings) -> Self {
        Self {
            db,
            root: root.to_path_buf(),
            retry_ceiling: settings.retry_ceiling.max(1),
            retry_delay: settings.retry_delay(),
        }
    }

    /// The file as given, or the same name in a sibling month directory of the root
    /// whose bucket matches the project's date code.
    pub fn resolve(&self, path: &Path) -> Option<PathBuf> {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        let name = path.file_name()?.to_string_lossy().to_string();
        let id = ProjectId::from_sample_name(&name).ok()?;
        let token = id.date_token();
        let month = token.get(..6)?;

        let pattern = PathBuf::from(glob::Pattern::escape(&self.root.to_string_lossy()))
            .join(format!("{}*", glob::Pattern::escape(month)))
            .join(glob::Pattern::escape(&name));
        let found = glob::glob(&pattern.to_string_lossy())
            .ok()?
            .filter_map(|entry| entry.ok())
            .find(|candidate| candidate.is_file());
        if let Some(found) = &found {
            debug!(requested = %path.display(), found = %found.display(), "Resolved file in sibling month");
        }
        found
    }

    pub fn already_processed(&self, path: &Path) -> Result<bool, AppError> {
        let Some(name) = path.file_name() else {
            return Ok(false);
        };
        let conn = self.db.lock().unwrap_or_else(|p| p.into_inner());
        repository::sample_exists(&conn, &name.to_string_lossy())
    }

    pub async fn check(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<Readiness, AppError> {
        if self.already_processed(path)? {
            debug!(file = %path.display(), "Already processed");
            return Ok(Readiness::AlreadyProcessed);
        }

        let Some(resolved) = self.resolve(path) else {
            info!(file = %path.display(), "File not found, deferring to next backlog pass");
            return Ok(Readiness::Missing);
        };

        for attempt in 1..=self.retry_ceiling {
            match probe(&resolved) {
                Probe::Readable => return Ok(Readiness::Ready(resolved)),
                Probe::Gone => {
                    info!(file = %resolved.display(), "File vanished during readiness check");
                    return Ok(Readiness::Missing);
                }
                Probe::Busy if attempt == self.retry_ceiling => break,
                Probe::Busy => {
                    debug!(file = %resolved.display(), attempt, "File busy, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(Readiness::Cancelled),
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }

        warn!(
            file = %resolved.display(),
            attempts = self.retry_ceiling,
            "File still locked, deferring to next backlog pass"
        );
        Ok(Readiness::Locked)
    }
}

/// Exclusive read of the first bytes. The lock is released when the handle drops.
fn probe(path: &Path) -> Probe {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) => return classify(e.kind()),
    };
    if let Err(e) = file.try_lock_exclusive() {
        return classify(e.kind());
    }
    let mut buf = [0u8; PROBE_BYTES];
    let result = file.read(&mut buf);
    let _ = FileExt::unlock(&file);
    match result {
        Ok(_) => Probe::Readable,
        Err(e) => classify(e.kind()),
    }
}

fn classify(kind: ErrorKind) -> Probe {
    match kind {
        ErrorKind::NotFound => Probe::Gone,
        _ => Probe::Busy,
    }
}

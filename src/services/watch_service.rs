use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::error::AppError;

/// Keeps one directory watcher alive; dropping it stops the watch.
pub struct WatchHandle {
    dir: PathBuf,
    _watcher: RecommendedWatcher,
}

impl WatchHandle {
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Paths of newly created non-directory entries. Modify, remove and rename events
/// are ignored.
pub fn created_files(event: &Event) -> Vec<PathBuf> {
    if !matches!(event.kind, EventKind::Create(_)) {
        return Vec::new();
    }
    event
        .paths
        .iter()
        .filter(|p| !p.is_dir())
        .cloned()
        .collect()
}

/// Watches `directory` recursively and forwards created file paths into `queue`.
pub fn start_watching(
    directory: &Path,
    queue: UnboundedSender<PathBuf>,
) -> Result<WatchHandle, AppError> {
    if !directory.is_dir() {
        return Err(AppError::Watcher(format!(
            "not a directory: {}",
            directory.display()
        )));
    }

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            for path in created_files(&event) {
                debug!(file = %path.display(), "Discovered new file");
                if queue.send(path).is_err() {
                    // consumer has shut down
                    return;
                }
            }
        }
        Err(e) => warn!(error = %e, "Watcher error"),
    })
    .map_err(|e| AppError::Watcher(e.to_string()))?;

    watcher
        .watch(directory, RecursiveMode::Recursive)
        .map_err(|e| AppError::Watcher(e.to_string()))?;

    Ok(WatchHandle {
        dir: directory.to_path_buf(),
        _watcher: watcher,
    })
}

pub fn stop_watching(handle: WatchHandle) {
    debug!(dir = %handle.dir.display(), "Stopping watcher");
    drop(handle);
}

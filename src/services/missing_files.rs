use std::path::Path;

use rusqlite::Connection;
use tracing::debug;
use walkdir::WalkDir;

use crate::data::repository;
use crate::error::AppError;

/// File names directly under `dir` with the given extension, sorted. A missing
/// directory yields an empty list.
pub fn list_instrument_files(dir: &Path, extension: &str) -> Vec<String> {
    if !dir.is_dir() {
        return Vec::new();
    }

    let mut names: Vec<String> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(extension))
                .unwrap_or(false)
        })
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

/// Instrument files in `dir` that have no committed sample row.
pub fn find_missing(conn: &Connection, dir: &Path, extension: &str) -> Result<Vec<String>, AppError> {
    let on_disk = list_instrument_files(dir, extension);
    if on_disk.is_empty() {
        return Ok(Vec::new());
    }
    let missing = repository::missing_sample_names(conn, &on_disk)?;
    debug!(
        dir = %dir.display(),
        on_disk = on_disk.len(),
        missing = missing.len(),
        "Diffed directory against samples"
    );
    Ok(missing)
}

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditKind {
    Corrupt,
    /// Zero scans but at or above the corrupt size threshold; kept for manual review.
    EmptyOversized,
    AlreadyIngested,
}

impl AuditKind {
    fn file_suffix(self) -> &'static str {
        match self {
            AuditKind::Corrupt => "corrupt_files",
            AuditKind::EmptyOversized => "empty_files",
            AuditKind::AlreadyIngested => "already_ingested",
        }
    }
}

/// Append-only per-day audit trail, one path per line.
#[derive(Debug, Clone)]
pub struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    pub fn open(dir: &Path) -> Result<Self, AppError> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn log_path(&self, kind: AuditKind, day: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}_{}.log", day.format("%Y%m%d"), kind.file_suffix()))
    }

    pub fn record(&self, kind: AuditKind, file: &Path) -> Result<(), AppError> {
        self.record_on(kind, file, chrono::Local::now().date_naive())
    }

    pub fn record_on(&self, kind: AuditKind, file: &Path, day: NaiveDate) -> Result<(), AppError> {
        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(kind, day))?;
        writeln!(out, "{}", file.display())?;
        Ok(())
    }
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Datelike, Months, NaiveDate, NaiveDateTime};

/// Relative months covered by the window, oldest first.
const WINDOW_OFFSETS: [i32; 4] = [-2, -1, 0, 1];

/// The rolling set of month-bucket directories watched during one calendar month.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryWindow {
    buckets: Vec<String>,
    until_rotation: Duration,
}

impl DirectoryWindow {
    pub fn at(now: NaiveDateTime) -> Self {
        let today = now.date();
        let buckets = WINDOW_OFFSETS
            .iter()
            .filter_map(|offset| shift_months(first_of_month(today), *offset))
            .map(month_bucket)
            .collect();

        let until_rotation = next_month_start(today)
            .map(|start| start - now)
            .and_then(|delta| delta.to_std().ok())
            .unwrap_or_default();

        Self {
            buckets,
            until_rotation,
        }
    }

    pub fn now() -> Self {
        Self::at(chrono::Local::now().naive_local())
    }

    /// `YYYYMM` identifiers for months -2, -1, 0 and +1.
    pub fn buckets(&self) -> &[String] {
        &self.buckets
    }

    /// The two buckets before the current month, scanned on each rotation.
    pub fn backlog_buckets(&self) -> &[String] {
        &self.buckets[..self.buckets.len().min(2)]
    }

    pub fn until_rotation(&self) -> Duration {
        self.until_rotation
    }

    /// Paths under `root`; no existence check is made.
    pub fn paths(&self, root: &Path) -> Vec<PathBuf> {
        self.buckets.iter().map(|b| root.join(b)).collect()
    }

    pub fn backlog_paths(&self, root: &Path) -> Vec<PathBuf> {
        self.backlog_buckets().iter().map(|b| root.join(b)).collect()
    }
}

pub fn month_bucket(date: NaiveDate) -> String {
    format!("{:04}{:02}", date.year(), date.month())
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn shift_months(date: NaiveDate, offset: i32) -> Option<NaiveDate> {
    let months = Months::new(offset.unsigned_abs());
    if offset < 0 {
        date.checked_sub_months(months)
    } else {
        date.checked_add_months(months)
    }
}

fn next_month_start(today: NaiveDate) -> Option<NaiveDateTime> {
    shift_months(first_of_month(today), 1).and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// All `YYYYMM` buckets from `since` through the current month of `today`, inclusive.
pub fn buckets_since(since: &str, today: NaiveDate) -> Vec<String> {
    let Some(start) = since
        .get(..4)
        .zip(since.get(4..6))
        .and_then(|(y, m)| Some((y.parse::<i32>().ok()?, m.parse::<u32>().ok()?)))
        .and_then(|(y, m)| NaiveDate::from_ymd_opt(y, m, 1))
    else {
        return Vec::new();
    };

    let end = first_of_month(today);
    let mut out = Vec::new();
    let mut month = start;
    while month <= end {
        out.push(month_bucket(month));
        match shift_months(month, 1) {
            Some(next) => month = next,
            None => break,
        }
    }
    out
}

use rusqlite::Connection;

use crate::error::AppError;

// samples.project_id is declared as a foreign key, but enforcement is switched off per
// connection in `run_migrations`: corrupt entries may point at a project that has not
// been created yet. Bundled SQLite enforces foreign keys by default.
const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS projects (
    project_id TEXT PRIMARY KEY,
    project_date TEXT,
    instrument TEXT,
    software_version TEXT,
    method TEXT,
    hplc_type TEXT,
    time_range TEXT,
    faims_attached TEXT
);

CREATE TABLE IF NOT EXISTS samples (
    sample_name TEXT PRIMARY KEY,
    project_id TEXT,
    creation_date TEXT,
    vial TEXT,
    injection_volume REAL,
    initial_pressure_pump REAL,
    min_pressure_pump REAL,
    max_pressure_pump REAL,
    std_pressure_pump REAL,
    analyzer_temp_mean REAL,
    analyzer_temp_std REAL,
    error_tag TEXT,
    FOREIGN KEY (project_id) REFERENCES projects (project_id)
);

CREATE INDEX IF NOT EXISTS idx_samples_project ON samples(project_id);
CREATE INDEX IF NOT EXISTS idx_samples_creation ON samples(creation_date DESC);

CREATE TABLE IF NOT EXISTS scan_scratch (
    file_name TEXT
);
";

pub fn run_migrations(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=OFF;")?;
    conn.execute_batch(SCHEMA_V1)?;
    Ok(())
}

use rusqlite::ffi;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("file is not readable: {0}")]
    Corrupt(String),

    #[error("file contains no acquisition scans")]
    Empty,

    /// The reader itself could not run. Says nothing about the file.
    #[error("metadata reader unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Sample name does not carry a project id: {0}")]
    InvalidSampleName(String),

    #[error("Watcher error: {0}")]
    Watcher(String),

    #[error("{0}")]
    General(String),
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

impl AppError {
    /// Rewrites a primary-key or unique violation on an insert into `DuplicateKey`.
    /// Other constraint failures stay database errors.
    pub fn on_insert(err: rusqlite::Error, key: &str) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref e, _)
                if matches!(
                    e.extended_code,
                    ffi::SQLITE_CONSTRAINT_PRIMARYKEY | ffi::SQLITE_CONSTRAINT_UNIQUE
                ) =>
            {
                AppError::DuplicateKey(key.to_string())
            }
            other => AppError::Database(other),
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, AppError::DuplicateKey(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn constraint_violation_maps_to_duplicate_key() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (k TEXT PRIMARY KEY)").unwrap();
        conn.execute("INSERT INTO t (k) VALUES ('a')", []).unwrap();

        let err = conn
            .execute("INSERT INTO t (k) VALUES ('a')", [])
            .map_err(|e| AppError::on_insert(e, "a"))
            .unwrap_err();

        assert!(err.is_duplicate());
        assert_eq!(err.to_string(), "Duplicate key: a");
    }

    #[test]
    fn unique_violation_maps_to_duplicate_key() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, k TEXT UNIQUE)")
            .unwrap();
        conn.execute("INSERT INTO t (k) VALUES ('a')", []).unwrap();

        let err = conn
            .execute("INSERT INTO t (k) VALUES ('a')", [])
            .map_err(|e| AppError::on_insert(e, "a"))
            .unwrap_err();
        assert!(err.is_duplicate());
    }

    #[test]
    fn foreign_key_violation_is_not_a_duplicate() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "PRAGMA foreign_keys=ON;
             CREATE TABLE parent (id TEXT PRIMARY KEY);
             CREATE TABLE child (id TEXT PRIMARY KEY, parent_id TEXT REFERENCES parent (id));",
        )
        .unwrap();

        let err = conn
            .execute("INSERT INTO child (id, parent_id) VALUES ('c', 'missing')", [])
            .map_err(|e| AppError::on_insert(e, "c"))
            .unwrap_err();
        assert!(!err.is_duplicate());
        assert!(matches!(err, AppError::Database(_)));
    }

    #[test]
    fn other_sqlite_errors_stay_database_errors() {
        let conn = Connection::open_in_memory().unwrap();
        let err = conn
            .execute("INSERT INTO missing_table (k) VALUES ('a')", [])
            .map_err(|e| AppError::on_insert(e, "a"))
            .unwrap_err();

        assert!(matches!(err, AppError::Database(_)));
    }
}

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::data;
use crate::error::AppError;
use crate::services::audit_log::AuditLog;
use crate::services::extractor::{CommandExtractor, MetadataExtractor};
use crate::services::ingestion_service::IngestionEngine;
use crate::services::readiness::ReadinessGate;
use crate::services::staging_store::StagingStore;

/// Everything a command needs, built once at startup.
pub struct AppContext {
    pub db: Arc<Mutex<Connection>>,
    pub db_path: PathBuf,
    pub settings: Arc<Settings>,
    pub engine: Arc<IngestionEngine>,
    pub gate: ReadinessGate,
    pub cancel: CancellationToken,
}

impl AppContext {
    pub fn open(settings: Settings) -> Result<Self, AppError> {
        let conn = data::open_database(&settings.paths.database)?;
        let extractor = Arc::new(CommandExtractor::new(
            &settings.extractor,
            settings.instruments.clone(),
        ));
        Self::with_connection(conn, settings, extractor)
    }

    pub fn with_connection(
        conn: Connection,
        settings: Settings,
        extractor: Arc<dyn MetadataExtractor>,
    ) -> Result<Self, AppError> {
        let db_path = settings.paths.database.clone();
        let db = Arc::new(Mutex::new(conn));
        let staging = StagingStore::open(&settings.paths.staging_dir)?;
        let audit = AuditLog::open(&settings.paths.log_dir)?;
        let engine = IngestionEngine::new(db.clone(), staging, extractor, audit, &settings)?;
        let gate = ReadinessGate::new(
            db.clone(),
            &settings.paths.observation_root,
            &settings.processing,
        );

        Ok(Self {
            db,
            db_path,
            settings: Arc::new(settings),
            engine: Arc::new(engine),
            gate,
            cancel: CancellationToken::new(),
        })
    }

    pub fn root(&self) -> &std::path::Path {
        &self.settings.paths.observation_root
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

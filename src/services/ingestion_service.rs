use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::config::{Settings, StandardPatterns};
use crate::data::repository;
use crate::error::{AppError, ExtractError};
use crate::models::project_id::{date_code_distance, staged_age};
use crate::models::{ProjectDate, ProjectId, ProjectRecord, SampleRecord};
use crate::services::audit_log::{AuditKind, AuditLog};
use crate::services::extractor::MetadataExtractor;
use crate::services::staging_store::{StagedEntry, StagingStore};

pub const CORRUPT_TAG: &str = "CorruptFile";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Sample inserted under an existing project.
    Committed { project_id: String },
    /// Project and sample inserted; staged family members promoted alongside.
    NewProject {
        project_id: String,
        promoted: Vec<String>,
    },
    Staged { unit: String },
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Stored(CommitOutcome),
    /// Recorded with an error tag only.
    Corrupt(CommitOutcome),
    /// No scans but large enough to be worth a manual look; nothing written.
    EmptyForInspection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromotionOutcome {
    Matched { project_id: String },
    Standalone { project_id: String },
    AlreadyCommitted,
    Waiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyPolicy {
    /// Small empty files are corrupt, large ones are only logged.
    BySize,
    AlwaysCorrupt,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PromotionSummary {
    pub promoted: usize,
    pub waiting: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchMode {
    /// Waiting-window check applies and unmatched standards are staged.
    Commit,
    /// Unmatched standards become their own project.
    Replace,
}

enum Target {
    Exact,
    Closest(String),
    Stage,
    NewProject,
}

pub struct IngestionEngine {
    db: Arc<Mutex<Connection>>,
    staging: StagingStore,
    extractor: Arc<dyn MetadataExtractor>,
    audit: AuditLog,
    patterns: StandardPatterns,
    days_waiting: i64,
    min_file_size_bytes: u64,
}

impl IngestionEngine {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        staging: StagingStore,
        extractor: Arc<dyn MetadataExtractor>,
        audit: AuditLog,
        settings: &Settings,
    ) -> Result<Self, AppError> {
        Ok(Self {
            db,
            staging,
            extractor,
            audit,
            patterns: settings.standard_patterns()?,
            days_waiting: settings.processing.days_waiting,
            min_file_size_bytes: settings.processing.min_file_size_bytes(),
        })
    }

    pub fn staging(&self) -> &StagingStore {
        &self.staging
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Commits one file, stages it, or reports it as a duplicate. Extraction errors
    /// come back as `AppError::Extract`.
    pub fn commit(&self, path: &Path) -> Result<CommitOutcome, AppError> {
        let (mut sample, project) = self.extractor.extract(path)?;

        let mut conn = self.lock();
        let outcome = {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if repository::sample_exists(&tx, &sample.sample_name)? {
                return Ok(CommitOutcome::Duplicate);
            }

            let outcome = match self.choose_target(&tx, &sample, &project, MatchMode::Commit)? {
                Target::Exact => {
                    repository::insert_sample(&tx, &sample)
                        .map(|_| CommitOutcome::Committed {
                            project_id: sample.project_id.clone(),
                        })
                }
                Target::Closest(project_id) => {
                    sample.project_id = project_id.clone();
                    repository::insert_sample(&tx, &sample)
                        .map(|_| CommitOutcome::Committed { project_id })
                }
                Target::Stage => {
                    if let Some(unit) = self
                        .staging
                        .find_sample(&project.project_id, &sample.sample_name)?
                    {
                        debug!(sample = %sample.sample_name, unit = %unit, "Already staged");
                        return Ok(CommitOutcome::Staged { unit });
                    }
                    let unit = self.staging.save(&sample, &project)?;
                    info!(sample = %sample.sample_name, unit = %unit, "No fitting project yet, staged");
                    return Ok(CommitOutcome::Staged { unit });
                }
                Target::NewProject => repository::insert_project(&tx, &project)
                    .and_then(|_| repository::insert_sample(&tx, &sample))
                    .map(|_| CommitOutcome::NewProject {
                        project_id: project.project_id.clone(),
                        promoted: Vec::new(),
                    }),
            };

            match outcome {
                Ok(outcome) => {
                    tx.commit()?;
                    outcome
                }
                Err(e) if e.is_duplicate() => {
                    info!(sample = %sample.sample_name, "Sample already in database");
                    return Ok(CommitOutcome::Duplicate);
                }
                Err(e) => return Err(e),
            }
        };

        match outcome {
            CommitOutcome::NewProject { project_id, .. } => {
                info!(sample = %sample.sample_name, project = %project_id, "Created project");
                let promoted = self.promote_family(&mut conn, &project_id, today());
                Ok(CommitOutcome::NewProject {
                    project_id,
                    promoted,
                })
            }
            other => {
                info!(sample = %sample.sample_name, outcome = ?other, "Committed sample");
                Ok(other)
            }
        }
    }

    /// `commit` plus the corrupt/empty classification and the audit trail.
    pub fn ingest(&self, path: &Path) -> Result<IngestOutcome, AppError> {
        self.ingest_with(path, EmptyPolicy::BySize)
    }

    pub fn ingest_with(&self, path: &Path, policy: EmptyPolicy) -> Result<IngestOutcome, AppError> {
        match self.commit(path) {
            Ok(CommitOutcome::Duplicate) => {
                self.audit.record(AuditKind::AlreadyIngested, path)?;
                Ok(IngestOutcome::Stored(CommitOutcome::Duplicate))
            }
            Ok(outcome) => Ok(IngestOutcome::Stored(outcome)),
            Err(AppError::Extract(ExtractError::Corrupt(reason))) => {
                warn!(file = %path.display(), reason = %reason, "Unreadable file, recording as corrupt");
                self.record_corrupt(path)
            }
            Err(AppError::Extract(ExtractError::Empty)) => {
                let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
                if policy == EmptyPolicy::AlwaysCorrupt || size < self.min_file_size_bytes {
                    warn!(file = %path.display(), size, "No scans and below size threshold, recording as corrupt");
                    self.record_corrupt(path)
                } else {
                    warn!(file = %path.display(), size, "No scans but above size threshold, needs inspection");
                    self.audit.record(AuditKind::EmptyOversized, path)?;
                    Ok(IngestOutcome::EmptyForInspection)
                }
            }
            Err(AppError::Extract(ExtractError::Unavailable(reason))) => {
                // the file stays missing and is picked up again by the next backlog pass
                warn!(file = %path.display(), reason = %reason, "Metadata reader unavailable, deferring file");
                Err(AppError::Extract(ExtractError::Unavailable(reason)))
            }
            Err(e) => Err(e),
        }
    }

    fn record_corrupt(&self, path: &Path) -> Result<IngestOutcome, AppError> {
        self.audit.record(AuditKind::Corrupt, path)?;
        let outcome = self.commit_corrupt(path, CORRUPT_TAG)?;
        if outcome == CommitOutcome::Duplicate {
            info!(file = %path.display(), "Corrupt file already in database");
        }
        Ok(IngestOutcome::Corrupt(outcome))
    }

    /// Records a sample row carrying only its name, project and error tag.
    pub fn commit_corrupt(&self, path: &Path, tag: &str) -> Result<CommitOutcome, AppError> {
        let name = sample_name(path)?;
        let id = ProjectId::from_sample_name(&name)?;

        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let project_id = if repository::count_projects(&tx, id.as_str())? > 0 {
            id.to_string()
        } else {
            let candidates = repository::find_family_projects(&tx, &id.family())?;
            closest_project(&id, &candidates).unwrap_or_else(|| id.to_string())
        };

        match repository::insert_corrupt_sample(&tx, &name, &project_id, tag) {
            Ok(()) => {
                tx.commit()?;
                info!(sample = %name, project = %project_id, tag, "Recorded corrupt sample");
                Ok(CommitOutcome::Committed { project_id })
            }
            Err(e) if e.is_duplicate() => Ok(CommitOutcome::Duplicate),
            Err(e) => Err(e),
        }
    }

    /// Re-extracts a previously corrupt file and overwrites its row, clearing the tag.
    pub fn replace_error_entry(&self, path: &Path) -> Result<CommitOutcome, AppError> {
        let (mut sample, project) = self.extractor.extract(path)?;
        sample.error_tag = None;

        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let outcome = match self.choose_target(&tx, &sample, &project, MatchMode::Replace)? {
            Target::Exact => CommitOutcome::Committed {
                project_id: sample.project_id.clone(),
            },
            Target::Closest(project_id) => {
                sample.project_id = project_id.clone();
                CommitOutcome::Committed { project_id }
            }
            Target::NewProject | Target::Stage => {
                match repository::insert_project(&tx, &project) {
                    Ok(()) => {}
                    Err(e) if e.is_duplicate() => {
                        debug!(project = %project.project_id, "Project already present");
                    }
                    Err(e) => return Err(e),
                }
                CommitOutcome::NewProject {
                    project_id: project.project_id.clone(),
                    promoted: Vec::new(),
                }
            }
        };

        if repository::update_sample(&tx, &sample)? == 0 {
            return Err(AppError::General(format!(
                "no existing entry to replace for {}",
                sample.sample_name
            )));
        }
        tx.commit()?;
        info!(sample = %sample.sample_name, outcome = ?outcome, "Replaced error entry");
        Ok(outcome)
    }

    pub fn promote_if_matchable(&self, unit: &str) -> Result<PromotionOutcome, AppError> {
        self.promote_if_matchable_on(unit, today())
    }

    pub fn promote_if_matchable_on(
        &self,
        unit: &str,
        today: NaiveDate,
    ) -> Result<PromotionOutcome, AppError> {
        let mut conn = self.lock();
        self.promote_unit(&mut conn, unit, today)
    }

    /// One pass over every staged unit. Failures are logged and the unit stays staged.
    pub fn promote_pending(&self, today: NaiveDate) -> Result<PromotionSummary, AppError> {
        let names = self.staging.list_names()?;
        info!(count = names.len(), "Checking staged units");

        let mut summary = PromotionSummary::default();
        let mut conn = self.lock();
        for name in names {
            match self.promote_unit(&mut conn, &name, today) {
                Ok(PromotionOutcome::Waiting) => summary.waiting += 1,
                Ok(_) => summary.promoted += 1,
                Err(e) => {
                    warn!(unit = %name, error = %e, "Promotion failed, unit stays staged");
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    fn promote_family(&self, conn: &mut Connection, project_id: &str, today: NaiveDate) -> Vec<String> {
        let family = match ProjectId::from_sample_name(project_id) {
            Ok(id) => id.family(),
            Err(_) => return Vec::new(),
        };
        let names = match self.staging.list_names() {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Cannot list staged units");
                return Vec::new();
            }
        };

        let mut promoted = Vec::new();
        for name in names.into_iter().filter(|n| family.contains_name(n)) {
            match self.promote_unit(conn, &name, today) {
                Ok(PromotionOutcome::Waiting) => {}
                Ok(outcome) => {
                    debug!(unit = %name, outcome = ?outcome, "Promoted staged unit");
                    promoted.push(name);
                }
                Err(e) => warn!(unit = %name, error = %e, "Promotion failed, unit stays staged"),
            }
        }
        promoted
    }

    fn promote_unit(
        &self,
        conn: &mut Connection,
        unit: &str,
        today: NaiveDate,
    ) -> Result<PromotionOutcome, AppError> {
        let StagedEntry {
            project,
            mut sample,
        } = self.staging.load(unit)?;

        if repository::sample_exists(conn, &sample.sample_name)? {
            self.staging.delete(unit)?;
            info!(unit, sample = %sample.sample_name, "Sample already committed, dropped staged unit");
            return Ok(PromotionOutcome::AlreadyCommitted);
        }

        let id = ProjectId::from_sample_name(&project.project_id)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let candidates = repository::find_family_projects(&tx, &id.family())?;

        let outcome = if let Some(project_id) = closest_project(&id, &candidates) {
            sample.project_id = project_id.clone();
            repository::insert_sample(&tx, &sample)?;
            PromotionOutcome::Matched { project_id }
        } else if staged_age(&id, today).is_some_and(|age| age > self.days_waiting) {
            repository::insert_project(&tx, &project)?;
            repository::insert_sample(&tx, &sample)?;
            PromotionOutcome::Standalone {
                project_id: project.project_id.clone(),
            }
        } else {
            return Ok(PromotionOutcome::Waiting);
        };

        tx.commit()?;
        if let Err(e) = self.staging.delete(unit) {
            warn!(unit, error = %e, "Committed but could not remove staged unit");
        }
        info!(unit, sample = %sample.sample_name, outcome = ?outcome, "Promoted staged sample");
        Ok(outcome)
    }

    fn choose_target(
        &self,
        conn: &Connection,
        sample: &SampleRecord,
        project: &ProjectRecord,
        mode: MatchMode,
    ) -> Result<Target, AppError> {
        if repository::count_projects(conn, &project.project_id)? > 0 {
            return Ok(Target::Exact);
        }
        if !self.patterns.is_standard(&sample.sample_name) {
            return Ok(Target::NewProject);
        }

        let id = ProjectId::from_sample_name(&project.project_id)?;
        let family = id.family();
        let candidates = repository::find_family_projects(conn, &family)?;
        let Some(closest) = closest_project(&id, &candidates) else {
            return Ok(match mode {
                MatchMode::Commit => Target::Stage,
                MatchMode::Replace => Target::NewProject,
            });
        };

        if mode == MatchMode::Commit {
            if let Some(latest) = repository::latest_family_sample(conn, &family)? {
                let gap = parse_creation(sample.creation_date.as_deref())
                    .zip(parse_creation(latest.creation_date.as_deref()))
                    .map(|(new, last)| (new - last).num_days());
                if gap.is_some_and(|days| days > self.days_waiting) {
                    debug!(
                        sample = %sample.sample_name,
                        latest = %latest.sample_name,
                        "Family has gone quiet, staging instead of matching"
                    );
                    return Ok(Target::Stage);
                }
            }
        }

        Ok(Target::Closest(closest))
    }
}

/// Family member with the smallest date-code distance; ties go to the earlier date.
fn closest_project(id: &ProjectId, candidates: &[ProjectDate]) -> Option<String> {
    candidates
        .iter()
        .min_by_key(|c| {
            ProjectId::from_sample_name(&c.project_id)
                .ok()
                .and_then(|cid| date_code_distance(id, &cid))
                .unwrap_or(i64::MAX)
        })
        .map(|c| c.project_id.clone())
}

fn parse_creation(value: Option<&str>) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value?, "%Y-%m-%d %H:%M:%S%.f").ok()
}

fn sample_name(path: &Path) -> Result<String, AppError> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| AppError::InvalidSampleName(path.display().to_string()))
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use crate::error::ExtractError;
use crate::models::{ProjectId, ProjectRecord, SampleRecord};
use crate::services::extractor::MetadataExtractor;

pub fn sample_for(name: &str, created: &str) -> SampleRecord {
    let id = ProjectId::from_sample_name(name).unwrap();
    SampleRecord {
        sample_name: name.to_string(),
        project_id: id.to_string(),
        creation_date: Some(created.to_string()),
        vial: Some("S1:A1".to_string()),
        injection_volume: Some(1.0),
        pump_pressure: None,
        analyzer_temp_mean: Some(28.0),
        analyzer_temp_std: Some(0.03),
        error_tag: None,
    }
}

pub fn project_for(name: &str) -> ProjectRecord {
    let id = ProjectId::from_sample_name(name).unwrap();
    ProjectRecord {
        project_id: id.to_string(),
        project_date: id.date_token(),
        instrument: name.split('_').next().unwrap().to_string(),
        software_version: "2.9".to_string(),
        method: "C:/methods/dia.meth".to_string(),
        hplc_type: "nanoLC".to_string(),
        time_range: "0-60".to_string(),
        faims_attached: "notRecorded".to_string(),
    }
}

/// Creation timestamp on the day encoded in the sample's date code.
pub fn created_on_project_day(name: &str) -> String {
    let token = ProjectId::from_sample_name(name).unwrap().date_token();
    format!("{}-{}-{} 08:00:00.000", &token[0..4], &token[4..6], &token[6..8])
}

enum Scripted {
    Created(String),
    Corrupt,
    Empty,
    Unavailable,
}

/// Extractor driven by file name. Unscripted names extract cleanly with a creation
/// date on their project day.
#[derive(Default)]
pub struct FakeExtractor {
    scripted: Mutex<HashMap<String, Scripted>>,
}

impl FakeExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self, name: &str, outcome: Scripted) {
        self.scripted
            .lock()
            .unwrap()
            .insert(name.to_string(), outcome);
    }

    pub fn created(&self, name: &str, created: &str) {
        self.script(name, Scripted::Created(created.to_string()));
    }

    pub fn corrupt(&self, name: &str) {
        self.script(name, Scripted::Corrupt);
    }

    pub fn empty(&self, name: &str) {
        self.script(name, Scripted::Empty);
    }

    pub fn unavailable(&self, name: &str) {
        self.script(name, Scripted::Unavailable);
    }

    pub fn heal(&self, name: &str) {
        self.scripted.lock().unwrap().remove(name);
    }
}

impl MetadataExtractor for FakeExtractor {
    fn extract(&self, path: &Path) -> Result<(SampleRecord, ProjectRecord), ExtractError> {
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        let created = match self.scripted.lock().unwrap().get(&name) {
            Some(Scripted::Corrupt) => return Err(ExtractError::Corrupt(name)),
            Some(Scripted::Empty) => return Err(ExtractError::Empty),
            Some(Scripted::Unavailable) => {
                return Err(ExtractError::Unavailable("reader not installed".to_string()))
            }
            Some(Scripted::Created(created)) => created.clone(),
            None => created_on_project_day(&name),
        };
        Ok((sample_for(&name, &created), project_for(&name)))
    }
}

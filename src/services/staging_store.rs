use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::models::{ProjectRecord, PumpPressure, SampleRecord};

const UNIT_EXTENSION: &str = "json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedEntry {
    pub project: ProjectRecord,
    pub sample: SampleRecord,
}

/// Layout written by the previous ingestion tool. Each half is either a positional
/// array or an object keyed by the old column names.
#[derive(Debug, Deserialize)]
struct LegacyUnit {
    #[serde(rename = "SQLValues_Project")]
    project: Value,
    #[serde(rename = "SQLValues_Samples")]
    samples: Value,
}

#[derive(Debug, Deserialize)]
struct LegacyProject {
    #[serde(rename = "ProjectID")]
    project_id: String,
    #[serde(rename = "ProjectID_Date", default)]
    project_date: Value,
    #[serde(rename = "MSInstrument", default)]
    instrument: Value,
    #[serde(rename = "SoftwareVersion", default)]
    software_version: Value,
    #[serde(rename = "InstrumentMethod_print", alias = "Method", default)]
    method: Value,
    #[serde(rename = "HPLCInstrument", default)]
    hplc_type: Value,
    #[serde(rename = "TimeRange", default)]
    time_range: Value,
    #[serde(rename = "FAIMSattached", default)]
    faims_attached: Value,
}

#[derive(Debug, Deserialize)]
struct LegacySample {
    #[serde(rename = "SampleName_ID")]
    sample_name: String,
    #[serde(rename = "ProjectID")]
    project_id: String,
    #[serde(rename = "CreationDate", default)]
    creation_date: Value,
    #[serde(rename = "Vial", default)]
    vial: Value,
    #[serde(rename = "InjectionVolume", default)]
    injection_volume: Value,
    #[serde(rename = "InitialPressure_Pump", default)]
    initial_pressure: Value,
    #[serde(rename = "MinPressure_Pump", default)]
    min_pressure: Value,
    #[serde(rename = "MaxPressure_Pump", default)]
    max_pressure: Value,
    #[serde(rename = "Std_Pressure_Pump", default)]
    std_pressure: Value,
    #[serde(rename = "AnalyzerTemp_mean", default)]
    analyzer_temp_mean: Value,
    #[serde(rename = "AnalyzerTemp_std", default)]
    analyzer_temp_std: Value,
}

/// Durable holding area for samples that cannot be committed yet. One JSON file per
/// unit, named after the project id.
#[derive(Debug, Clone)]
pub struct StagingStore {
    dir: PathBuf,
}

impl StagingStore {
    pub fn open(dir: &Path) -> Result<Self, AppError> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn unit_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{UNIT_EXTENSION}"))
    }

    /// Persists the pair and returns the unit name. A name already taken by another
    /// unit gets the sample name appended.
    pub fn save(&self, sample: &SampleRecord, project: &ProjectRecord) -> Result<String, AppError> {
        let mut name = project.project_id.clone();
        if self.unit_path(&name).exists() {
            name = format!("{}__{}", project.project_id, sample.sample_name);
        }

        let entry = StagedEntry {
            project: project.clone(),
            sample: sample.clone(),
        };
        let json = serde_json::to_string_pretty(&entry)?;

        // write-then-rename so a crash never leaves a half-written unit
        let target = self.unit_path(&name);
        let tmp = self.dir.join(format!(".{name}.tmp"));
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &target)?;

        debug!(unit = %name, sample = %sample.sample_name, "Staged sample");
        Ok(name)
    }

    pub fn load(&self, name: &str) -> Result<StagedEntry, AppError> {
        let content = std::fs::read_to_string(self.unit_path(name))?;
        match serde_json::from_str::<StagedEntry>(&content) {
            Ok(entry) => Ok(entry),
            Err(err) => {
                let legacy: LegacyUnit = serde_json::from_str(&content).map_err(|_| err)?;
                warn!(unit = %name, "Decoding staged unit with legacy layout");
                decode_legacy(legacy)
            }
        }
    }

    pub fn delete(&self, name: &str) -> Result<(), AppError> {
        std::fs::remove_file(self.unit_path(name))?;
        debug!(unit = %name, "Removed staged unit");
        Ok(())
    }

    /// Unit already holding `sample_name`. Only units named after `project_id` are
    /// searched; unreadable units are skipped.
    pub fn find_sample(
        &self,
        project_id: &str,
        sample_name: &str,
    ) -> Result<Option<String>, AppError> {
        let collided = format!("{project_id}__{sample_name}");
        let prefix = format!("{project_id}__");
        for name in self.list_names()? {
            if name == collided {
                return Ok(Some(name));
            }
            if name != project_id && !name.starts_with(&prefix) {
                continue;
            }
            match self.load(&name) {
                Ok(entry) if entry.sample.sample_name == sample_name => return Ok(Some(name)),
                Ok(_) => {}
                Err(e) => debug!(unit = %name, error = %e, "Skipping unreadable unit"),
            }
        }
        Ok(None)
    }

    /// Pending unit names, sorted.
    pub fn list_names(&self) -> Result<Vec<String>, AppError> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_unit = path
                .extension()
                .map(|ext| ext == UNIT_EXTENSION)
                .unwrap_or(false);
            if !is_unit || !path.is_file() {
                continue;
            }
            if let Some(stem) = path.file_stem() {
                names.push(stem.to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

fn decode_legacy(unit: LegacyUnit) -> Result<StagedEntry, AppError> {
    match (unit.project, unit.samples) {
        (Value::Array(project), Value::Array(samples)) => decode_positional(&project, &samples),
        (project @ Value::Object(_), samples @ Value::Object(_)) => decode_named(
            serde_json::from_value(project)?,
            serde_json::from_value(samples)?,
        ),
        _ => Err(AppError::General(
            "legacy unit mixes positional and named values".to_string(),
        )),
    }
}

fn decode_named(p: LegacyProject, s: LegacySample) -> Result<StagedEntry, AppError> {
    let project = ProjectRecord {
        project_id: p.project_id,
        project_date: text(&p.project_date),
        instrument: text(&p.instrument),
        software_version: text(&p.software_version),
        method: text(&p.method),
        hplc_type: text(&p.hplc_type),
        time_range: text(&p.time_range),
        faims_attached: text(&p.faims_attached),
    };

    let pump_pressure = number(&s.initial_pressure).map(|initial| PumpPressure {
        initial,
        min: number(&s.min_pressure).unwrap_or_default(),
        max: number(&s.max_pressure).unwrap_or_default(),
        std: number(&s.std_pressure).unwrap_or_default(),
    });
    let sample = SampleRecord {
        sample_name: s.sample_name,
        project_id: s.project_id,
        creation_date: optional_text(&s.creation_date),
        vial: optional_text(&s.vial),
        injection_volume: number(&s.injection_volume),
        pump_pressure,
        analyzer_temp_mean: number(&s.analyzer_temp_mean),
        analyzer_temp_std: number(&s.analyzer_temp_std),
        error_tag: None,
    };

    Ok(StagedEntry { project, sample })
}

fn decode_positional(p: &[Value], s: &[Value]) -> Result<StagedEntry, AppError> {
    if p.len() != 8 {
        return Err(AppError::General(format!(
            "legacy project values have {} fields, expected 8",
            p.len()
        )));
    }
    let project = ProjectRecord {
        project_id: text(&p[0]),
        project_date: text(&p[1]),
        instrument: text(&p[2]),
        software_version: text(&p[3]),
        method: text(&p[4]),
        hplc_type: text(&p[5]),
        time_range: text(&p[6]),
        faims_attached: text(&p[7]),
    };

    let (pump_pressure, temp_at) = match s.len() {
        7 => (None, 5),
        11 => (
            Some(PumpPressure {
                initial: number(&s[5]).unwrap_or_default(),
                min: number(&s[6]).unwrap_or_default(),
                max: number(&s[7]).unwrap_or_default(),
                std: number(&s[8]).unwrap_or_default(),
            }),
            9,
        ),
        n => {
            return Err(AppError::General(format!(
                "legacy sample values have {n} fields, expected 7 or 11"
            )))
        }
    };

    let sample = SampleRecord {
        sample_name: text(&s[0]),
        project_id: text(&s[1]),
        creation_date: optional_text(&s[2]),
        vial: optional_text(&s[3]),
        injection_volume: number(&s[4]),
        pump_pressure,
        analyzer_temp_mean: number(&s[temp_at]),
        analyzer_temp_std: number(&s[temp_at + 1]),
        error_tag: None,
    };

    Ok(StagedEntry { project, sample })
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn optional_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => Some(text(other)),
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{project_for, sample_for};

    #[test]
    fn save_load_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = StagingStore::open(dir.path()).unwrap();
        let sample = sample_for("HFX_20250312_AB_HSstd_01.raw", "2025-03-12 08:00:00.000");
        let project = project_for("HFX_20250312_AB_HSstd_01.raw");

        let name = store.save(&sample, &project).unwrap();
        assert_eq!(name, "HFX_20250312_AB");
        assert_eq!(store.list_names().unwrap(), vec!["HFX_20250312_AB"]);

        let entry = store.load(&name).unwrap();
        assert_eq!(entry.sample, sample);
        assert_eq!(entry.project, project);

        store.delete(&name).unwrap();
        assert!(store.list_names().unwrap().is_empty());
    }

    #[test]
    fn colliding_project_id_appends_sample_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = StagingStore::open(dir.path()).unwrap();
        let first = sample_for("HFX_20250312_AB_HSstd_01.raw", "2025-03-12 08:00:00.000");
        let second = sample_for("HFX_20250312_AB_HSstd_02.raw", "2025-03-12 09:00:00.000");
        let project = project_for("HFX_20250312_AB_HSstd_01.raw");

        store.save(&first, &project).unwrap();
        let name = store.save(&second, &project).unwrap();

        assert_eq!(name, "HFX_20250312_AB__HFX_20250312_AB_HSstd_02.raw");
        assert_eq!(store.list_names().unwrap().len(), 2);
        assert_eq!(store.load(&name).unwrap().sample, second);
    }

    #[test]
    fn ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = StagingStore::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("readme.txt"), "x").unwrap();
        assert!(store.list_names().unwrap().is_empty());
    }

    #[test]
    fn decodes_legacy_units_by_length() {
        let dir = tempfile::tempdir().unwrap();
        let store = StagingStore::open(dir.path()).unwrap();

        let with_pump = serde_json::json!({
            "SQLValues_Project": ["HFX_20250312_AB", "20250312", "HFX", "2.9",
                "C:/m.meth", "Neo", "0-60", "True"],
            "SQLValues_Samples": ["HFX_20250312_AB_HSstd_01.raw", "HFX_20250312_AB",
                "2025-03-12 08:00:00.000", "S1:A1", 1.0, 210.0, 180.0, 250.0, 4.5, 28.1, 0.02]
        });
        std::fs::write(dir.path().join("HFX_20250312_AB.json"), with_pump.to_string()).unwrap();

        let entry = store.load("HFX_20250312_AB").unwrap();
        assert_eq!(entry.project.hplc_type, "Neo");
        assert_eq!(entry.sample.pump_pressure.unwrap().max, 250.0);
        assert_eq!(entry.sample.analyzer_temp_mean, Some(28.1));

        let without_pump = serde_json::json!({
            "SQLValues_Project": ["QE_20250301_CD", "20250301", "Q_Exactive_Plus", "2.11",
                "C:/m.meth", "nanoLC", "0-120", "notRecorded"],
            "SQLValues_Samples": ["QE_20250301_CD_standard.raw", "QE_20250301_CD",
                "2025-03-01 10:00:00.000", "A2", 2.0, 30.5, 0.1]
        });
        std::fs::write(dir.path().join("QE_20250301_CD.json"), without_pump.to_string()).unwrap();

        let entry = store.load("QE_20250301_CD").unwrap();
        assert!(entry.sample.pump_pressure.is_none());
        assert_eq!(entry.sample.analyzer_temp_std, Some(0.1));
        assert_eq!(entry.sample.injection_volume, Some(2.0));
    }

    #[test]
    fn decodes_legacy_units_keyed_by_column_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = StagingStore::open(dir.path()).unwrap();

        let named = serde_json::json!({
            "SQLValues_Project": {
                "ProjectID": "HFX_20250312_AB",
                "ProjectID_Date": "20250312",
                "MSInstrument": "HFX",
                "SoftwareVersion": "2.9",
                "InstrumentMethod_print": "C:/m.meth",
                "HPLCInstrument": "Neo",
                "TimeRange": "0-60",
                "FAIMSattached": "notRecorded"
            },
            "SQLValues_Samples": {
                "SampleName_ID": "HFX_20250312_AB_HSstd_01.raw",
                "ProjectID": "HFX_20250312_AB",
                "CreationDate": "2025-03-12 08:00:00.000",
                "Vial": "S1:A1",
                "InjectionVolume": 1.0,
                "InitialPressure_Pump": 210.0,
                "MinPressure_Pump": 180.0,
                "MaxPressure_Pump": 250.0,
                "Std_Pressure_Pump": 4.5,
                "AnalyzerTemp_mean": 28.1,
                "AnalyzerTemp_std": 0.02
            }
        });
        std::fs::write(dir.path().join("HFX_20250312_AB.json"), named.to_string()).unwrap();

        let entry = store.load("HFX_20250312_AB").unwrap();
        assert_eq!(entry.project.instrument, "HFX");
        assert_eq!(entry.project.method, "C:/m.meth");
        assert_eq!(entry.project.hplc_type, "Neo");
        assert_eq!(entry.sample.sample_name, "HFX_20250312_AB_HSstd_01.raw");
        assert_eq!(entry.sample.pump_pressure.unwrap().initial, 210.0);
        assert_eq!(entry.sample.analyzer_temp_std, Some(0.02));

        let without_pump = serde_json::json!({
            "SQLValues_Project": {
                "ProjectID": "QE_20250301_CD",
                "ProjectID_Date": "20250301",
                "MSInstrument": "Q_Exactive_Plus",
                "SoftwareVersion": "2.11",
                "InstrumentMethod_print": "C:/m.meth",
                "HPLCInstrument": "nanoLC",
                "TimeRange": "0-120",
                "FAIMSattached": "notRecorded"
            },
            "SQLValues_Samples": {
                "SampleName_ID": "QE_20250301_CD_standard.raw",
                "ProjectID": "QE_20250301_CD",
                "CreationDate": "2025-03-01 10:00:00.000",
                "Vial": "A2",
                "InjectionVolume": 2.0,
                "InitialPressure_Pump": null,
                "MinPressure_Pump": null,
                "MaxPressure_Pump": null,
                "Std_Pressure_Pump": null,
                "AnalyzerTemp_mean": 30.5,
                "AnalyzerTemp_std": 0.1
            }
        });
        std::fs::write(dir.path().join("QE_20250301_CD.json"), without_pump.to_string()).unwrap();

        let entry = store.load("QE_20250301_CD").unwrap();
        assert!(entry.sample.pump_pressure.is_none());
        assert_eq!(entry.sample.vial.as_deref(), Some("A2"));
    }

    #[test]
    fn finds_unit_holding_a_sample() {
        let dir = tempfile::tempdir().unwrap();
        let store = StagingStore::open(dir.path()).unwrap();
        let first = sample_for("HFX_20250312_AB_HSstd_01.raw", "2025-03-12 08:00:00.000");
        let second = sample_for("HFX_20250312_AB_HSstd_02.raw", "2025-03-12 09:00:00.000");
        let project = project_for("HFX_20250312_AB_HSstd_01.raw");
        store.save(&first, &project).unwrap();
        store.save(&second, &project).unwrap();

        assert_eq!(
            store
                .find_sample("HFX_20250312_AB", "HFX_20250312_AB_HSstd_01.raw")
                .unwrap()
                .as_deref(),
            Some("HFX_20250312_AB")
        );
        assert_eq!(
            store
                .find_sample("HFX_20250312_AB", "HFX_20250312_AB_HSstd_02.raw")
                .unwrap()
                .as_deref(),
            Some("HFX_20250312_AB__HFX_20250312_AB_HSstd_02.raw")
        );
        assert!(store
            .find_sample("HFX_20250312_AB", "HFX_20250312_AB_HSstd_03.raw")
            .unwrap()
            .is_none());
    }

    #[test]
    fn rejects_unknown_legacy_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let store = StagingStore::open(dir.path()).unwrap();
        let bad = serde_json::json!({
            "SQLValues_Project": ["a", "b"],
            "SQLValues_Samples": ["a"]
        });
        std::fs::write(dir.path().join("bad.json"), bad.to_string()).unwrap();
        assert!(store.load("bad").is_err());
        assert!(store.load("absent").is_err());
    }
}

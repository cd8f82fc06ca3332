use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use regex::{RegexSet, RegexSetBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::AppError;

pub const CONFIG_FILE_NAME: &str = "rawmeta.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub paths: PathSettings,
    pub processing: ProcessingSettings,
    pub matching: MatchingSettings,
    pub instruments: InstrumentTables,
    pub extractor: ExtractorSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// Backup share holding the `YYYYMM` month-bucket directories.
    pub observation_root: PathBuf,
    pub database: PathBuf,
    pub staging_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        let data = default_data_dir();
        Self {
            observation_root: PathBuf::from("."),
            database: data.join("metadata.sqlite"),
            staging_dir: data.join("staging"),
            log_dir: data.join("logs"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingSettings {
    pub extension: String,
    pub retry_ceiling: u32,
    pub retry_delay_secs: u64,
    pub file_wait_minutes: u64,
    pub settle_secs: u64,
    pub days_waiting: i64,
    pub min_file_size_kb: u64,
    /// Oldest month bucket reached by the one-shot `backlog` command.
    pub backlog_since: String,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            extension: "raw".to_string(),
            retry_ceiling: 10,
            retry_delay_secs: 60,
            file_wait_minutes: 5,
            settle_secs: 30,
            days_waiting: 5,
            min_file_size_kb: 15_000,
            backlog_since: "202501".to_string(),
        }
    }
}

impl ProcessingSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn file_wait(&self) -> Duration {
        Duration::from_secs(self.file_wait_minutes * 60)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    /// Kilobytes are decimal, as reported by the backup share.
    pub fn min_file_size_bytes(&self) -> u64 {
        self.min_file_size_kb * 1000
    }

    pub fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(&self.extension))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingSettings {
    pub standard_patterns: Vec<String>,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            standard_patterns: vec!["HSstd".to_string(), "standar[dt]".to_string()],
        }
    }
}

/// Device-name lookup tables handed to the extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentTables {
    pub ms: HashMap<String, String>,
    pub hplc: HashMap<String, String>,
    /// HPLC short name whose runs carry pump-pressure traces.
    pub pump_pressure_hplc: String,
}

impl Default for InstrumentTables {
    fn default() -> Self {
        let ms = [
            ("Q Exactive HF-X - Orbitrap MS", "HFX"),
            ("Orbitrap Astral", "Astral"),
            ("Orbitrap Exploris 480", "Exploris480"),
            ("Q Exactive Plus - Orbitrap MS", "Q_Exactive_Plus"),
        ];
        let hplc = [
            ("Thermo EASY-nLC", "nanoLC"),
            ("Proxeon_EASY-nLC", "nanoLC"),
            ("Thermo Scientific SII for Xcalibur", "Neo"),
            ("SiiXcalibur", "EvoSep"),
            ("EvoSep", "EvoSep"),
        ];
        Self {
            ms: ms
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            hplc: hplc
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            pump_pressure_hplc: "Neo".to_string(),
        }
    }
}

impl InstrumentTables {
    pub fn ms_name(&self, device: &str) -> Option<&str> {
        self.ms.get(device).map(String::as_str)
    }

    pub fn hplc_name(&self, device: &str) -> Option<&str> {
        self.hplc.get(device).map(String::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorSettings {
    /// Reader program that prints a JSON run description for the file passed last.
    pub command: PathBuf,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            command: PathBuf::from("rawinfo"),
            args: Vec::new(),
            timeout_secs: 600,
        }
    }
}

impl ExtractorSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Compiled standard/QC sample-name patterns.
#[derive(Debug, Clone)]
pub struct StandardPatterns {
    set: RegexSet,
}

impl StandardPatterns {
    pub fn new(patterns: &[String]) -> Result<Self, AppError> {
        let set = RegexSetBuilder::new(patterns)
            .case_insensitive(true)
            .build()
            .map_err(|e| AppError::Config(format!("invalid standard pattern: {e}")))?;
        Ok(Self { set })
    }

    pub fn is_standard(&self, sample_name: &str) -> bool {
        self.set.is_match(sample_name)
    }
}

impl Settings {
    pub fn from_toml_str(content: &str) -> Result<Self, AppError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads `explicit` if given, else the first config file found in the working
    /// directory or the platform config directory, else the defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, AppError> {
        let path = match explicit {
            Some(path) => {
                if !path.is_file() {
                    return Err(AppError::Config(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                Some(path.to_path_buf())
            }
            None => discover_config_file(),
        };

        match path {
            Some(path) => {
                info!(config = %path.display(), "Loading configuration");
                let content = std::fs::read_to_string(&path)?;
                Self::from_toml_str(&content)
            }
            None => {
                debug!("No config file found, using defaults");
                let settings = Settings::default();
                settings.validate()?;
                Ok(settings)
            }
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.processing.extension.trim().is_empty() {
            return Err(AppError::Config("processing.extension is empty".to_string()));
        }
        if self.processing.retry_ceiling == 0 {
            return Err(AppError::Config(
                "processing.retry_ceiling must be at least 1".to_string(),
            ));
        }
        if self.processing.days_waiting < 0 {
            return Err(AppError::Config(
                "processing.days_waiting must not be negative".to_string(),
            ));
        }
        let since = &self.processing.backlog_since;
        if since.len() != 6 || !since.chars().all(|c| c.is_ascii_digit()) {
            return Err(AppError::Config(format!(
                "processing.backlog_since must be YYYYMM, got {since:?}"
            )));
        }
        StandardPatterns::new(&self.matching.standard_patterns)?;
        Ok(())
    }

    pub fn standard_patterns(&self) -> Result<StandardPatterns, AppError> {
        StandardPatterns::new(&self.matching.standard_patterns)
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "rawmeta")
}

fn default_data_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("rawmeta-data"))
}

fn discover_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.is_file() {
        return Some(local);
    }
    project_dirs()
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
        .filter(|path| path.is_file())
}

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{ExtractorSettings, InstrumentTables};
use crate::error::ExtractError;
use crate::models::{ProjectId, ProjectRecord, PumpPressure, SampleRecord};

const FAIMS_NOT_RECORDED: &str = "notRecorded";
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Reads run metadata out of one acquisition file.
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<(SampleRecord, ProjectRecord), ExtractError>;
}

/// JSON run description printed by the vendor reader.
#[derive(Debug, Clone, Deserialize)]
pub struct RunInfo {
    pub creation_date: Option<String>,
    pub vial: Option<String>,
    pub injection_volume: Option<f64>,
    #[serde(default)]
    pub instrument_method: String,
    #[serde(default)]
    pub software_version: String,
    /// Friendly device names from the instrument method, in any order.
    #[serde(default)]
    pub devices: Vec<String>,
    #[serde(default)]
    pub time_range: String,
    pub last_scan: i64,
    pub analyzer_temp_mean: Option<f64>,
    pub analyzer_temp_std: Option<f64>,
    pub faims_attached: Option<String>,
    pub pump_pressure: Option<PumpPressure>,
}

/// Maps a run description onto the sample and project rows for `path`.
pub fn build_records(
    path: &Path,
    info: RunInfo,
    tables: &InstrumentTables,
) -> Result<(SampleRecord, ProjectRecord), ExtractError> {
    if info.last_scan <= 0 {
        return Err(ExtractError::Empty);
    }

    let sample_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| ExtractError::Corrupt(format!("no file name in {}", path.display())))?;
    let project_id = ProjectId::from_sample_name(&sample_name)
        .map_err(|e| ExtractError::Corrupt(e.to_string()))?;

    let ms = info.devices.iter().find_map(|d| tables.ms_name(d));
    let hplc = info.devices.iter().find_map(|d| tables.hplc_name(d));
    let (Some(ms), Some(hplc)) = (ms, hplc) else {
        return Err(ExtractError::Corrupt(format!(
            "unrecognised device combination {:?}",
            info.devices
        )));
    };

    let pump_pressure = if hplc == tables.pump_pressure_hplc {
        info.pump_pressure
    } else {
        None
    };

    let sample = SampleRecord {
        sample_name,
        project_id: project_id.to_string(),
        creation_date: info.creation_date,
        vial: info.vial,
        injection_volume: info.injection_volume,
        pump_pressure,
        analyzer_temp_mean: info.analyzer_temp_mean,
        analyzer_temp_std: info.analyzer_temp_std,
        error_tag: None,
    };
    let project = ProjectRecord {
        project_id: project_id.to_string(),
        project_date: project_id.date_token(),
        instrument: ms.to_string(),
        software_version: info.software_version,
        method: info.instrument_method,
        hplc_type: hplc.to_string(),
        time_range: info.time_range,
        faims_attached: info
            .faims_attached
            .unwrap_or_else(|| FAIMS_NOT_RECORDED.to_string()),
    };
    Ok((sample, project))
}

/// Kills and reaps the reader on every exit path.
struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self {
            child,
            reaped: false,
        }
    }

    fn wait_until(&mut self, deadline: Instant) -> Result<std::process::ExitStatus, ExtractError> {
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    self.reaped = true;
                    return Ok(status);
                }
                Ok(None) if Instant::now() >= deadline => {
                    return Err(ExtractError::Unavailable("reader timed out".to_string()));
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    return Err(ExtractError::Unavailable(format!("reader wait failed: {e}")))
                }
            }
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Runs an external reader program per file and parses its JSON output.
pub struct CommandExtractor {
    command: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    tables: InstrumentTables,
}

impl CommandExtractor {
    pub fn new(settings: &ExtractorSettings, tables: InstrumentTables) -> Self {
        Self {
            command: settings.command.clone(),
            args: settings.args.clone(),
            timeout: settings.timeout(),
            tables,
        }
    }

    fn run_reader(&self, path: &Path) -> Result<Vec<u8>, ExtractError> {
        let child = Command::new(&self.command)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                ExtractError::Unavailable(format!("cannot start {}: {e}", self.command.display()))
            })?;
        let mut guard = ChildGuard::new(child);

        let mut stdout = guard
            .child
            .stdout
            .take()
            .ok_or_else(|| ExtractError::Unavailable("reader stdout not captured".to_string()))?;
        let reader = thread::spawn(move || {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).map(|_| buf)
        });

        let status = guard.wait_until(Instant::now() + self.timeout)?;
        let output = reader
            .join()
            .map_err(|_| ExtractError::Unavailable("reader output thread panicked".to_string()))?
            .map_err(|e| ExtractError::Unavailable(format!("reading reader output: {e}")))?;

        if !status.success() {
            return Err(ExtractError::Corrupt(format!("reader exited with {status}")));
        }
        Ok(output)
    }
}

impl MetadataExtractor for CommandExtractor {
    fn extract(&self, path: &Path) -> Result<(SampleRecord, ProjectRecord), ExtractError> {
        debug!(file = %path.display(), "Running metadata reader");
        let output = self.run_reader(path)?;
        let info: RunInfo = serde_json::from_slice(&output).map_err(|e| {
            warn!(file = %path.display(), error = %e, "Reader output is not a run description");
            ExtractError::Corrupt(format!("unparseable reader output: {e}"))
        })?;
        build_records(path, info, &self.tables)
    }
}

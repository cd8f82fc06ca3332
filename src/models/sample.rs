use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PumpPressure {
    pub initial: f64,
    pub min: f64,
    pub max: f64,
    pub std: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub sample_name: String,
    pub project_id: String,
    pub creation_date: Option<String>,
    pub vial: Option<String>,
    pub injection_volume: Option<f64>,
    /// Only recorded for the pump-pressure HPLC type.
    #[serde(default)]
    pub pump_pressure: Option<PumpPressure>,
    pub analyzer_temp_mean: Option<f64>,
    pub analyzer_temp_std: Option<f64>,
    #[serde(default)]
    pub error_tag: Option<String>,
}

impl SampleRecord {
    pub fn corrupt(sample_name: &str, project_id: &str, tag: &str) -> Self {
        Self {
            sample_name: sample_name.to_string(),
            project_id: project_id.to_string(),
            creation_date: None,
            vial: None,
            injection_volume: None,
            pump_pressure: None,
            analyzer_temp_mean: None,
            analyzer_temp_std: None,
            error_tag: Some(tag.to_string()),
        }
    }
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub project_id: String,
    pub project_date: String,
    pub instrument: String,
    pub software_version: String,
    pub method: String,
    pub hplc_type: String,
    pub time_range: String,
    pub faims_attached: String,
}

/// Project-table row used for family matching.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectDate {
    pub project_id: String,
    pub project_date: String,
}

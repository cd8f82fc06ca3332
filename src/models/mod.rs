pub mod project;
pub mod project_id;
pub mod sample;

pub use project::{ProjectDate, ProjectRecord};
pub use project_id::{ProjectFamily, ProjectId};
pub use sample::{PumpPressure, SampleRecord};

use std::path::Path;

pub mod config;
pub mod crs;
pub mod error;
pub mod index;
pub mod layer;
pub mod pipeline;
pub mod processing;
pub mod snapshot;

pub use config::PipelineConfig;
pub use crs::Crs;
pub use error::{Error, Result};
pub use layer::VectorLayer;
pub use pipeline::{ChangeOutcome, ChangeSummary, JoinOutcome, Pipeline};
pub use processing::{Feedback, Parameters, Processing, Sink};

/// Runs the newest-vs-previous change detection described by `config`,
/// stamping reports with today's date.
pub fn detect_changes(config: &PipelineConfig) -> Result<ChangeOutcome> {
    Pipeline::new().run_change_detection(config, pipeline::today())
}

/// Opens a dataset and logs its CRS and attribute schema.
pub fn describe_file(path: &Path) -> Result<VectorLayer> {
    Pipeline::new().read_layer(path)
}

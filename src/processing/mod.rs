//! In-process processing engine.
//!
//! Algorithms are registered under a catalog id (`native:fixgeometries`, ...)
//! and invoked through [`Processing::run`] with a string-keyed parameter map.
//! Each run returns a map of named outputs.
//!
//! ```ignore
//! let processing = Processing::initialize();
//! let params = Parameters::new()
//!     .with("INPUT", layer)
//!     .with("OUTPUT", Sink::memory());
//! let mut outputs = processing.run("native:fixgeometries", &params, &mut Feedback::new())?;
//! let fixed = outputs.take_layer("OUTPUT")?;
//! ```

mod detect_changes;
mod feedback;
mod fix_geometries;
mod join_nearest;
mod parameters;
mod reproject;
mod spatial_index;

pub use detect_changes::{DetectVectorChanges, MatchType};
pub use feedback::Feedback;
pub use fix_geometries::{repair_geometry, FixGeometries};
pub use join_nearest::{geometry_distance, JoinByNearest};
pub use parameters::{OutputValue, Outputs, ParameterValue, Parameters, Sink};
pub use reproject::ReprojectLayer;
pub use spatial_index::CreateSpatialIndex;

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::error::ProcessingError;

/// A registered processing algorithm.
pub trait Algorithm {
    /// Catalog id, `provider:name`.
    fn id(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    fn run(&self, params: &Parameters, feedback: &mut Feedback) -> Result<Outputs, ProcessingError>;
}

/// Registry of processing algorithms keyed by id.
pub struct Processing {
    algorithms: BTreeMap<&'static str, Box<dyn Algorithm>>,
}

impl Processing {
    /// Creates an empty registry.
    pub fn empty() -> Self {
        Self {
            algorithms: BTreeMap::new(),
        }
    }

    /// Creates a registry holding the native algorithms.
    pub fn initialize() -> Self {
        let mut processing = Self::empty();
        processing.register(Box::new(FixGeometries));
        processing.register(Box::new(ReprojectLayer));
        processing.register(Box::new(CreateSpatialIndex));
        processing.register(Box::new(JoinByNearest));
        processing.register(Box::new(DetectVectorChanges));
        info!(
            "Processing initialized with {} algorithms",
            processing.algorithms.len()
        );
        processing
    }

    /// Adds an algorithm, replacing any previous one with the same id.
    pub fn register(&mut self, algorithm: Box<dyn Algorithm>) {
        debug!("Registering algorithm {}", algorithm.id());
        self.algorithms.insert(algorithm.id(), algorithm);
    }

    /// `(id, display name)` of every registered algorithm, sorted by id.
    pub fn algorithms(&self) -> Vec<(&'static str, &'static str)> {
        self.algorithms
            .values()
            .map(|alg| (alg.id(), alg.display_name()))
            .collect()
    }

    /// Runs the algorithm registered under `id`.
    pub fn run(
        &self,
        id: &str,
        params: &Parameters,
        feedback: &mut Feedback,
    ) -> Result<Outputs, ProcessingError> {
        let algorithm = self
            .algorithms
            .get(id)
            .ok_or_else(|| ProcessingError::UnknownAlgorithm(id.to_string()))?;
        debug!("Running {} ({})", algorithm.id(), algorithm.display_name());
        feedback.set_progress(0.0);
        let outputs = algorithm.run(params, feedback)?;
        feedback.set_progress(100.0);
        Ok(outputs)
    }
}

impl Default for Processing {
    fn default() -> Self {
        Self::initialize()
    }
}

use std::sync::Arc;

use tracing::info;

use super::{Algorithm, Feedback, Outputs, Parameters};
use crate::error::ProcessingError;

/// `native:createspatialindex`: INPUT, OUTPUT -> OUTPUT.
pub struct CreateSpatialIndex;

impl Algorithm for CreateSpatialIndex {
    fn id(&self) -> &'static str {
        "native:createspatialindex"
    }

    fn display_name(&self) -> &'static str {
        "Create spatial index"
    }

    fn run(&self, params: &Parameters, _feedback: &mut Feedback) -> Result<Outputs, ProcessingError> {
        let input = params.layer("INPUT")?;
        let sink = params.sink("OUTPUT")?;

        let mut layer = Arc::try_unwrap(input).unwrap_or_else(|shared| (*shared).clone());
        if layer.has_spatial_index() {
            info!("Spatial index already exists on {}", layer.name);
        } else {
            let size = layer.ensure_spatial_index().len();
            info!("Spatial index on {} holds {} envelopes", layer.name, size);
        }

        let mut outputs = Outputs::new();
        outputs.emit_layer("OUTPUT", layer, sink)?;
        Ok(outputs)
    }
}

use geo::{Coord, MapCoords};
use proj::Proj;
use tracing::info;

use super::{Algorithm, Feedback, Outputs, Parameters};
use crate::error::ProcessingError;
use crate::layer::VectorLayer;

/// `native:reprojectlayer`: INPUT, TARGET_CRS, OUTPUT -> OUTPUT.
pub struct ReprojectLayer;

impl Algorithm for ReprojectLayer {
    fn id(&self) -> &'static str {
        "native:reprojectlayer"
    }

    fn display_name(&self) -> &'static str {
        "Reproject layer"
    }

    fn run(&self, params: &Parameters, feedback: &mut Feedback) -> Result<Outputs, ProcessingError> {
        let input = params.layer("INPUT")?;
        let target = params.crs("TARGET_CRS")?;
        let sink = params.sink("OUTPUT")?;

        let mut outputs = Outputs::new();
        if input.crs == target {
            info!("Layer {} is already in {}", input.name, target);
            let layer = VectorLayer::new(
                input.name.clone(),
                target,
                input.fields().to_vec(),
                input.features().to_vec(),
            );
            outputs.emit_layer("OUTPUT", layer, sink)?;
            return Ok(outputs);
        }

        let from = input.crs.authid();
        let to = target.authid();
        let transform = Proj::new_known_crs(&from, &to, None).map_err(|e| {
            ProcessingError::Transform {
                from: from.clone(),
                to: to.clone(),
                reason: e.to_string(),
            }
        })?;

        let total = input.feature_count();
        let mut features = Vec::with_capacity(total);
        for (done, feature) in input.features().iter().enumerate() {
            feedback.set_progress_of(done, total);
            let mut projected = feature.clone();
            if let Some(geometry) = &feature.geometry {
                let transformed = geometry
                    .try_map_coords(|c| {
                        transform
                            .convert((c.x, c.y))
                            .map(|(x, y)| Coord { x, y })
                    })
                    .map_err(|e| ProcessingError::Reproject {
                        id: feature.id,
                        reason: e.to_string(),
                    })?;
                projected.geometry = Some(transformed);
            }
            features.push(projected);
        }

        info!("Reprojected {} features from {} to {}", total, from, to);
        let layer = VectorLayer::new(input.name.clone(), target, input.fields().to_vec(), features);
        outputs.emit_layer("OUTPUT", layer, sink)?;
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Crs;
    use crate::layer::{Attributes, Feature};
    use geo::{point, Geometry, Point};

    fn layer_with(point: Point<f64>, crs: Crs) -> VectorLayer {
        VectorLayer::from_features(
            "points",
            crs,
            vec![Feature::new(1, Some(Geometry::Point(point)), Attributes::new())],
        )
    }

    #[test]
    fn reprojects_to_web_mercator() {
        let layer = layer_with(point!(x: 10.0, y: 0.0), Crs::wgs84());
        let params = Parameters::new()
            .with("INPUT", layer)
            .with("TARGET_CRS", "EPSG:3857");
        let mut outputs = ReprojectLayer.run(&params, &mut Feedback::new()).unwrap();
        let projected = outputs.take_layer("OUTPUT").unwrap();

        assert_eq!(projected.crs, Crs::epsg(3857));
        match &projected.features()[0].geometry {
            Some(Geometry::Point(p)) => {
                assert!((p.x() - 1_113_194.907_932_7).abs() < 1e-3);
                assert!(p.y().abs() < 1e-6);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn latitude_beyond_the_pole_names_the_feature() {
        let layer = layer_with(point!(x: 10.0, y: 95.0), Crs::wgs84());
        let params = Parameters::new()
            .with("INPUT", layer)
            .with("TARGET_CRS", "EPSG:3857");
        match ReprojectLayer.run(&params, &mut Feedback::new()) {
            Err(ProcessingError::Reproject { id, .. }) => assert_eq!(id, 1),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn same_crs_is_a_copy() {
        let layer = layer_with(point!(x: 500_000.0, y: 6_200_000.0), Crs::epsg(3044));
        let params = Parameters::new()
            .with("INPUT", layer)
            .with("TARGET_CRS", Crs::epsg(3044));
        let mut outputs = ReprojectLayer.run(&params, &mut Feedback::new()).unwrap();
        let copy = outputs.take_layer("OUTPUT").unwrap();
        assert_eq!(
            copy.features()[0].geometry,
            Some(Geometry::Point(point!(x: 500_000.0, y: 6_200_000.0)))
        );
    }

    #[test]
    fn rejects_unparseable_target() {
        let layer = layer_with(point!(x: 0.0, y: 0.0), Crs::wgs84());
        let params = Parameters::new().with("INPUT", layer).with("TARGET_CRS", "3044");
        assert!(matches!(
            ReprojectLayer.run(&params, &mut Feedback::new()),
            Err(ProcessingError::InvalidParameter { .. })
        ));
    }
}

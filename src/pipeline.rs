//! Change detection between the newest and previous dataset snapshot.
//!
//! Every geometry operation is delegated to the processing registry; this
//! module picks the inputs, builds parameter maps and checks that layers
//! share a CRS before comparing them.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{Local, NaiveDate};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::crs::Crs;
use crate::error::{Result, SnapshotError};
use crate::layer::{dated_output_path, VectorLayer};
use crate::processing::{Feedback, Parameters, Processing, Sink};
use crate::snapshot;

/// `dd-mm-YYYY`, the stamp used in report file names.
pub fn date_stamp(date: NaiveDate) -> String {
    date.format("%d-%m-%Y").to_string()
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSummary {
    pub unchanged: usize,
    pub added: usize,
    pub deleted: usize,
    pub added_path: PathBuf,
    pub deleted_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeOutcome {
    /// Layers were in different reference systems; nothing was compared.
    CrsMismatch { previous: Crs, newest: Crs },
    Detected(ChangeSummary),
}

#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
    CrsMismatch { points: Crs, lines: Crs },
    Joined {
        path: PathBuf,
        joined: usize,
        unjoinable: usize,
    },
}

/// Thin orchestration over a [`Processing`] registry.
pub struct Pipeline {
    processing: Processing,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            processing: Processing::initialize(),
        }
    }

    pub fn processing(&self) -> &Processing {
        &self.processing
    }

    /// Opens a dataset and logs its CRS and schema.
    pub fn read_layer(&self, path: &Path) -> Result<VectorLayer> {
        info!("Reading {}", path.display());
        let start = Instant::now();
        let layer = VectorLayer::open(path)?;
        layer.describe();
        info!(
            "Read {} in {:.2} minutes",
            layer.name,
            start.elapsed().as_secs_f64() / 60.0
        );
        Ok(layer)
    }

    pub fn fix_geometries(&self, layer: VectorLayer) -> Result<VectorLayer> {
        info!("Fixing geometries of {}", layer.name);
        let params = Parameters::new()
            .with("INPUT", layer)
            .with("OUTPUT", Sink::memory());
        let mut outputs = self
            .processing
            .run("native:fixgeometries", &params, &mut Feedback::new())?;
        info!("Geometry fixed successfully");
        Ok(outputs.take_layer("OUTPUT")?)
    }

    pub fn reproject_layer(&self, layer: VectorLayer, target: &Crs) -> Result<VectorLayer> {
        info!("Re-projecting {} to {}", layer.name, target);
        let params = Parameters::new()
            .with("INPUT", layer)
            .with("TARGET_CRS", target.clone())
            .with("OUTPUT", Sink::Memory(Some("Reprojected".to_string())));
        let mut outputs = self
            .processing
            .run("native:reprojectlayer", &params, &mut Feedback::new())?;
        info!("Reprojected successfully to {}", target);
        Ok(outputs.take_layer("OUTPUT")?)
    }

    /// Attaches a spatial index unless the layer already has one.
    pub fn create_spatial_index(&self, layer: VectorLayer) -> Result<VectorLayer> {
        if layer.has_spatial_index() {
            info!("Spatial index already exists on {}", layer.name);
            return Ok(layer);
        }
        let params = Parameters::new()
            .with("INPUT", layer)
            .with("OUTPUT", Sink::Memory(Some("SpatialIndex".to_string())));
        let mut outputs = self
            .processing
            .run("native:createspatialindex", &params, &mut Feedback::new())?;
        Ok(outputs.take_layer("OUTPUT")?)
    }

    /// Writes the features added since `previous` (and optionally the
    /// deleted ones) to `output_dir`.
    ///
    /// Layers in different CRS are not compared.
    pub fn detect_vector_changes(
        &self,
        previous: VectorLayer,
        newest: VectorLayer,
        output_dir: &Path,
        date: NaiveDate,
        write_deleted: bool,
    ) -> Result<ChangeOutcome> {
        if previous.crs != newest.crs {
            warn!(
                "CRS does not match: previous {} vs newest {}, skipping change detection",
                previous.crs, newest.crs
            );
            return Ok(ChangeOutcome::CrsMismatch {
                previous: previous.crs,
                newest: newest.crs,
            });
        }
        info!("Both datasets are in {}, detecting vector changes", previous.crs);

        let stamp = date_stamp(date);
        let added_path = dated_output_path(output_dir, "vector_added_", &stamp);
        let deleted_path = write_deleted.then(|| dated_output_path(output_dir, "vector_deleted_", &stamp));

        let mut params = Parameters::new()
            .with("ORIGINAL", previous)
            .with("REVISED", newest)
            .with("COMPARE_ATTRIBUTES", "")
            .with("MATCH_TYPE", 1i64)
            .with("ADDED", Sink::file(&added_path));
        if let Some(path) = &deleted_path {
            params.insert("DELETED", Sink::file(path));
        }

        let outputs = self
            .processing
            .run("native:detectvectorchanges", &params, &mut Feedback::new())?;
        let summary = ChangeSummary {
            unchanged: outputs.count("UNCHANGED_COUNT")?,
            added: outputs.count("ADDED_COUNT")?,
            deleted: outputs.count("DELETED_COUNT")?,
            added_path,
            deleted_path,
        };
        info!("Changes detected successfully");
        info!("Output saved in: {}", output_dir.display());
        Ok(ChangeOutcome::Detected(summary))
    }

    /// Joins the attributes of the nearest line onto every point and
    /// writes `<LABEL>_distance_calculated(<date>).geojson`.
    pub fn join_attributes_by_nearest(
        &self,
        points: VectorLayer,
        lines: VectorLayer,
        output_dir: &Path,
        label: &str,
        date: NaiveDate,
    ) -> Result<JoinOutcome> {
        if points.crs != lines.crs {
            warn!(
                "CRS does not match: points {} vs lines {}, skipping join",
                points.crs, lines.crs
            );
            return Ok(JoinOutcome::CrsMismatch {
                points: points.crs,
                lines: lines.crs,
            });
        }
        info!("Both datasets are in {}, joining distance columns", points.crs);

        let path = dated_output_path(
            output_dir,
            &format!("{}_distance_calculated", label.to_uppercase()),
            &date_stamp(date),
        );
        let lines = self.create_spatial_index(lines)?;
        let params = Parameters::new()
            .with("INPUT", points)
            .with("INPUT_2", lines)
            .with("MAX_DISTANCE", None::<f64>)
            .with("NEIGHBORS", 1i64)
            .with("OUTPUT", Sink::file(&path));
        let outputs = self
            .processing
            .run("native:joinbynearest", &params, &mut Feedback::new())?;
        info!("Distance successfully calculated, output saved in {}", output_dir.display());
        Ok(JoinOutcome::Joined {
            path,
            joined: outputs.count("JOINED_COUNT")?,
            unjoinable: outputs.count("UNJOINABLE_COUNT")?,
        })
    }

    /// The full batch: pick snapshots, read, fix, reproject, compare.
    pub fn run_change_detection(&self, config: &PipelineConfig, date: NaiveDate) -> Result<ChangeOutcome> {
        info!("Starting change detection");
        let start = Instant::now();
        let extension = Some(config.dataset_extension.as_str());

        let newest_path = snapshot::newest_folder_file(&config.newest_dir, extension)?;
        let previous_path = snapshot::newest_file_with_extension(&config.previous_dir, extension)?
            .ok_or_else(|| SnapshotError::NoFiles(config.previous_dir.clone()))?;
        info!("Previous report: {}", previous_path.display());

        let newest = self.read_layer(&newest_path)?;
        let previous = self.read_layer(&previous_path)?;

        let newest = self.fix_geometries(newest)?;
        let newest = self.reproject_layer(newest, &config.target_crs)?;

        let outcome =
            self.detect_vector_changes(previous, newest, &config.output_dir, date, config.write_deleted)?;
        info!(
            "Entire process finished in {:.2} minutes",
            start.elapsed().as_secs_f64() / 60.0
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{Attributes, Feature};
    use geo::{point, Geometry};

    fn layer(crs: Crs, coords: &[(f64, f64)]) -> VectorLayer {
        let features = coords
            .iter()
            .enumerate()
            .map(|(i, (x, y))| {
                Feature::new(i as u64 + 1, Some(Geometry::Point(point!(x: *x, y: *y))), Attributes::new())
            })
            .collect();
        VectorLayer::from_features("points", crs, features)
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 7).unwrap()
    }

    #[test]
    fn date_stamp_is_day_month_year() {
        assert_eq!(date_stamp(date()), "07-03-2024");
    }

    #[test]
    fn crs_mismatch_skips_detection() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new();
        let outcome = pipeline
            .detect_vector_changes(
                layer(Crs::wgs84(), &[(0.0, 0.0)]),
                layer(Crs::epsg(3044), &[(0.0, 0.0)]),
                dir.path(),
                date(),
                true,
            )
            .unwrap();
        assert_eq!(
            outcome,
            ChangeOutcome::CrsMismatch {
                previous: Crs::wgs84(),
                newest: Crs::epsg(3044),
            }
        );
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn writes_added_and_deleted_reports() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new();
        let outcome = pipeline
            .detect_vector_changes(
                layer(Crs::epsg(3044), &[(0.0, 0.0), (1.0, 1.0)]),
                layer(Crs::epsg(3044), &[(1.0, 1.0), (2.0, 2.0), (3.0, 3.0)]),
                dir.path(),
                date(),
                true,
            )
            .unwrap();
        let summary = match outcome {
            ChangeOutcome::Detected(summary) => summary,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!((summary.unchanged, summary.added, summary.deleted), (1, 2, 1));
        assert_eq!(summary.added_path, dir.path().join("vector_added_(07-03-2024).geojson"));
        assert_eq!(VectorLayer::open(&summary.added_path).unwrap().feature_count(), 2);
        let deleted_path = summary.deleted_path.unwrap();
        assert_eq!(VectorLayer::open(&deleted_path).unwrap().feature_count(), 1);
    }

    #[test]
    fn join_writes_labelled_report() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new();
        let outcome = pipeline
            .join_attributes_by_nearest(
                layer(Crs::epsg(3044), &[(0.0, 0.0), (5.0, 5.0)]),
                layer(Crs::epsg(3044), &[(1.0, 0.0)]),
                dir.path(),
                "gfc",
                date(),
            )
            .unwrap();
        let expected = dir.path().join("GFC_distance_calculated(07-03-2024).geojson");
        assert_eq!(
            outcome,
            JoinOutcome::Joined {
                path: expected.clone(),
                joined: 2,
                unjoinable: 0,
            }
        );
        assert!(expected.exists());
    }

    #[test]
    fn spatial_index_is_created_once() {
        let pipeline = Pipeline::new();
        let indexed = pipeline
            .create_spatial_index(layer(Crs::epsg(3044), &[(0.0, 0.0)]))
            .unwrap();
        assert!(indexed.has_spatial_index());
        let again = pipeline.create_spatial_index(indexed).unwrap();
        assert!(again.has_spatial_index());
    }
}

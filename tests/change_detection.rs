use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use filetime::{set_file_mtime, FileTime};
use serde_json::json;

use gis_change_detector::{ChangeOutcome, Crs, Pipeline, PipelineConfig, VectorLayer};

fn write_collection(path: &Path, crs: &str, features: serde_json::Value) {
    let collection = json!({
        "type": "FeatureCollection",
        "crs": { "type": "name", "properties": { "name": crs } },
        "features": features,
    });
    fs::write(path, serde_json::to_string_pretty(&collection).unwrap()).unwrap();
}

fn square(x: f64, y: f64) -> serde_json::Value {
    json!({
        "type": "Polygon",
        "coordinates": [[[x, y], [x + 10.0, y], [x + 10.0, y + 10.0], [x, y + 10.0], [x, y]]]
    })
}

fn feature(geometry: serde_json::Value, name: &str) -> serde_json::Value {
    json!({ "type": "Feature", "geometry": geometry, "properties": { "name": name } })
}

struct Workspace {
    _root: tempfile::TempDir,
    config: PipelineConfig,
}

/// One delivery folder with the newest data, two previous reports of which
/// `report_new.geojson` is the most recent.
fn workspace(previous_crs: &str) -> Workspace {
    let root = tempfile::tempdir().unwrap();
    let config = PipelineConfig::rooted_at(root.path());
    let delivery = config.newest_dir.join("delivery_2024_03");
    fs::create_dir_all(&delivery).unwrap();
    fs::create_dir_all(&config.previous_dir).unwrap();

    // Same parcel with a rotated, unclosed ring and a repeated vertex: fixed
    // and matched tolerantly. Plus one new parcel.
    write_collection(
        &delivery.join("parcels.geojson"),
        "urn:ogc:def:crs:EPSG::3044",
        json!([
            feature(
                json!({
                    "type": "Polygon",
                    "coordinates": [[[510.0, 6100.0], [510.0, 6110.0], [510.0, 6110.0], [500.0, 6110.0], [500.0, 6100.0], [510.0, 6100.0]]]
                }),
                "kept"
            ),
            feature(square(600.0, 6100.0), "new"),
        ]),
    );
    fs::write(delivery.join("readme.txt"), "notes").unwrap();

    let stale = config.previous_dir.join("report_old.geojson");
    write_collection(&stale, previous_crs, json!([]));
    set_file_mtime(&stale, FileTime::from_unix_time(1_000, 0)).unwrap();

    let latest = config.previous_dir.join("report_new.geojson");
    write_collection(
        &latest,
        previous_crs,
        json!([
            feature(square(500.0, 6100.0), "kept"),
            feature(square(700.0, 6100.0), "gone"),
        ]),
    );
    set_file_mtime(&latest, FileTime::from_unix_time(2_000, 0)).unwrap();

    Workspace {
        _root: root,
        config,
    }
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
}

#[test]
fn detects_added_and_deleted_parcels() {
    let ws = workspace("EPSG:3044");
    let outcome = Pipeline::new().run_change_detection(&ws.config, date()).unwrap();

    let summary = match outcome {
        ChangeOutcome::Detected(summary) => summary,
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!((summary.unchanged, summary.added, summary.deleted), (1, 1, 1));
    assert_eq!(
        summary.added_path,
        ws.config.output_dir.join("vector_added_(15-03-2024).geojson")
    );

    let added = VectorLayer::open(&summary.added_path).unwrap();
    assert_eq!(added.crs, Crs::epsg(3044));
    assert_eq!(added.features()[0].attribute("name"), &json!("new"));

    let deleted = VectorLayer::open(summary.deleted_path.as_deref().unwrap()).unwrap();
    assert_eq!(deleted.features()[0].attribute("name"), &json!("gone"));
}

#[test]
fn skip_deleted_writes_only_added() {
    let mut ws = workspace("EPSG:3044");
    ws.config.write_deleted = false;
    let outcome = Pipeline::new().run_change_detection(&ws.config, date()).unwrap();
    match outcome {
        ChangeOutcome::Detected(summary) => assert_eq!(summary.deleted_path, None),
        other => panic!("unexpected {:?}", other),
    }
    let written: Vec<_> = fs::read_dir(&ws.config.output_dir).unwrap().collect();
    assert_eq!(written.len(), 1);
}

#[test]
fn crs_mismatch_writes_nothing() {
    let ws = workspace("EPSG:25832");
    let outcome = Pipeline::new().run_change_detection(&ws.config, date()).unwrap();
    assert_eq!(
        outcome,
        ChangeOutcome::CrsMismatch {
            previous: Crs::epsg(25832),
            newest: Crs::epsg(3044),
        }
    );
    assert!(!ws.config.output_dir.exists());
}

#[test]
fn missing_previous_reports_is_an_error() {
    let ws = workspace("EPSG:3044");
    for entry in fs::read_dir(&ws.config.previous_dir).unwrap() {
        fs::remove_file(entry.unwrap().path()).unwrap();
    }
    assert!(Pipeline::new().run_change_detection(&ws.config, date()).is_err());
}

use geo::{BoundingRect, Coord, Geometry, LineString, Polygon};
use tracing::info;

use super::{Algorithm, Feedback, Outputs, Parameters};
use crate::error::ProcessingError;
use crate::index::SpatialIndex;
use crate::layer::{Feature, VectorLayer};

/// How two geometries are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    /// Vertices must match one for one, in order.
    Exact,
    /// Same shape regardless of start vertex, orientation, direction, part
    /// order and repeated vertices.
    Tolerant,
}

impl MatchType {
    fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(MatchType::Exact),
            1 => Some(MatchType::Tolerant),
            _ => None,
        }
    }
}

/// `native:detectvectorchanges`: ORIGINAL, REVISED, COMPARE_ATTRIBUTES,
/// MATCH_TYPE, UNCHANGED, ADDED, DELETED -> UNCHANGED, ADDED, DELETED and
/// their `_COUNT`s.
pub struct DetectVectorChanges;

impl Algorithm for DetectVectorChanges {
    fn id(&self) -> &'static str {
        "native:detectvectorchanges"
    }

    fn display_name(&self) -> &'static str {
        "Detect dataset changes"
    }

    fn run(&self, params: &Parameters, feedback: &mut Feedback) -> Result<Outputs, ProcessingError> {
        let original = params.layer("ORIGINAL")?;
        let revised = params.layer("REVISED")?;
        let compare = params.fields("COMPARE_ATTRIBUTES")?.unwrap_or_default();
        let match_code = params.integer_or("MATCH_TYPE", 1)?;
        let match_type =
            MatchType::from_code(match_code).ok_or_else(|| ProcessingError::InvalidParameter {
                name: "MATCH_TYPE".to_string(),
                reason: format!("expected 0 or 1, got {}", match_code),
            })?;

        if original.crs != revised.crs {
            return Err(ProcessingError::CrsMismatch {
                left: original.crs.authid(),
                right: revised.crs.authid(),
            });
        }
        for name in &compare {
            if original.field(name).is_none() || revised.field(name).is_none() {
                return Err(ProcessingError::InvalidParameter {
                    name: "COMPARE_ATTRIBUTES".to_string(),
                    reason: format!("field {} must exist in both layers", name),
                });
            }
        }

        let changes = diff(original.features(), revised.features(), &compare, match_type, feedback);
        info!(
            "{} unchanged, {} added, {} deleted features",
            changes.unchanged.len(),
            changes.added.len(),
            changes.deleted.len()
        );

        let pick = |features: &[Feature], positions: &[usize]| -> Vec<Feature> {
            positions.iter().map(|&p| features[p].clone()).collect()
        };

        let mut outputs = Outputs::new();
        outputs.insert_count("UNCHANGED_COUNT", changes.unchanged.len());
        outputs.insert_count("ADDED_COUNT", changes.added.len());
        outputs.insert_count("DELETED_COUNT", changes.deleted.len());
        outputs.emit_layer(
            "UNCHANGED",
            VectorLayer::new(
                "unchanged",
                original.crs.clone(),
                original.fields().to_vec(),
                pick(original.features(), &changes.unchanged),
            ),
            params.sink("UNCHANGED")?,
        )?;
        outputs.emit_layer(
            "ADDED",
            VectorLayer::new(
                "added",
                revised.crs.clone(),
                revised.fields().to_vec(),
                pick(revised.features(), &changes.added),
            ),
            params.sink("ADDED")?,
        )?;
        outputs.emit_layer(
            "DELETED",
            VectorLayer::new(
                "deleted",
                original.crs.clone(),
                original.fields().to_vec(),
                pick(original.features(), &changes.deleted),
            ),
            params.sink("DELETED")?,
        )?;
        Ok(outputs)
    }
}

/// Positions of unchanged (in the original), added (in the revised) and
/// deleted (in the original) features.
#[derive(Debug, Default, PartialEq, Eq)]
struct Changes {
    unchanged: Vec<usize>,
    added: Vec<usize>,
    deleted: Vec<usize>,
}

fn diff(
    original: &[Feature],
    revised: &[Feature],
    compare: &[String],
    match_type: MatchType,
    feedback: &mut Feedback,
) -> Changes {
    let index = SpatialIndex::build(original);
    let without_geometry: Vec<usize> = original
        .iter()
        .enumerate()
        .filter(|(_, f)| f.geometry.as_ref().and_then(|g| g.bounding_rect()).is_none())
        .map(|(p, _)| p)
        .collect();

    let mut matched = vec![false; original.len()];
    let mut changes = Changes::default();

    for (done, feature) in revised.iter().enumerate() {
        feedback.set_progress_of(done, revised.len());

        let mut candidates: Vec<usize> = match feature.geometry.as_ref().and_then(|g| g.bounding_rect()) {
            Some(rect) => index.intersecting(&rect).collect(),
            None => without_geometry.clone(),
        };
        candidates.sort_unstable();

        let found = candidates.into_iter().find(|&p| {
            !matched[p]
                && same_geometry(&original[p].geometry, &feature.geometry, match_type)
                && compare
                    .iter()
                    .all(|name| original[p].attribute(name) == feature.attribute(name))
        });

        match found {
            Some(p) => {
                matched[p] = true;
                changes.unchanged.push(p);
            }
            None => changes.added.push(done),
        }
    }

    changes.unchanged.sort_unstable();
    changes.deleted = (0..original.len()).filter(|&p| !matched[p]).collect();
    changes
}

fn same_geometry(a: &Option<Geometry<f64>>, b: &Option<Geometry<f64>>, match_type: MatchType) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => match match_type {
            MatchType::Exact => a == b,
            MatchType::Tolerant => canonical(a) == canonical(b),
        },
        _ => false,
    }
}

/// Coordinate key with a total order. `-0.0` is folded into `0.0`.
type Key = (u64, u64);

fn key(c: &Coord<f64>) -> Key {
    let fold = |v: f64| if v == 0.0 { 0.0f64 } else { v };
    (fold(c.x).to_bits(), fold(c.y).to_bits())
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Part {
    Point(Key),
    Line(Vec<Key>),
    Polygon(Vec<Vec<Key>>),
}

/// Sorted single parts in normal form; two geometries with the same
/// canonical form describe the same shape.
fn canonical(geometry: &Geometry<f64>) -> Vec<Part> {
    let mut parts = Vec::new();
    collect_parts(geometry, &mut parts);
    parts.sort();
    parts
}

fn collect_parts(geometry: &Geometry<f64>, parts: &mut Vec<Part>) {
    match geometry {
        Geometry::Point(p) => parts.push(Part::Point(key(&p.0))),
        Geometry::MultiPoint(mp) => parts.extend(mp.iter().map(|p| Part::Point(key(&p.0)))),
        Geometry::Line(line) => parts.push(Part::Line(line_keys(&LineString::new(vec![line.start, line.end])))),
        Geometry::LineString(ls) => parts.push(Part::Line(line_keys(ls))),
        Geometry::MultiLineString(mls) => parts.extend(mls.iter().map(|ls| Part::Line(line_keys(ls)))),
        Geometry::Polygon(polygon) => parts.push(polygon_part(polygon)),
        Geometry::MultiPolygon(mp) => parts.extend(mp.iter().map(polygon_part)),
        Geometry::Rect(rect) => parts.push(polygon_part(&rect.to_polygon())),
        Geometry::Triangle(triangle) => parts.push(polygon_part(&triangle.to_polygon())),
        Geometry::GeometryCollection(gc) => gc.iter().for_each(|g| collect_parts(g, parts)),
    }
}

fn dedup_keys(line: &LineString<f64>) -> Vec<Key> {
    let mut keys: Vec<Key> = line.coords().map(key).collect();
    keys.dedup();
    keys
}

/// A line and its reverse normalise to the smaller of the two.
fn line_keys(line: &LineString<f64>) -> Vec<Key> {
    let forward = dedup_keys(line);
    let mut backward = forward.clone();
    backward.reverse();
    forward.min(backward)
}

/// Open ring rotated to its smallest vertex, in whichever direction sorts first.
fn ring_keys(ring: &LineString<f64>) -> Vec<Key> {
    let mut keys = dedup_keys(ring);
    if keys.len() > 1 && keys.first() == keys.last() {
        keys.pop();
    }
    let rotate = |mut keys: Vec<Key>| {
        if let Some(start) = keys.iter().enumerate().min_by_key(|(_, k)| **k).map(|(i, _)| i) {
            keys.rotate_left(start);
        }
        keys
    };
    let mut reversed = keys.clone();
    reversed.reverse();
    rotate(keys).min(rotate(reversed))
}

fn polygon_part(polygon: &Polygon<f64>) -> Part {
    let mut rings = vec![ring_keys(polygon.exterior())];
    let mut holes: Vec<Vec<Key>> = polygon.interiors().iter().map(ring_keys).collect();
    holes.sort();
    rings.extend(holes);
    Part::Polygon(rings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Crs;
    use crate::layer::Attributes;
    use geo::{line_string, point, polygon, MultiPolygon};
    use serde_json::{json, Value};

    fn attrs(value: Value) -> Attributes {
        value.as_object().cloned().unwrap()
    }

    fn square(offset: f64) -> Geometry<f64> {
        Geometry::Polygon(polygon![
            (x: offset, y: 0.0),
            (x: offset + 1.0, y: 0.0),
            (x: offset + 1.0, y: 1.0),
            (x: offset, y: 1.0),
        ])
    }

    fn layer(features: Vec<Feature>) -> VectorLayer {
        VectorLayer::from_features("parcels", Crs::epsg(3044), features)
    }

    #[test]
    fn tolerant_match_ignores_start_and_orientation() {
        let a = square(0.0);
        let rotated_reversed = Geometry::Polygon(polygon![
            (x: 1.0, y: 1.0),
            (x: 1.0, y: 0.0),
            (x: 0.0, y: 0.0),
            (x: 0.0, y: 1.0),
        ]);
        assert!(same_geometry(&Some(a.clone()), &Some(rotated_reversed.clone()), MatchType::Tolerant));
        assert!(!same_geometry(&Some(a), &Some(rotated_reversed), MatchType::Exact));
    }

    #[test]
    fn tolerant_match_ignores_direction_part_order_and_multi() {
        let forward = Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0), (x: 1.0, y: 1.0), (x: 2.0, y: 0.0)]);
        let backward = Geometry::LineString(line_string![(x: 2.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 0.0)]);
        assert_eq!(canonical(&forward), canonical(&backward));

        let (a, b) = match (square(0.0), square(5.0)) {
            (Geometry::Polygon(a), Geometry::Polygon(b)) => (a, b),
            _ => unreachable!(),
        };
        let ab = Geometry::MultiPolygon(MultiPolygon::new(vec![a.clone(), b.clone()]));
        let ba = Geometry::MultiPolygon(MultiPolygon::new(vec![b, a.clone()]));
        assert_eq!(canonical(&ab), canonical(&ba));
        assert_eq!(
            canonical(&Geometry::Polygon(a.clone())),
            canonical(&Geometry::MultiPolygon(MultiPolygon::new(vec![a])))
        );
    }

    #[test]
    fn detects_added_deleted_and_unchanged() {
        let original = layer(vec![
            Feature::new(1, Some(square(0.0)), attrs(json!({"owner": "x"}))),
            Feature::new(2, Some(square(2.0)), attrs(json!({"owner": "y"}))),
            Feature::new(3, Some(square(4.0)), attrs(json!({"owner": "z"}))),
        ]);
        let revised = layer(vec![
            Feature::new(10, Some(square(0.0)), attrs(json!({"owner": "x"}))),
            Feature::new(11, Some(square(2.0)), attrs(json!({"owner": "changed"}))),
            Feature::new(12, Some(square(8.0)), attrs(json!({"owner": "new"}))),
        ]);

        let params = Parameters::new()
            .with("ORIGINAL", original.clone())
            .with("REVISED", revised.clone())
            .with("COMPARE_ATTRIBUTES", "")
            .with("MATCH_TYPE", 1i64);
        let mut outputs = DetectVectorChanges.run(&params, &mut Feedback::new()).unwrap();
        assert_eq!(outputs.count("UNCHANGED_COUNT").unwrap(), 2);
        assert_eq!(outputs.count("ADDED_COUNT").unwrap(), 1);
        assert_eq!(outputs.count("DELETED_COUNT").unwrap(), 1);
        let added = outputs.take_layer("ADDED").unwrap();
        assert_eq!(added.features()[0].id, 12);

        let params = Parameters::new()
            .with("ORIGINAL", original)
            .with("REVISED", revised)
            .with("COMPARE_ATTRIBUTES", vec!["owner".to_string()]);
        let mut outputs = DetectVectorChanges.run(&params, &mut Feedback::new()).unwrap();
        let added: Vec<u64> = outputs.take_layer("ADDED").unwrap().features().iter().map(|f| f.id).collect();
        let deleted: Vec<u64> = outputs.take_layer("DELETED").unwrap().features().iter().map(|f| f.id).collect();
        assert_eq!(added, vec![11, 12]);
        assert_eq!(deleted, vec![2, 3]);
    }

    #[test]
    fn duplicates_match_one_to_one() {
        let original = vec![Feature::new(1, Some(square(0.0)), Attributes::new())];
        let revised = vec![
            Feature::new(1, Some(square(0.0)), Attributes::new()),
            Feature::new(2, Some(square(0.0)), Attributes::new()),
        ];
        let changes = diff(&original, &revised, &[], MatchType::Exact, &mut Feedback::new());
        assert_eq!(
            changes,
            Changes {
                unchanged: vec![0],
                added: vec![1],
                deleted: vec![],
            }
        );
    }

    #[test]
    fn null_geometries_match_each_other() {
        let original = vec![
            Feature::new(1, None, Attributes::new()),
            Feature::new(2, Some(Geometry::Point(point!(x: 1.0, y: 1.0))), Attributes::new()),
        ];
        let revised = vec![Feature::new(1, None, Attributes::new())];
        let changes = diff(&original, &revised, &[], MatchType::Tolerant, &mut Feedback::new());
        assert_eq!(changes.unchanged, vec![0]);
        assert_eq!(changes.deleted, vec![1]);
    }

    #[test]
    fn unknown_compare_attribute_is_rejected() {
        let params = Parameters::new()
            .with("ORIGINAL", layer(vec![]))
            .with("REVISED", layer(vec![]))
            .with("COMPARE_ATTRIBUTES", "owner");
        assert!(matches!(
            DetectVectorChanges.run(&params, &mut Feedback::new()),
            Err(ProcessingError::InvalidParameter { .. })
        ));
    }
}

use geo::{BoundingRect, Closest, ClosestPoint, CoordsIter, EuclideanDistance, Geometry, Intersects, Point};
use serde_json::{json, Value};
use tracing::info;

use super::{Algorithm, Feedback, Outputs, Parameters};
use crate::error::ProcessingError;
use crate::index::SpatialIndex;
use crate::layer::{Attributes, Feature, Field, FieldType, VectorLayer};

/// `native:joinbynearest`: INPUT, INPUT_2, FIELDS_TO_COPY, DISCARD_NONMATCHING,
/// PREFIX, NEIGHBORS, MAX_DISTANCE, OUTPUT -> OUTPUT, JOINED_COUNT,
/// UNJOINABLE_COUNT.
pub struct JoinByNearest;

/// A candidate neighbour, ordered by distance.
struct Neighbour {
    position: usize,
    distance: f64,
    from: Point<f64>,
    to: Point<f64>,
}

impl Algorithm for JoinByNearest {
    fn id(&self) -> &'static str {
        "native:joinbynearest"
    }

    fn display_name(&self) -> &'static str {
        "Join attributes by nearest"
    }

    fn run(&self, params: &Parameters, feedback: &mut Feedback) -> Result<Outputs, ProcessingError> {
        let input = params.layer("INPUT")?;
        let join = params.layer("INPUT_2")?;
        let copy_fields = params.fields("FIELDS_TO_COPY")?;
        let discard_nonmatching = params.bool_or("DISCARD_NONMATCHING", false)?;
        let prefix = params.text_or("PREFIX", "")?;
        let neighbours = params.integer_or("NEIGHBORS", 1)?;
        let max_distance = params.optional_number("MAX_DISTANCE")?;
        let sink = params.sink("OUTPUT")?;

        if input.crs != join.crs {
            return Err(ProcessingError::CrsMismatch {
                left: input.crs.authid(),
                right: join.crs.authid(),
            });
        }
        if neighbours < 1 {
            return Err(ProcessingError::InvalidParameter {
                name: "NEIGHBORS".to_string(),
                reason: format!("must be at least 1, got {}", neighbours),
            });
        }
        if let Some(max) = max_distance.filter(|d| !(*d >= 0.0)) {
            return Err(ProcessingError::InvalidParameter {
                name: "MAX_DISTANCE".to_string(),
                reason: format!("must not be negative, got {}", max),
            });
        }
        // More neighbours than join features can never be filled.
        let k = usize::try_from(neighbours)
            .unwrap_or(usize::MAX)
            .min(join.feature_count().max(1));

        let joined_fields: Vec<&Field> = match &copy_fields {
            Some(names) if !names.is_empty() => names
                .iter()
                .map(|name| {
                    join.field(name).ok_or_else(|| ProcessingError::InvalidParameter {
                        name: "FIELDS_TO_COPY".to_string(),
                        reason: format!("field {} not found in {}", name, join.name),
                    })
                })
                .collect::<Result<_, _>>()?,
            _ => join.fields().iter().collect(),
        };

        let mut fields = input.fields().to_vec();
        let mut joined_names = Vec::with_capacity(joined_fields.len());
        for field in &joined_fields {
            let name = unique_name(&fields, &format!("{}{}", prefix, field.name));
            joined_names.push(name.clone());
            fields.push(Field::new(name, field.field_type));
        }
        let extra: Vec<(String, FieldType)> = vec![
            ("n".to_string(), FieldType::Integer),
            ("distance".to_string(), FieldType::Real),
            ("feature_x".to_string(), FieldType::Real),
            ("feature_y".to_string(), FieldType::Real),
            ("nearest_x".to_string(), FieldType::Real),
            ("nearest_y".to_string(), FieldType::Real),
        ];
        let extra_names: Vec<String> = extra
            .into_iter()
            .map(|(name, field_type)| {
                let name = unique_name(&fields, &name);
                fields.push(Field::new(name.clone(), field_type));
                name
            })
            .collect();

        let owned_index;
        let index = match join.spatial_index() {
            Some(index) => index,
            None => {
                owned_index = SpatialIndex::build(join.features());
                &owned_index
            }
        };

        let total = input.feature_count();
        let mut features = Vec::new();
        let mut joined_count = 0usize;
        let mut unjoinable_count = 0usize;

        for (done, feature) in input.features().iter().enumerate() {
            feedback.set_progress_of(done, total);
            let found = match &feature.geometry {
                Some(geometry) => nearest_features(geometry, join.features(), index, k, max_distance),
                None => Vec::new(),
            };

            if found.is_empty() {
                unjoinable_count += 1;
                if !discard_nonmatching {
                    let mut attributes = feature.attributes.clone();
                    for name in joined_names.iter().chain(&extra_names) {
                        attributes.insert(name.clone(), Value::Null);
                    }
                    features.push(Feature::new(features.len() as u64 + 1, feature.geometry.clone(), attributes));
                }
                continue;
            }

            joined_count += 1;
            for (rank, neighbour) in found.iter().enumerate() {
                let matched = &join.features()[neighbour.position];
                let mut attributes: Attributes = feature.attributes.clone();
                for (field, name) in joined_fields.iter().zip(&joined_names) {
                    attributes.insert(name.clone(), matched.attribute(&field.name).clone());
                }
                let values = [
                    json!(rank + 1),
                    json!(neighbour.distance),
                    json!(neighbour.from.x()),
                    json!(neighbour.from.y()),
                    json!(neighbour.to.x()),
                    json!(neighbour.to.y()),
                ];
                for (name, value) in extra_names.iter().zip(values) {
                    attributes.insert(name.clone(), value);
                }
                features.push(Feature::new(features.len() as u64 + 1, feature.geometry.clone(), attributes));
            }
        }

        info!(
            "Joined {} of {} features, {} could not be joined",
            joined_count, total, unjoinable_count
        );

        let layer = VectorLayer::new(input.name.clone(), input.crs.clone(), fields, features);
        let mut outputs = Outputs::new();
        outputs.emit_layer("OUTPUT", layer, sink)?;
        outputs.insert_count("JOINED_COUNT", joined_count);
        outputs.insert_count("UNJOINABLE_COUNT", unjoinable_count);
        Ok(outputs)
    }
}

/// `name`, or `name_2`, `name_3`, ... when already taken.
fn unique_name(fields: &[Field], name: &str) -> String {
    if !fields.iter().any(|f| f.name == name) {
        return name.to_string();
    }
    (2..)
        .map(|n| format!("{}_{}", name, n))
        .find(|candidate| !fields.iter().any(|f| &f.name == candidate))
        .unwrap_or_else(|| name.to_string())
}

/// Up to `k` nearest join features, closest first.
///
/// Envelopes come out of the index by distance from the centre of the
/// geometry's own envelope. Shrinking that by the envelope's half diagonal
/// gives a lower bound on the true distance, so the scan stops once the
/// bound passes the current k-th best.
fn nearest_features(
    geometry: &Geometry<f64>,
    candidates: &[Feature],
    index: &SpatialIndex,
    k: usize,
    max_distance: Option<f64>,
) -> Vec<Neighbour> {
    let rect = match geometry.bounding_rect() {
        Some(rect) => rect,
        None => return Vec::new(),
    };
    let centre = rect.center();
    let radius = (rect.width().hypot(rect.height())) / 2.0;

    let mut best: Vec<Neighbour> = Vec::with_capacity(k.min(candidates.len()) + 1);
    for (position, envelope_distance) in index.nearest([centre.x, centre.y]) {
        let bound = envelope_distance - radius;
        if best.len() == k && bound > best[k - 1].distance {
            break;
        }
        if max_distance.is_some_and(|max| bound > max) {
            break;
        }

        let other = match &candidates[position].geometry {
            Some(other) => other,
            None => continue,
        };
        let Some((distance, from, to)) = geometry_distance(geometry, other) else {
            continue;
        };
        if max_distance.is_some_and(|max| distance > max) {
            continue;
        }

        let slot = best.partition_point(|n| n.distance <= distance);
        if slot < k {
            best.insert(slot, Neighbour { position, distance, from, to });
            best.truncate(k);
        }
    }
    best
}

/// Euclidean distance between two geometries with the closest pair of
/// points, `(distance, point on a, point on b)`.
///
/// Two disjoint geometries are closest at a vertex of one of them, so the
/// scan projects every vertex of each geometry onto the other.
pub fn geometry_distance(a: &Geometry<f64>, b: &Geometry<f64>) -> Option<(f64, Point<f64>, Point<f64>)> {
    let mut best: Option<(f64, Point<f64>, Point<f64>)> = None;

    let mut consider = |distance: f64, from: Point<f64>, to: Point<f64>| {
        if best.map_or(true, |(d, _, _)| distance < d) {
            best = Some((distance, from, to));
        }
    };

    for coord in a.coords_iter() {
        let from = Point::from(coord);
        if let Some(to) = closest_on(b, &from) {
            consider(from.euclidean_distance(&to), from, to);
        }
    }
    for coord in b.coords_iter() {
        let to = Point::from(coord);
        if let Some(from) = closest_on(a, &to) {
            consider(to.euclidean_distance(&from), from, to);
        }
    }

    best.map(|(distance, from, to)| {
        if distance > 0.0 && a.intersects(b) {
            (0.0, from, to)
        } else {
            (distance, from, to)
        }
    })
}

fn closest_on(geometry: &Geometry<f64>, point: &Point<f64>) -> Option<Point<f64>> {
    match geometry.closest_point(point) {
        Closest::Intersection(p) | Closest::SinglePoint(p) => Some(p),
        Closest::Indeterminate => None,
    }
}

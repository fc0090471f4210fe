use geo::orient::Direction;
use geo::{
    Area, Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint,
    MultiPolygon, Orient, Point, Polygon,
};
use tracing::warn;

use super::{Algorithm, Feedback, Outputs, Parameters};
use crate::error::ProcessingError;
use crate::layer::VectorLayer;

/// `native:fixgeometries`: INPUT, OUTPUT -> OUTPUT.
pub struct FixGeometries;

impl Algorithm for FixGeometries {
    fn id(&self) -> &'static str {
        "native:fixgeometries"
    }

    fn display_name(&self) -> &'static str {
        "Fix geometries"
    }

    fn run(&self, params: &Parameters, feedback: &mut Feedback) -> Result<Outputs, ProcessingError> {
        let input = params.layer("INPUT")?;
        let sink = params.sink("OUTPUT")?;

        let total = input.feature_count();
        let mut features = Vec::with_capacity(total);
        let mut dropped = 0usize;

        for (done, feature) in input.features().iter().enumerate() {
            feedback.set_progress_of(done, total);
            let mut fixed = feature.clone();
            if let Some(geometry) = &feature.geometry {
                match repair_geometry(geometry) {
                    Some(repaired) => fixed.geometry = Some(repaired),
                    None => {
                        warn!("Feature {} has no valid geometry left, dropping it", feature.id);
                        dropped += 1;
                        continue;
                    }
                }
            }
            features.push(fixed);
        }

        if dropped > 0 {
            feedback.push_info(format!("Dropped {} features with unrepairable geometry", dropped));
        }

        let layer = VectorLayer::new(
            input.name.clone(),
            input.crs.clone(),
            input.fields().to_vec(),
            features,
        );
        let mut outputs = Outputs::new();
        outputs.emit_layer("OUTPUT", layer, sink)?;
        Ok(outputs)
    }
}

/// Repairs one geometry, `None` when nothing valid is left.
///
/// Drops non-finite coordinates and repeated consecutive vertices, closes
/// rings, removes rings without area and degenerate lines, orients shells
/// counter-clockwise and holes clockwise.
pub fn repair_geometry(geometry: &Geometry<f64>) -> Option<Geometry<f64>> {
    match geometry {
        Geometry::Point(point) => finite(point.0).then_some(Geometry::Point(*point)),
        Geometry::MultiPoint(points) => {
            let points: Vec<Point<f64>> = points.iter().copied().filter(|p| finite(p.0)).collect();
            (!points.is_empty()).then(|| Geometry::MultiPoint(MultiPoint::new(points)))
        }
        Geometry::Line(line) => {
            repair_line(&LineString::new(vec![line.start, line.end])).map(Geometry::LineString)
        }
        Geometry::LineString(line) => repair_line(line).map(Geometry::LineString),
        Geometry::MultiLineString(lines) => {
            let lines: Vec<LineString<f64>> = lines.iter().filter_map(repair_line).collect();
            (!lines.is_empty()).then(|| Geometry::MultiLineString(MultiLineString::new(lines)))
        }
        Geometry::Polygon(polygon) => repair_polygon(polygon).map(Geometry::Polygon),
        Geometry::MultiPolygon(polygons) => {
            let polygons: Vec<Polygon<f64>> = polygons.iter().filter_map(repair_polygon).collect();
            (!polygons.is_empty()).then(|| Geometry::MultiPolygon(MultiPolygon::new(polygons)))
        }
        Geometry::Rect(rect) => repair_polygon(&rect.to_polygon()).map(Geometry::Polygon),
        Geometry::Triangle(triangle) => {
            repair_polygon(&triangle.to_polygon()).map(Geometry::Polygon)
        }
        Geometry::GeometryCollection(collection) => {
            let members: Vec<Geometry<f64>> =
                collection.iter().filter_map(repair_geometry).collect();
            (!members.is_empty())
                .then(|| Geometry::GeometryCollection(GeometryCollection(members)))
        }
    }
}

fn finite(coord: Coord<f64>) -> bool {
    coord.x.is_finite() && coord.y.is_finite()
}

fn clean_coords(line: &LineString<f64>) -> Vec<Coord<f64>> {
    let mut coords: Vec<Coord<f64>> = line.coords().copied().filter(|c| finite(*c)).collect();
    coords.dedup();
    coords
}

fn repair_line(line: &LineString<f64>) -> Option<LineString<f64>> {
    let coords = clean_coords(line);
    (coords.len() >= 2).then(|| LineString::new(coords))
}

fn repair_ring(ring: &LineString<f64>) -> Option<LineString<f64>> {
    let mut coords = clean_coords(ring);
    if let (Some(first), Some(last)) = (coords.first().copied(), coords.last().copied()) {
        if first != last {
            coords.push(first);
        }
    }
    if coords.len() < 4 {
        return None;
    }
    let ring = LineString::new(coords);
    let area = Polygon::new(ring.clone(), vec![]).unsigned_area();
    (area > 0.0).then_some(ring)
}

fn repair_polygon(polygon: &Polygon<f64>) -> Option<Polygon<f64>> {
    let exterior = repair_ring(polygon.exterior())?;
    let interiors: Vec<LineString<f64>> = polygon.interiors().iter().filter_map(repair_ring).collect();
    Some(Polygon::new(exterior, interiors).orient(Direction::Default))
}

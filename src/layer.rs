//! Vector layers backed by GeoJSON feature collections.
//!
//! A [`VectorLayer`] is the handle every processing algorithm consumes and
//! produces: features with optional geometry, an attribute schema inferred
//! from their properties, the layer's CRS and an optional spatial index.

use std::collections::HashSet;
use std::fmt;
use std::fs::{create_dir_all, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use geo::{BoundingRect, Geometry, Rect};
use geojson::{feature::Id, Feature as GeoJsonFeature, FeatureCollection, GeoJson};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::crs::Crs;
use crate::error::LayerError;
use crate::index::SpatialIndex;

pub type Attributes = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Real,
    Boolean,
    Json,
}

impl FieldType {
    fn of(value: &Value) -> Option<FieldType> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(FieldType::Boolean),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(FieldType::Integer),
            Value::Number(_) => Some(FieldType::Real),
            Value::String(_) => Some(FieldType::String),
            Value::Array(_) | Value::Object(_) => Some(FieldType::Json),
        }
    }

    fn widen(self, other: FieldType) -> FieldType {
        match (self, other) {
            (a, b) if a == b => a,
            (FieldType::Integer, FieldType::Real) | (FieldType::Real, FieldType::Integer) => {
                FieldType::Real
            }
            _ => FieldType::String,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            FieldType::String => "String",
            FieldType::Integer => "Integer",
            FieldType::Real => "Real",
            FieldType::Boolean => "Boolean",
            FieldType::Json => "JSON",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// A feature of a layer. `id` is unique within the layer; `source_id` is the
/// identifier the feature was read with, written back unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: u64,
    pub source_id: Option<Id>,
    pub geometry: Option<Geometry<f64>>,
    pub attributes: Attributes,
}

impl Feature {
    pub fn new(id: u64, geometry: Option<Geometry<f64>>, attributes: Attributes) -> Self {
        Self {
            id,
            source_id: None,
            geometry,
            attributes,
        }
    }

    /// Attribute value, treating a missing key as null.
    pub fn attribute(&self, name: &str) -> &Value {
        self.attributes.get(name).unwrap_or(&Value::Null)
    }
}

#[derive(Clone)]
pub struct VectorLayer {
    pub name: String,
    pub crs: Crs,
    fields: Vec<Field>,
    features: Vec<Feature>,
    spatial_index: Option<SpatialIndex>,
}

impl fmt::Debug for VectorLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorLayer")
            .field("name", &self.name)
            .field("crs", &self.crs.authid())
            .field("fields", &self.fields)
            .field("features", &self.features.len())
            .field("spatial_index", &self.spatial_index.is_some())
            .finish()
    }
}

impl VectorLayer {
    pub fn new(name: impl Into<String>, crs: Crs, fields: Vec<Field>, features: Vec<Feature>) -> Self {
        Self {
            name: name.into(),
            crs,
            fields,
            features,
            spatial_index: None,
        }
    }

    /// Builds a layer whose schema is inferred from the features' attributes.
    pub fn from_features(name: impl Into<String>, crs: Crs, features: Vec<Feature>) -> Self {
        let fields = infer_fields(&features);
        Self::new(name, crs, fields, features)
    }

    /// Opens a GeoJSON feature collection.
    ///
    /// Anything that cannot be read as a feature collection yields
    /// [`LayerError::Invalid`].
    pub fn open(path: &Path) -> Result<Self, LayerError> {
        info!("Loading file: {}", path.display());
        let invalid = |reason: String| LayerError::Invalid {
            path: path.to_path_buf(),
            reason,
        };

        let file = File::open(path).map_err(|e| invalid(e.to_string()))?;
        let geojson =
            GeoJson::from_reader(BufReader::new(file)).map_err(|e| invalid(e.to_string()))?;
        let collection = match geojson {
            GeoJson::FeatureCollection(fc) => fc,
            _ => return Err(invalid("not a FeatureCollection".to_string())),
        };

        let crs = match collection
            .foreign_members
            .as_ref()
            .and_then(|members| members.get("crs"))
        {
            Some(member) => Crs::from_geojson_member(member).map_err(|e| invalid(e.to_string()))?,
            None => Crs::wgs84(),
        };

        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("geodata")
            .to_string();

        let total_features = collection.features.len();
        debug!("Found {} features in file", total_features);

        // Features without a usable numeric id are numbered after the largest
        // explicit one.
        let mut next_id = collection
            .features
            .iter()
            .filter_map(numeric_id)
            .max()
            .map_or(1, |max| max.saturating_add(1));
        let mut seen = HashSet::with_capacity(total_features);

        let mut features = Vec::with_capacity(total_features);
        for (index, feature) in collection.features.into_iter().enumerate() {
            if (index + 1) % 1000 == 0 {
                debug!("Processing feature {}/{}", index + 1, total_features);
            }
            let explicit = numeric_id(&feature);
            let id = match explicit {
                Some(id) if seen.insert(id) => id,
                _ => {
                    while !seen.insert(next_id) {
                        next_id += 1;
                    }
                    next_id
                }
            };
            let mut feature = feature_from_geojson(id, feature).map_err(|e| invalid(e.to_string()))?;
            // A repeated numeric id is replaced so written ids stay unique.
            if explicit.is_some_and(|explicit| explicit != id) {
                feature.source_id = None;
            }
            features.push(feature);
        }

        Ok(Self::from_features(name, crs, features))
    }

    /// Writes the layer as a pretty-printed GeoJSON feature collection.
    pub fn write(&self, path: &Path) -> Result<(), LayerError> {
        let io_error = |source| LayerError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_dir_all(parent).map_err(io_error)?;
        }

        let features = self
            .features
            .iter()
            .map(|feature| self.feature_to_geojson(feature))
            .collect();

        let mut foreign_members = Map::new();
        foreign_members.insert("name".to_string(), Value::String(self.name.clone()));
        foreign_members.insert("crs".to_string(), self.crs.to_geojson_member());

        let feature_collection = FeatureCollection {
            bbox: None,
            features,
            foreign_members: Some(foreign_members),
        };

        let file = File::create(path).map_err(io_error)?;
        serde_json::to_writer_pretty(BufWriter::new(file), &feature_collection)
            .map_err(|e| LayerError::Encode(self.name.clone(), e))?;
        info!(
            "Written {} features of layer {} to {}",
            self.features.len(),
            self.name,
            path.display()
        );
        Ok(())
    }

    fn feature_to_geojson(&self, feature: &Feature) -> GeoJsonFeature {
        let mut properties = Map::new();
        for field in &self.fields {
            properties.insert(field.name.clone(), feature.attribute(&field.name).clone());
        }
        GeoJsonFeature {
            bbox: None,
            geometry: feature
                .geometry
                .as_ref()
                .map(|g| geojson::Geometry::new(geojson::Value::from(g))),
            id: Some(
                feature
                    .source_id
                    .clone()
                    .unwrap_or_else(|| Id::Number(feature.id.into())),
            ),
            properties: Some(properties),
            foreign_members: None,
        }
    }

    /// Logs the layer's CRS, size and attribute schema.
    pub fn describe(&self) {
        info!("Current CRS: {}", self.crs.authid());
        info!("Features: {}", self.features.len());
        if let Some(extent) = self.extent() {
            info!(
                "Extent: ({:.2}, {:.2}) to ({:.2}, {:.2})",
                extent.min().x,
                extent.min().y,
                extent.max().x,
                extent.max().y
            );
        }
        info!("Attributes in layer {}:", self.name);
        for field in &self.fields {
            info!("  {} {}", field.name, field.field_type.type_name());
        }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// Mutable access to the features. Drops any spatial index, which would
    /// otherwise go stale.
    pub fn features_mut(&mut self) -> &mut Vec<Feature> {
        self.spatial_index = None;
        &mut self.features
    }

    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    pub fn has_spatial_index(&self) -> bool {
        self.spatial_index.is_some()
    }

    pub fn spatial_index(&self) -> Option<&SpatialIndex> {
        self.spatial_index.as_ref()
    }

    /// Builds the spatial index if the layer does not have one yet.
    pub fn ensure_spatial_index(&mut self) -> &SpatialIndex {
        let features = &self.features;
        self.spatial_index
            .get_or_insert_with(|| SpatialIndex::build(features))
    }

    /// Bounding rectangle over every feature geometry.
    pub fn extent(&self) -> Option<Rect<f64>> {
        self.features
            .iter()
            .filter_map(|f| f.geometry.as_ref().and_then(|g| g.bounding_rect()))
            .reduce(|acc, rect| {
                Rect::new(
                    (acc.min().x.min(rect.min().x), acc.min().y.min(rect.min().y)),
                    (acc.max().x.max(rect.max().x), acc.max().y.max(rect.max().y)),
                )
            })
    }
}

fn numeric_id(feature: &GeoJsonFeature) -> Option<u64> {
    match &feature.id {
        Some(Id::Number(n)) => n.as_u64(),
        _ => None,
    }
}

fn feature_from_geojson(id: u64, feature: GeoJsonFeature) -> Result<Feature, geojson::Error> {
    let geometry = feature
        .geometry
        .map(|g| Geometry::<f64>::try_from(g.value))
        .transpose()?;
    let attributes = feature.properties.unwrap_or_default();
    Ok(Feature {
        id,
        source_id: feature.id,
        geometry,
        attributes,
    })
}

/// Union of attribute keys in first-seen order. The first non-null value
/// decides a field's type; integers widen to reals.
pub fn infer_fields(features: &[Feature]) -> Vec<Field> {
    let mut names: Vec<String> = Vec::new();
    let mut types: Vec<Option<FieldType>> = Vec::new();

    for feature in features {
        for (name, value) in &feature.attributes {
            let position = match names.iter().position(|n| n == name) {
                Some(position) => position,
                None => {
                    names.push(name.clone());
                    types.push(None);
                    names.len() - 1
                }
            };
            if let Some(value_type) = FieldType::of(value) {
                types[position] = Some(match types[position] {
                    Some(current) => current.widen(value_type),
                    None => value_type,
                });
            }
        }
    }

    names
        .into_iter()
        .zip(types)
        .map(|(name, field_type)| Field::new(name, field_type.unwrap_or(FieldType::String)))
        .collect()
}

/// `<dir>/<stem>(<date>).geojson`, the naming used for every report written by the pipeline.
pub fn dated_output_path(dir: &Path, stem: &str, date: &str) -> PathBuf {
    dir.join(format!("{}({}).geojson", stem, date))
}

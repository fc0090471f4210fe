//! R-tree over feature envelopes.

use std::fmt;

use geo::{BoundingRect, Rect};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};

use crate::layer::Feature;

/// Envelope of one feature, tagged with the feature's position in its layer.
pub type IndexedEnvelope = GeomWithData<Rectangle<[f64; 2]>, usize>;

#[derive(Clone)]
pub struct SpatialIndex {
    tree: RTree<IndexedEnvelope>,
}

impl fmt::Debug for SpatialIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpatialIndex")
            .field("size", &self.tree.size())
            .finish()
    }
}

impl SpatialIndex {
    /// Bulk loads the envelopes of every feature that has a non-empty geometry.
    pub fn build(features: &[Feature]) -> Self {
        let envelopes: Vec<IndexedEnvelope> = features
            .iter()
            .enumerate()
            .filter_map(|(position, feature)| {
                let rect = feature.geometry.as_ref()?.bounding_rect()?;
                Some(GeomWithData::new(
                    Rectangle::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
                    position,
                ))
            })
            .collect();
        Self {
            tree: RTree::bulk_load(envelopes),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Positions of features whose envelope intersects `rect`.
    pub fn intersecting(&self, rect: &Rect<f64>) -> impl Iterator<Item = usize> + '_ {
        let envelope = AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);
        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|entry| entry.data)
    }

    /// Feature positions ordered by envelope distance from `point`.
    ///
    /// The envelope distance is a lower bound of the distance to the
    /// feature's geometry.
    pub fn nearest(&self, point: [f64; 2]) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.tree
            .nearest_neighbor_iter_with_distance_2(&point)
            .map(|(entry, distance_2)| (entry.data, distance_2.sqrt()))
    }
}

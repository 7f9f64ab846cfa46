//! Proximity-graph index: object space, adjacency, search and the three
//! construction passes (ANNG build, RNNG refinement, ONNG optimization).

pub mod distance;
pub mod index;
pub mod insert;
pub mod optimize;
pub mod property;
pub mod refine;
pub mod repository;
pub mod search;
pub mod space;
pub mod visited;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub use distance::DistanceKind;
pub use index::Index;
pub use optimize::{GraphOptimizer, OptimizationReport, OptimizerOptions};
pub use property::{AccuracyEntry, GraphKind, Property};
pub use refine::{RefineOptions, RefineReport};
pub use repository::{GraphRepository, Node};
pub use search::{SearchQuery, SearchResult};
pub use space::{ObjectSpace, ObjectType};

/// Identifier of a stored object. Dense, starting at 1; 0 is never assigned.
pub type ObjectId = u32;

/// An object paired with its distance to some reference point.
///
/// Doubles as the adjacency edge type: in a node's edge list, `distance` is
/// the distance from the node to `id`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObjectDistance {
    pub id: ObjectId,
    pub distance: f32,
}

impl ObjectDistance {
    pub fn new(id: ObjectId, distance: f32) -> Self {
        Self { id, distance }
    }

    /// Total order by distance, then id. Used wherever ties must break the
    /// same way on every run.
    #[inline]
    pub fn ordering(&self, other: &Self) -> Ordering {
        OrderedFloat(self.distance)
            .cmp(&OrderedFloat(other.distance))
            .then(self.id.cmp(&other.id))
    }
}

//! Per-index configuration, persisted alongside the graph.

use crate::config;
use crate::error::{IndexError, Result};
use crate::graph::distance::DistanceKind;
use crate::graph::space::ObjectType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which pass last shaped the adjacency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GraphKind {
    /// Incrementally built approximate k-NN graph.
    #[default]
    Anng,
    /// Refined with relative-neighborhood pruning.
    Rnng,
    /// Degree-adjusted and shortcut-reduced.
    Onng,
}

impl fmt::Display for GraphKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphKind::Anng => f.write_str("ANNG"),
            GraphKind::Rnng => f.write_str("RNNG"),
            GraphKind::Onng => f.write_str("ONNG"),
        }
    }
}

/// Measured quality of the index at one search epsilon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccuracyEntry {
    pub epsilon: f32,
    /// Mean recall over the sampled queries, in `[0, 1]`.
    pub recall: f32,
    pub average_latency_us: f64,
    pub average_visited: f64,
}

/// Index configuration.
///
/// # Example
///
/// ```
/// use onng_core::graph::{DistanceKind, Property};
///
/// let property = Property::new(128)
///     .with_distance(DistanceKind::L2)
///     .with_edge_size_for_creation(20)
///     .with_thread_pool_size(4);
/// assert!(property.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub dimension: usize,
    pub distance: DistanceKind,
    pub object_type: ObjectType,
    /// Out-degree bound and neighbor count during ANNG construction.
    pub edge_size_for_creation: usize,
    /// Edges explored per node while searching. 0 = all.
    pub edge_size_for_search: usize,
    /// Exploration factor used when searching for insertion neighbors.
    pub insertion_radius_coefficient: f32,
    pub batch_size_for_creation: usize,
    pub thread_pool_size: usize,
    pub seed_size: usize,
    pub graph_kind: GraphKind,
    /// Epsilon chosen by search-parameter optimization.
    pub default_epsilon: Option<f32>,
    /// Ascending by epsilon. Empty unless the optimizer generated it.
    pub accuracy_table: Vec<AccuracyEntry>,
}

impl Default for Property {
    fn default() -> Self {
        Self {
            dimension: 0,
            distance: DistanceKind::default(),
            object_type: ObjectType::default(),
            edge_size_for_creation: config::DEFAULT_EDGE_SIZE_FOR_CREATION,
            edge_size_for_search: config::DEFAULT_EDGE_SIZE_FOR_SEARCH,
            insertion_radius_coefficient: config::DEFAULT_INSERTION_RADIUS_COEFFICIENT,
            batch_size_for_creation: config::DEFAULT_BATCH_SIZE_FOR_CREATION,
            thread_pool_size: config::DEFAULT_THREAD_POOL_SIZE,
            seed_size: config::DEFAULT_SEED_SIZE,
            graph_kind: GraphKind::default(),
            default_epsilon: None,
            accuracy_table: Vec::new(),
        }
    }
}

impl Property {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ..Self::default()
        }
    }

    pub fn with_distance(mut self, distance: DistanceKind) -> Self {
        self.distance = distance;
        self
    }

    pub fn with_object_type(mut self, object_type: ObjectType) -> Self {
        self.object_type = object_type;
        self
    }

    pub fn with_edge_size_for_creation(mut self, edges: usize) -> Self {
        self.edge_size_for_creation = edges;
        self
    }

    pub fn with_edge_size_for_search(mut self, edges: usize) -> Self {
        self.edge_size_for_search = edges;
        self
    }

    pub fn with_insertion_radius_coefficient(mut self, coefficient: f32) -> Self {
        self.insertion_radius_coefficient = coefficient;
        self
    }

    pub fn with_batch_size_for_creation(mut self, batch: usize) -> Self {
        self.batch_size_for_creation = batch;
        self
    }

    pub fn with_thread_pool_size(mut self, threads: usize) -> Self {
        self.thread_pool_size = threads;
        self
    }

    pub fn with_seed_size(mut self, seeds: usize) -> Self {
        self.seed_size = seeds;
        self
    }

    /// Reject out-of-range values with a message naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(IndexError::invalid("dimension", "must be at least 1"));
        }
        if self.dimension > config::MAX_DIMENSION {
            return Err(IndexError::invalid(
                "dimension",
                format!("{} exceeds the maximum of {}", self.dimension, config::MAX_DIMENSION),
            ));
        }
        if self.edge_size_for_creation == 0 {
            return Err(IndexError::invalid("edge_size_for_creation", "must be at least 1"));
        }
        if !self.insertion_radius_coefficient.is_finite() || self.insertion_radius_coefficient <= 0.0 {
            return Err(IndexError::invalid(
                "insertion_radius_coefficient",
                format!("{} is not a positive finite number", self.insertion_radius_coefficient),
            ));
        }
        if self.batch_size_for_creation == 0 {
            return Err(IndexError::invalid("batch_size_for_creation", "must be at least 1"));
        }
        if self.thread_pool_size == 0 {
            return Err(IndexError::invalid("thread_pool_size", "must be at least 1"));
        }
        if self.seed_size == 0 {
            return Err(IndexError::invalid("seed_size", "must be at least 1"));
        }
        if let Some(epsilon) = self.default_epsilon {
            check_epsilon(epsilon)?;
        }
        Ok(())
    }

    /// Smallest tabulated epsilon whose recall reaches `expected`, or the
    /// largest tabulated epsilon when none does. `None` without a table.
    pub fn epsilon_for_accuracy(&self, expected: f32) -> Option<f32> {
        self.accuracy_table
            .iter()
            .find(|entry| entry.recall >= expected)
            .or_else(|| self.accuracy_table.last())
            .map(|entry| entry.epsilon)
    }

    /// Epsilon used by searches that do not specify one.
    pub fn search_epsilon(&self) -> f32 {
        self.default_epsilon.unwrap_or(config::DEFAULT_EPSILON)
    }
}

pub(crate) fn check_epsilon(epsilon: f32) -> Result<()> {
    if !epsilon.is_finite() || epsilon <= -1.0 {
        return Err(IndexError::invalid(
            "epsilon",
            format!("{epsilon} must be finite and greater than -1"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let property = Property::new(16);
        assert!(property.validate().is_ok());
        assert_eq!(property.graph_kind, GraphKind::Anng);
        assert_eq!(property.search_epsilon(), config::DEFAULT_EPSILON);
    }

    #[test]
    fn test_validate_names_the_field() {
        let cases = [
            (Property::new(0), "dimension"),
            (Property::new(config::MAX_DIMENSION + 1), "dimension"),
            (Property::new(4).with_edge_size_for_creation(0), "edge_size_for_creation"),
            (Property::new(4).with_insertion_radius_coefficient(0.0), "insertion_radius_coefficient"),
            (Property::new(4).with_insertion_radius_coefficient(f32::NAN), "insertion_radius_coefficient"),
            (Property::new(4).with_batch_size_for_creation(0), "batch_size_for_creation"),
            (Property::new(4).with_thread_pool_size(0), "thread_pool_size"),
            (Property::new(4).with_seed_size(0), "seed_size"),
        ];
        for (property, expected) in cases {
            match property.validate() {
                Err(IndexError::InvalidConfiguration { field, .. }) => assert_eq!(field, expected),
                other => panic!("expected {expected} rejection, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_epsilon_for_accuracy() {
        let entry = |epsilon, recall| AccuracyEntry {
            epsilon,
            recall,
            average_latency_us: 1.0,
            average_visited: 10.0,
        };
        let mut property = Property::new(4);
        assert_eq!(property.epsilon_for_accuracy(0.9), None);

        property.accuracy_table = vec![entry(0.0, 0.7), entry(0.1, 0.92), entry(0.2, 0.99)];
        assert_eq!(property.epsilon_for_accuracy(0.9), Some(0.1));
        assert_eq!(property.epsilon_for_accuracy(0.5), Some(0.0));
        assert_eq!(property.epsilon_for_accuracy(1.0), Some(0.2));
    }

    #[test]
    fn test_check_epsilon() {
        assert!(check_epsilon(-0.5).is_ok());
        assert!(check_epsilon(-1.0).is_err());
        assert!(check_epsilon(f32::INFINITY).is_err());
    }
}

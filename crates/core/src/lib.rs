//! # onng-core
//!
//! Graph-based approximate nearest neighbor search. Vectors are linked into an
//! approximate k-NN graph (ANNG) as they are indexed, which can then be
//! refined into a bidirectional relative-neighborhood graph (RNNG) and
//! optimized into a degree-balanced, shortcut-reduced graph (ONNG).
//!
//! ```
//! use onng_core::graph::{GraphOptimizer, Index, OptimizerOptions, Property, RefineOptions};
//!
//! let index = Index::new(Property::new(2).with_edge_size_for_creation(4)).unwrap();
//! for i in 0..64 {
//!     index.append(&[(i % 8) as f32, (i / 8) as f32]).unwrap();
//! }
//! index.create_index(2).unwrap();
//! index.refine(&RefineOptions::with_edge_size(4)).unwrap();
//!
//! let options = OptimizerOptions::default().with_edges(4, 8).with_sampling(16, 4);
//! GraphOptimizer::new(options).unwrap().optimize(&index).unwrap();
//!
//! let hits = index.search(&[3.0, 3.0], 1, 0.2).unwrap();
//! assert_eq!(hits[0].distance, 0.0);
//! ```

/// Compile-time defaults and limits.
pub mod config;
/// `IndexError` and the crate `Result` alias.
pub mod error;
/// Object space, adjacency, search and the construction passes.
pub mod graph;
/// Degree statistics, graph quality and recall evaluation.
pub mod stats;
/// Snapshots and dataset readers.
pub mod storage;
/// Worker threads, the recursive monitor and the worker pool.
pub mod thread;

pub use error::{IndexError, Result};
pub use graph::{Index, ObjectDistance, ObjectId};

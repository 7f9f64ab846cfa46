//! Global configuration constants for onng.
//!
//! Defaults for index properties, refinement and optimization options, and the
//! validation limits applied to them. Per-index values live in
//! [`Property`](crate::graph::Property); these constants only seed its `Default`.

/// Default number of edges created per node during ANNG construction.
///
/// Also the out-degree bound of the ANNG. Typical range: 10–300.
pub const DEFAULT_EDGE_SIZE_FOR_CREATION: usize = 10;

/// Default number of edges explored per node during search. 0 = all edges.
pub const DEFAULT_EDGE_SIZE_FOR_SEARCH: usize = 0;

/// Default exploration factor used while searching for insertion neighbors.
///
/// Equivalent to a search epsilon of `coefficient - 1`.
pub const DEFAULT_INSERTION_RADIUS_COEFFICIENT: f32 = 1.1;

/// Number of pending objects whose neighbors are searched against the same
/// graph state during construction.
///
/// The final graph depends on this value but not on the thread count.
pub const DEFAULT_BATCH_SIZE_FOR_CREATION: usize = 200;

/// Default number of worker threads.
pub const DEFAULT_THREAD_POOL_SIZE: usize = 1;

/// Number of evenly spaced seed nodes a search starts from.
pub const DEFAULT_SEED_SIZE: usize = 10;

/// Search epsilon used when neither the caller nor the optimizer chose one.
pub const DEFAULT_EPSILON: f32 = 0.1;

/// Largest accepted vector dimension.
pub const MAX_DIMENSION: usize = 65_536;

/// Total out-degree allowed once reverse edges are added during refinement,
/// as a multiple of the selection degree.
pub const REFINE_REVERSE_EDGE_FACTOR: usize = 2;

/// Upper bound on refinement rounds before giving up on a fixed point.
pub const REFINE_MAX_ITERATIONS: usize = 32;

/// Default ONNG outgoing edge count.
pub const DEFAULT_NUM_OF_OUTGOING_EDGES: usize = 10;

/// Default ONNG incoming edge count.
pub const DEFAULT_NUM_OF_INCOMING_EDGES: usize = 120;

/// Detour allowance for shortcut reduction: an edge is a shortcut when a
/// two-hop path costs at most `(1 + margin)` times the direct edge.
pub const DEFAULT_SHORTCUT_MARGIN: f32 = 0.2;

/// Recall tolerance accepted by search-parameter optimization.
pub const DEFAULT_GT_EPSILON: f32 = 0.1;

/// Recall the search-parameter optimization aims for.
pub const DEFAULT_TARGET_ACCURACY: f32 = 1.0;

/// Number of sampled objects used as queries by the optimizer.
pub const DEFAULT_NUM_OF_QUERIES: usize = 100;

/// Number of results per sampled query used by the optimizer.
pub const DEFAULT_NUM_OF_RESULTS: usize = 20;

/// Seed of the optimizer's query sampler.
pub const DEFAULT_SAMPLE_SEED: u64 = 161_803_398;

/// Exploration coefficients swept by the optimizer, ascending.
pub const DEFAULT_EPSILON_SWEEP: &[f32] = &[
    -0.05, -0.03, -0.02, -0.01, -0.005, 0.0, 0.005, 0.01, 0.02, 0.03, 0.05, 0.1, 0.2,
];

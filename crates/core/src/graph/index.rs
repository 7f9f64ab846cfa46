//! The index: object space, adjacency and configuration behind one handle.
//!
//! All passes take `&self`. Searches may run concurrently with appends and
//! with any pass; passes themselves are serialized.

use crate::error::{IndexError, Result};
use crate::graph::property::{check_epsilon, Property};
use crate::graph::repository::{validate_nodes, GraphRepository, Node};
use crate::graph::search::{linear_search, run_query, SearchParams, SearchQuery, SearchResult};
use crate::graph::space::ObjectSpace;
use crate::graph::{ObjectDistance, ObjectId};
use crate::storage::persistence;
use crate::thread::AbortHandle;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Graph-based nearest-neighbor index.
///
/// # Example
///
/// ```
/// use onng_core::graph::{Index, Property};
///
/// let index = Index::new(Property::new(2).with_edge_size_for_creation(2)).unwrap();
/// for point in [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [10.0, 10.0]] {
///     index.append(&point).unwrap();
/// }
/// index.create_index(1).unwrap();
///
/// let hits = index.search(&[0.0, 0.0], 1, 0.1).unwrap();
/// assert_eq!(hits[0].id, 1);
/// assert_eq!(hits[0].distance, 0.0);
/// ```
#[derive(Debug)]
pub struct Index {
    property: RwLock<Property>,
    pub(crate) space: Arc<ObjectSpace>,
    pub(crate) graph: Arc<GraphRepository>,
    /// Ids `1..=indexed` have been linked into the graph.
    indexed: AtomicU32,
    append_lock: Mutex<()>,
    pass_lock: Mutex<()>,
    abort: AbortHandle,
}

impl Index {
    pub fn new(property: Property) -> Result<Self> {
        property.validate()?;
        let space = ObjectSpace::new(property.dimension, property.distance, property.object_type);
        Ok(Self::assemble(property, space, GraphRepository::new(), 0))
    }

    /// Rebuild an index from persisted parts, checking every invariant.
    pub(crate) fn from_parts(
        property: Property,
        arena: Vec<f32>,
        nodes: Vec<Node>,
        indexed: ObjectId,
    ) -> Result<Self> {
        property.validate()?;
        let space = ObjectSpace::from_arena(
            property.dimension,
            property.distance,
            property.object_type,
            arena,
        )?;
        if indexed as usize > space.len() {
            return Err(IndexError::corrupt(
                indexed,
                format!("{indexed} objects marked indexed but only {} stored", space.len()),
            ));
        }
        validate_nodes(&nodes, space.len(), indexed as usize)?;
        Ok(Self::assemble(
            property,
            space,
            GraphRepository::from_nodes(nodes),
            indexed,
        ))
    }

    fn assemble(property: Property, space: ObjectSpace, graph: GraphRepository, indexed: ObjectId) -> Self {
        Self {
            property: RwLock::new(property),
            space: Arc::new(space),
            graph: Arc::new(graph),
            indexed: AtomicU32::new(indexed),
            append_lock: Mutex::new(()),
            pass_lock: Mutex::new(()),
            abort: AbortHandle::new(),
        }
    }

    /// Load an index written by [`Index::save`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        persistence::load_index(path.as_ref())
    }

    /// Write a checksummed snapshot. Waits for a running pass to finish and
    /// holds appends off while the configuration, objects and adjacency are
    /// read.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let _pass = self.pass_lock.lock();
        let _append = self.append_lock.lock();
        persistence::save_index(self, path.as_ref())
    }

    /// Copy of the current configuration.
    pub fn property(&self) -> Property {
        self.property.read().clone()
    }

    pub fn dimension(&self) -> usize {
        self.space.dimension()
    }

    /// Store a vector and give it an edgeless node. Not searchable until the
    /// next [`create_index`](Index::create_index).
    pub fn append(&self, vector: &[f32]) -> Result<ObjectId> {
        self.space.check_dimension(vector)?;
        let _append = self.append_lock.lock();
        let node = self.graph.push_empty();
        match self.space.append(vector) {
            Ok(id) if id == node => Ok(id),
            Ok(id) => Err(IndexError::corrupt(
                id,
                format!("object space and graph out of step (node {node})"),
            )),
            Err(e) => {
                self.graph.pop();
                Err(e)
            }
        }
    }

    /// Append every `dimension`-sized chunk of a flat array.
    pub fn append_all(&self, data: &[f32]) -> Result<Vec<ObjectId>> {
        let dimension = self.dimension();
        if data.len() % dimension != 0 {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                actual: data.len() % dimension,
            });
        }
        data.chunks_exact(dimension).map(|v| self.append(v)).collect()
    }

    /// Number of stored objects.
    pub fn object_count(&self) -> usize {
        self.space.len()
    }

    /// Number of nodes in the graph, linked or not.
    pub fn node_count(&self) -> usize {
        self.graph.len()
    }

    /// Number of objects linked into the graph.
    pub fn indexed_count(&self) -> usize {
        self.indexed.load(Ordering::Acquire) as usize
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Outgoing edges of `id`, closest first. `None` for unknown ids.
    pub fn neighbors(&self, id: ObjectId) -> Option<Vec<ObjectDistance>> {
        self.graph.neighbors(id)
    }

    pub fn object(&self, id: ObjectId) -> Option<Vec<f32>> {
        self.space.read().get(id).map(<[f32]>::to_vec)
    }

    /// Handle that cancels the running pass (and any later one, until reset).
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// `k` nearest indexed objects with an explicit epsilon.
    pub fn search(&self, query: &[f32], k: usize, epsilon: f32) -> Result<Vec<ObjectDistance>> {
        let query = SearchQuery::new(query, k).with_epsilon(epsilon);
        Ok(self.search_with(&query)?.results)
    }

    pub fn search_with(&self, query: &SearchQuery<'_>) -> Result<SearchResult> {
        self.space.check_vector(query.vector, "query")?;
        if query.radius.is_nan() || query.radius < 0.0 {
            return Err(IndexError::invalid(
                "radius",
                format!("{} is not a non-negative distance", query.radius),
            ));
        }
        let (epsilon, edge_limit, seed_size) = {
            let property = self.property.read();
            let epsilon = query
                .epsilon
                .or_else(|| {
                    query
                        .expected_accuracy
                        .and_then(|accuracy| property.epsilon_for_accuracy(accuracy))
                })
                .unwrap_or_else(|| property.search_epsilon());
            (epsilon, property.edge_size_for_search, property.seed_size)
        };
        check_epsilon(epsilon)?;
        let params = SearchParams {
            size: query.size,
            exploration: 1.0 + epsilon,
            radius: query.radius,
            edge_limit,
            visit_budget: query.visit_budget,
        };
        Ok(run_query(
            &self.space,
            &self.graph,
            self.indexed.load(Ordering::Acquire),
            seed_size,
            query.vector,
            &params,
        ))
    }

    /// Exact `k` nearest stored objects by exhaustive scan.
    pub fn linear_search(&self, query: &[f32], k: usize) -> Result<Vec<ObjectDistance>> {
        self.space.check_vector(query, "query")?;
        Ok(linear_search(&self.space.read(), query, k))
    }

    // ── Pass plumbing ──

    pub(crate) fn begin_pass(&self) -> MutexGuard<'_, ()> {
        self.pass_lock.lock()
    }

    pub(crate) fn abort_flag(&self) -> &AbortHandle {
        &self.abort
    }

    pub(crate) fn set_indexed(&self, indexed: ObjectId) {
        self.indexed.store(indexed, Ordering::Release);
    }

    /// Fails unless every stored object is linked into the graph.
    pub(crate) fn require_fully_indexed(&self) -> Result<()> {
        let (indexed, objects) = (self.indexed_count(), self.object_count());
        if indexed != objects {
            return Err(IndexError::invalid(
                "index",
                format!("{} of {objects} objects are not indexed yet", objects - indexed),
            ));
        }
        Ok(())
    }

    /// Swap in a finished adjacency together with the configuration that
    /// describes it.
    pub(crate) fn install(&self, nodes: Vec<Node>, property: Property) -> Result<()> {
        let mut current = self.property.write();
        self.graph.replace_all(nodes)?;
        *current = property;
        Ok(())
    }

    pub(crate) fn update_property(&self, f: impl FnOnce(&mut Property)) {
        f(&mut self.property.write());
    }
}

//! Graph repository: one adjacency list per object.
//!
//! The outer lock only guards the node vector itself (appends and whole-graph
//! swaps). Each node has its own lock, so construction can rewrite one node's
//! edges while searches read the rest of the graph.

use crate::error::{IndexError, Result};
use crate::graph::{ObjectDistance, ObjectId};
use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Outgoing edges of one object, sorted by `(distance, id)` with no duplicate
/// targets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    edges: Vec<ObjectDistance>,
}

impl Node {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a node from arbitrary edges. Duplicate targets keep their
    /// shortest distance.
    pub fn from_edges(mut edges: Vec<ObjectDistance>) -> Self {
        edges.sort_by(|a, b| a.id.cmp(&b.id).then(a.ordering(b)));
        edges.dedup_by_key(|e| e.id);
        edges.sort_by(ObjectDistance::ordering);
        Self { edges }
    }

    pub fn edges(&self) -> &[ObjectDistance] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.edges.iter().any(|e| e.id == id)
    }

    /// Distance of the edge to `id`, if there is one.
    pub fn distance_to(&self, id: ObjectId) -> Option<f32> {
        self.edges.iter().find(|e| e.id == id).map(|e| e.distance)
    }

    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.edges.iter().map(|e| e.id)
    }

    /// Insert in sorted position. Returns `false` if the target is present.
    pub fn insert(&mut self, edge: ObjectDistance) -> bool {
        if self.contains(edge.id) {
            return false;
        }
        let at = self
            .edges
            .partition_point(|e| e.ordering(&edge).is_lt());
        self.edges.insert(at, edge);
        true
    }

    /// Insert while keeping at most `bound` edges.
    ///
    /// A full node only accepts the edge when it is strictly closer than the
    /// current farthest edge, which it then replaces.
    pub fn insert_bounded(&mut self, edge: ObjectDistance, bound: usize) -> bool {
        if self.contains(edge.id) {
            return false;
        }
        if self.edges.len() < bound {
            return self.insert(edge);
        }
        match self.edges.last() {
            Some(worst) if edge.distance < worst.distance => {
                self.edges.pop();
                self.insert(edge)
            }
            _ => false,
        }
    }

    pub fn truncate(&mut self, len: usize) {
        self.edges.truncate(len);
    }

    pub fn clear(&mut self) {
        self.edges.clear();
    }
}

/// Adjacency lists for every object id, index `id - 1`.
#[derive(Debug, Default)]
pub struct GraphRepository {
    nodes: RwLock<Vec<RwLock<Node>>>,
}

impl GraphRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_nodes(nodes: Vec<Node>) -> Self {
        Self {
            nodes: RwLock::new(nodes.into_iter().map(RwLock::new).collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append an edgeless node and return the id it belongs to.
    pub fn push_empty(&self) -> ObjectId {
        let mut nodes = self.nodes.write();
        nodes.push(RwLock::new(Node::new()));
        nodes.len() as ObjectId
    }

    /// Remove the most recently appended node.
    pub(crate) fn pop(&self) {
        self.nodes.write().pop();
    }

    /// Copy of one node's edges.
    pub fn neighbors(&self, id: ObjectId) -> Option<Vec<ObjectDistance>> {
        self.read().with_node(id, |node| node.edges().to_vec())
    }

    /// Mutate one node in place. `None` when the id has no node.
    pub fn update<R>(&self, id: ObjectId, f: impl FnOnce(&mut Node) -> R) -> Option<R> {
        let nodes = self.nodes.read_recursive();
        let slot = nodes.get((id as usize).wrapping_sub(1))?;
        let mut node = slot.write();
        Some(f(&mut node))
    }

    /// Consistent copy of every node, in id order.
    pub fn snapshot(&self) -> Vec<Node> {
        let nodes = self.nodes.write();
        nodes.iter().map(|node| node.read().clone()).collect()
    }

    /// Swap in a whole new adjacency. The node count must not change.
    pub fn replace_all(&self, replacement: Vec<Node>) -> Result<()> {
        let mut nodes = self.nodes.write();
        if replacement.len() != nodes.len() {
            return Err(IndexError::corrupt(
                0,
                format!(
                    "replacement has {} nodes, graph has {}",
                    replacement.len(),
                    nodes.len()
                ),
            ));
        }
        *nodes = replacement.into_iter().map(RwLock::new).collect();
        Ok(())
    }

    pub fn edge_count(&self) -> usize {
        self.read().edge_count()
    }

    pub fn read(&self) -> GraphView<'_> {
        GraphView {
            nodes: self.nodes.read_recursive(),
        }
    }
}

/// Read access to the node vector. Individual nodes are locked per call.
pub struct GraphView<'a> {
    nodes: RwLockReadGuard<'a, Vec<RwLock<Node>>>,
}

impl GraphView<'_> {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn with_node<R>(&self, id: ObjectId, f: impl FnOnce(&Node) -> R) -> Option<R> {
        let slot = self.nodes.get((id as usize).wrapping_sub(1))?;
        let node = slot.read();
        Some(f(&node))
    }

    /// Copy up to `limit` closest edges of `id` into `out` (0 = all edges).
    pub fn copy_edges(&self, id: ObjectId, limit: usize, out: &mut Vec<ObjectDistance>) {
        out.clear();
        self.with_node(id, |node| {
            let edges = node.edges();
            let take = if limit == 0 { edges.len() } else { limit.min(edges.len()) };
            out.extend_from_slice(&edges[..take]);
        });
    }

    pub fn edge_count(&self) -> usize {
        self.nodes.iter().map(|node| node.read().len()).sum()
    }
}

/// Check a complete adjacency against an object count.
///
/// Every edge must point at an existing object other than its source, targets
/// must be unique per node, and distances finite. Nodes after `graphed` must
/// be edgeless.
pub fn validate_nodes(nodes: &[Node], object_count: usize, graphed: usize) -> Result<()> {
    if nodes.len() != object_count {
        return Err(IndexError::corrupt(
            0,
            format!("{} nodes for {object_count} objects", nodes.len()),
        ));
    }
    let mut seen = HashSet::new();
    for (idx, node) in nodes.iter().enumerate() {
        let id = idx as ObjectId + 1;
        if idx >= graphed && !node.is_empty() {
            return Err(IndexError::corrupt(id, "object is not indexed but has edges"));
        }
        seen.clear();
        for edge in node.edges() {
            if edge.id == 0 || edge.id as usize > object_count {
                return Err(IndexError::corrupt(
                    id,
                    format!("edge to unknown object {}", edge.id),
                ));
            }
            if edge.id == id {
                return Err(IndexError::corrupt(id, "self loop"));
            }
            if !edge.distance.is_finite() || edge.distance < 0.0 {
                return Err(IndexError::corrupt(
                    id,
                    format!("edge to {} has distance {}", edge.id, edge.distance),
                ));
            }
            if !seen.insert(edge.id) {
                return Err(IndexError::corrupt(
                    id,
                    format!("duplicate edge to {}", edge.id),
                ));
            }
        }
    }
    Ok(())
}

//! Best-first graph search with epsilon-widened pruning.
//!
//! A search starts from evenly spaced seed nodes and repeatedly expands the
//! closest unexpanded candidate. Once `size` results are held, a candidate is
//! only kept while its distance is within `(1 + epsilon)` times the current
//! worst result. Ties always break on the smaller id so results are
//! reproducible.

use crate::graph::repository::{GraphRepository, GraphView};
use crate::graph::space::{ObjectSpace, Objects};
use crate::graph::visited::VisitedSet;
use crate::graph::{ObjectDistance, ObjectId};
use ordered_float::OrderedFloat;
use std::cell::RefCell;
use std::collections::BinaryHeap;

thread_local! {
    /// Reused per thread so queries never allocate a visited array.
    static SEARCH_VISITED: RefCell<VisitedSet> = RefCell::new(VisitedSet::new(0));
}

/// A k-NN (or range) query against an [`Index`](crate::graph::Index).
#[derive(Debug, Clone, Copy)]
pub struct SearchQuery<'a> {
    pub vector: &'a [f32],
    pub size: usize,
    /// Explicit exploration slack. Takes precedence over `expected_accuracy`.
    pub epsilon: Option<f32>,
    /// Target recall, resolved to an epsilon through the accuracy table.
    pub expected_accuracy: Option<f32>,
    /// Results farther than this are dropped. Infinite by default.
    pub radius: f32,
    /// Stop after this many distance computations.
    pub visit_budget: Option<usize>,
}

impl<'a> SearchQuery<'a> {
    pub fn new(vector: &'a [f32], size: usize) -> Self {
        Self {
            vector,
            size,
            epsilon: None,
            expected_accuracy: None,
            radius: f32::INFINITY,
            visit_budget: None,
        }
    }

    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = Some(epsilon);
        self
    }

    pub fn with_expected_accuracy(mut self, accuracy: f32) -> Self {
        self.expected_accuracy = Some(accuracy);
        self
    }

    pub fn with_radius(mut self, radius: f32) -> Self {
        self.radius = radius;
        self
    }

    pub fn with_visit_budget(mut self, budget: usize) -> Self {
        self.visit_budget = Some(budget);
        self
    }
}

/// Results sorted ascending by `(distance, id)`, plus how many distances
/// were computed to find them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResult {
    pub results: Vec<ObjectDistance>,
    pub visited: usize,
}

/// Resolved knobs of a single traversal.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SearchParams {
    pub size: usize,
    /// `1 + epsilon`.
    pub exploration: f32,
    pub radius: f32,
    /// Edges followed per node, 0 = all.
    pub edge_limit: usize,
    pub visit_budget: Option<usize>,
}

/// Frontier entry, min-heap by `(distance, id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Candidate {
    distance: OrderedFloat<f32>,
    id: ObjectId,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (other.distance, other.id).cmp(&(self.distance, self.id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Result entry, max-heap by `(distance, id)` so the worst is on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ResultEntry {
    distance: OrderedFloat<f32>,
    id: ObjectId,
}

/// `count` seeds evenly spaced over ids `1..=graphed`.
pub fn seed_ids(graphed: ObjectId, count: usize) -> Vec<ObjectId> {
    let n = graphed as usize;
    let count = count.min(n);
    if count == 0 {
        return Vec::new();
    }
    let stride = n / count;
    (0..count).map(|i| (i * stride) as ObjectId + 1).collect()
}

fn offer(results: &mut BinaryHeap<ResultEntry>, params: &SearchParams, distance: f32, id: ObjectId) {
    if distance > params.radius {
        return;
    }
    let entry = ResultEntry {
        distance: OrderedFloat(distance),
        id,
    };
    if results.len() < params.size {
        results.push(entry);
    } else if results.peek().is_some_and(|worst| entry < *worst) {
        results.pop();
        results.push(entry);
    }
}

#[inline]
fn cutoff(results: &BinaryHeap<ResultEntry>, params: &SearchParams) -> f32 {
    let bound = if results.len() >= params.size {
        results.peek().map_or(params.radius, |worst| worst.distance.0)
    } else {
        params.radius
    };
    bound * params.exploration
}

/// Search `graph` from `seeds`.
///
/// Every seed and every edge target must be a valid id of `objects`.
pub(crate) fn search_graph(
    objects: &Objects<'_>,
    graph: &GraphView<'_>,
    query: &[f32],
    seeds: &[ObjectId],
    params: &SearchParams,
    visited: &mut VisitedSet,
) -> SearchResult {
    if params.size == 0 {
        return SearchResult::default();
    }
    visited.clear();
    visited.ensure_capacity(objects.len().max(graph.len()) + 1);
    let budget = params.visit_budget.unwrap_or(usize::MAX);
    let mut candidates: BinaryHeap<Candidate> = BinaryHeap::with_capacity(params.size * 2);
    let mut results: BinaryHeap<ResultEntry> = BinaryHeap::with_capacity(params.size + 1);
    let mut computed = 0usize;

    for &seed in seeds {
        if computed >= budget {
            break;
        }
        if !visited.insert(seed) {
            continue;
        }
        let distance = objects.distance_to(query, seed);
        computed += 1;
        candidates.push(Candidate {
            distance: OrderedFloat(distance),
            id: seed,
        });
        offer(&mut results, params, distance, seed);
    }

    let mut edges = Vec::new();
    'expand: while let Some(current) = candidates.pop() {
        if current.distance.0 > cutoff(&results, params) {
            break;
        }
        graph.copy_edges(current.id, params.edge_limit, &mut edges);
        for edge in &edges {
            if !visited.insert(edge.id) {
                continue;
            }
            if computed >= budget {
                break 'expand;
            }
            let distance = objects.distance_to(query, edge.id);
            computed += 1;
            if distance <= cutoff(&results, params) {
                candidates.push(Candidate {
                    distance: OrderedFloat(distance),
                    id: edge.id,
                });
            }
            offer(&mut results, params, distance, edge.id);
        }
    }

    SearchResult {
        results: results
            .into_sorted_vec()
            .into_iter()
            .map(|entry| ObjectDistance::new(entry.id, entry.distance.0))
            .collect(),
        visited: computed,
    }
}

/// Search using the calling thread's reusable visited set.
pub(crate) fn run_query(
    space: &ObjectSpace,
    graph: &GraphRepository,
    graphed: ObjectId,
    seed_size: usize,
    query: &[f32],
    params: &SearchParams,
) -> SearchResult {
    let seeds = seed_ids(graphed, seed_size);
    if seeds.is_empty() {
        return SearchResult::default();
    }
    let objects = space.read();
    let view = graph.read();
    SEARCH_VISITED.with(|cell| {
        let mut visited = cell.borrow_mut();
        search_graph(&objects, &view, query, &seeds, params, &mut visited)
    })
}

/// Exact k nearest objects by exhaustive scan, sorted by `(distance, id)`.
pub(crate) fn linear_search(objects: &Objects<'_>, query: &[f32], size: usize) -> Vec<ObjectDistance> {
    if size == 0 {
        return Vec::new();
    }
    let mut results: BinaryHeap<ResultEntry> = BinaryHeap::with_capacity(size + 1);
    for id in 1..=objects.len() as ObjectId {
        let entry = ResultEntry {
            distance: OrderedFloat(objects.distance_to(query, id)),
            id,
        };
        if results.len() < size {
            results.push(entry);
        } else if results.peek().is_some_and(|worst| entry < *worst) {
            results.pop();
            results.push(entry);
        }
    }
    results
        .into_sorted_vec()
        .into_iter()
        .map(|entry| ObjectDistance::new(entry.id, entry.distance.0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::distance::DistanceKind;
    use crate::graph::repository::Node;
    use crate::graph::space::ObjectType;

    /// Points 0, 1, .., n-1 on a line, each linked to its direct neighbors.
    fn line(n: usize) -> (ObjectSpace, GraphRepository) {
        let space = ObjectSpace::new(1, DistanceKind::L2, ObjectType::Float);
        for i in 0..n {
            space.append(&[i as f32]).unwrap();
        }
        let nodes = (1..=n as ObjectId)
            .map(|id| {
                let mut edges = Vec::new();
                if id > 1 {
                    edges.push(ObjectDistance::new(id - 1, 1.0));
                }
                if (id as usize) < n {
                    edges.push(ObjectDistance::new(id + 1, 1.0));
                }
                Node::from_edges(edges)
            })
            .collect();
        (space, GraphRepository::from_nodes(nodes))
    }

    fn params(size: usize, epsilon: f32) -> SearchParams {
        SearchParams {
            size,
            exploration: 1.0 + epsilon,
            radius: f32::INFINITY,
            edge_limit: 0,
            visit_budget: None,
        }
    }

    // ── Seeds ──

    #[test]
    fn test_seed_ids_evenly_spaced() {
        assert_eq!(seed_ids(0, 10), Vec::<ObjectId>::new());
        assert_eq!(seed_ids(3, 10), vec![1, 2, 3]);
        assert_eq!(seed_ids(100, 4), vec![1, 26, 51, 76]);
    }

    // ── Traversal ──

    #[test]
    fn test_walks_line_to_nearest() {
        let (space, graph) = line(50);
        let result = run_query(&space, &graph, 50, 1, &[37.2], &params(3, 0.1));
        let ids: Vec<_> = result.results.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![38, 39, 37]);
        assert!(result.visited >= 38);
    }

    #[test]
    fn test_ties_break_on_smaller_id() {
        let (space, graph) = line(5);
        let result = run_query(&space, &graph, 5, 5, &[2.0], &params(3, 0.0));
        let ids: Vec<_> = result.results.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 2, 4]);
    }

    #[test]
    fn test_size_larger_than_graph_returns_every_reachable_node() {
        let (space, graph) = line(6);
        let result = run_query(&space, &graph, 6, 1, &[0.0], &params(100, 0.0));
        assert_eq!(result.results.len(), 6);
        assert!(result.results.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn test_radius_filters_results() {
        let (space, graph) = line(20);
        let mut p = params(10, 0.1);
        p.radius = 1.5;
        let result = run_query(&space, &graph, 20, 2, &[10.0], &p);
        let ids: Vec<_> = result.results.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![11, 10, 12]);
    }

    #[test]
    fn test_visit_budget_caps_distance_computations() {
        let (space, graph) = line(100);
        let mut p = params(5, 0.5);
        p.visit_budget = Some(7);
        let result = run_query(&space, &graph, 100, 1, &[99.0], &p);
        assert_eq!(result.visited, 7);
        assert!(!result.results.is_empty());
    }

    #[test]
    fn test_edge_limit_restricts_expansion() {
        // Node 1 only sees node 2 when limited to its closest edge.
        let space = ObjectSpace::new(1, DistanceKind::L2, ObjectType::Float);
        for x in [0.0, 1.0, 5.0] {
            space.append(&[x]).unwrap();
        }
        let graph = GraphRepository::from_nodes(vec![
            Node::from_edges(vec![ObjectDistance::new(2, 1.0), ObjectDistance::new(3, 5.0)]),
            Node::new(),
            Node::new(),
        ]);
        let mut p = params(3, 10.0);
        p.edge_limit = 1;
        let result = run_query(&space, &graph, 1, 1, &[5.0], &p);
        let ids: Vec<_> = result.results.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn test_empty_graph_and_zero_size() {
        let (space, graph) = line(4);
        assert!(run_query(&space, &graph, 0, 10, &[1.0], &params(3, 0.1)).results.is_empty());
        assert!(run_query(&space, &graph, 4, 10, &[1.0], &params(0, 0.1)).results.is_empty());
    }

    // ── Linear scan ──

    #[test]
    fn test_linear_search_is_exact() {
        let (space, _) = line(10);
        let objects = space.read();
        let found = linear_search(&objects, &[4.6], 3);
        let ids: Vec<_> = found.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![6, 5, 7]);
        assert_eq!(linear_search(&objects, &[0.0], 50).len(), 10);
    }
}

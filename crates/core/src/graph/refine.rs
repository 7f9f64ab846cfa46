//! RNNG refinement: relative-neighborhood pruning with optional
//! bidirectional completion, iterated to a fixed point.
//!
//! Round `t` draws each node's candidates from its edges and its neighbors'
//! edges in `G_t`, merged with every candidate it saw in earlier rounds. A
//! candidate `v` of `u` is accepted in `(distance, id)` order unless an
//! already accepted `w` is closer to `v` than `u` is. The pass stops when a
//! round reproduces its input, so refining its output again is a no-op.

use crate::config;
use crate::error::{IndexError, Result};
use crate::graph::index::Index;
use crate::graph::property::{GraphKind, Property};
use crate::graph::repository::Node;
use crate::graph::space::{ObjectSpace, Objects};
use crate::graph::{ObjectDistance, ObjectId};
use crate::thread::{AbortHandle, WorkerPool};
use std::sync::Arc;
use std::time::Instant;

/// Refinement settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RefineOptions {
    /// Number of edges kept by the pruning step.
    pub edge_size: usize,
    /// Add `v -> u` for every kept `u -> v`.
    pub force_bidirectional: bool,
    /// Out-degree cap once reverse edges are added.
    pub reverse_edge_limit: usize,
    pub max_iterations: usize,
    pub thread_count: usize,
}

impl Default for RefineOptions {
    fn default() -> Self {
        Self::with_edge_size(config::DEFAULT_EDGE_SIZE_FOR_CREATION)
    }
}

impl RefineOptions {
    pub fn with_edge_size(edge_size: usize) -> Self {
        Self {
            edge_size,
            force_bidirectional: true,
            reverse_edge_limit: edge_size * config::REFINE_REVERSE_EDGE_FACTOR,
            max_iterations: config::REFINE_MAX_ITERATIONS,
            thread_count: config::DEFAULT_THREAD_POOL_SIZE,
        }
    }

    /// Degree and thread count taken from an index's configuration.
    pub fn for_property(property: &Property) -> Self {
        Self {
            thread_count: property.thread_pool_size,
            ..Self::with_edge_size(property.edge_size_for_creation)
        }
    }

    pub fn with_force_bidirectional(mut self, force: bool) -> Self {
        self.force_bidirectional = force;
        self
    }

    pub fn with_reverse_edge_limit(mut self, limit: usize) -> Self {
        self.reverse_edge_limit = limit;
        self
    }

    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    pub fn with_thread_count(mut self, threads: usize) -> Self {
        self.thread_count = threads;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.edge_size == 0 {
            return Err(IndexError::invalid("edge_size", "must be at least 1"));
        }
        if self.force_bidirectional && self.reverse_edge_limit < self.edge_size {
            return Err(IndexError::invalid(
                "reverse_edge_limit",
                format!(
                    "{} is below the selection degree {}",
                    self.reverse_edge_limit, self.edge_size
                ),
            ));
        }
        if self.max_iterations == 0 {
            return Err(IndexError::invalid("max_iterations", "must be at least 1"));
        }
        if self.thread_count == 0 {
            return Err(IndexError::invalid("thread_count", "must be at least 1"));
        }
        Ok(())
    }
}

/// Summary of one refinement pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefineReport {
    pub rounds: usize,
    /// `false` when `max_iterations` ran out before a fixed point.
    pub converged: bool,
    pub edges_before: usize,
    pub edges_after: usize,
}

impl Index {
    /// Turn the current graph into an RNNG. Every object must be indexed.
    ///
    /// The new adjacency is built on a copy and swapped in only on success.
    pub fn refine(&self, options: &RefineOptions) -> Result<RefineReport> {
        options.validate()?;
        let _pass = self.begin_pass();
        self.require_fully_indexed()?;

        let started = Instant::now();
        let input = self.graph.snapshot();
        let edges_before = input.iter().map(Node::len).sum();
        tracing::info!(
            "Refining {} nodes (edge size {}, bidirectional {}, {} threads)",
            input.len(),
            options.edge_size,
            options.force_bidirectional,
            options.thread_count
        );

        let pool = WorkerPool::new(options.thread_count)?;
        let outcome = refine_nodes(&self.space, input, options, &pool, self.abort_flag());
        pool.join()?;
        let (nodes, rounds, converged) = outcome?;

        let edges_after = nodes.iter().map(Node::len).sum();
        let mut property = self.property();
        property.graph_kind = GraphKind::Rnng;
        self.install(nodes, property)?;
        tracing::info!(
            "RNNG ready after {} rounds: {} -> {} edges in {:.2?}",
            rounds,
            edges_before,
            edges_after,
            started.elapsed()
        );
        Ok(RefineReport {
            rounds,
            converged,
            edges_before,
            edges_after,
        })
    }
}

/// Returns the refined adjacency, the number of rounds and whether a fixed
/// point was reached.
pub(crate) fn refine_nodes(
    space: &Arc<ObjectSpace>,
    input: Vec<Node>,
    options: &RefineOptions,
    pool: &WorkerPool,
    abort: &AbortHandle,
) -> Result<(Vec<Node>, usize, bool)> {
    let n = input.len();
    let mut current = Arc::new(input);
    let mut seen: Vec<Vec<ObjectId>> = vec![Vec::new(); n];

    for round in 1..=options.max_iterations {
        let previous = Arc::new(std::mem::take(&mut seen));
        let graph = Arc::clone(&current);
        let space = Arc::clone(space);
        let abort = abort.clone();
        let degree = options.edge_size;

        let per_range = pool.run_partitioned(n, move |range| {
            let objects = space.read();
            let mut out = Vec::with_capacity(range.len());
            for idx in range {
                let id = idx as ObjectId + 1;
                if abort.is_aborted() {
                    return Err(IndexError::Cancelled { id });
                }
                let candidates = gather_candidates(&graph, id, &previous[idx])?;
                let selected = select_neighbors(&objects, id, &candidates, degree);
                out.push((candidates, selected));
            }
            Ok(out)
        })?;

        let mut selections = Vec::with_capacity(n);
        for (candidates, selected) in per_range.into_iter().flatten() {
            seen.push(candidates);
            selections.push(selected);
        }
        let next = complete(selections, options);
        let changed = next
            .iter()
            .zip(current.iter())
            .filter(|(a, b)| !a.ids().eq(b.ids()))
            .count();
        tracing::debug!("Refinement round {}: {} nodes changed", round, changed);
        if changed == 0 {
            return Ok((next, round, true));
        }
        current = Arc::new(next);
    }

    tracing::warn!(
        "Refinement did not reach a fixed point within {} rounds",
        options.max_iterations
    );
    let nodes = Arc::try_unwrap(current).unwrap_or_else(|shared| (*shared).clone());
    Ok((nodes, options.max_iterations, false))
}

/// Sorted, deduplicated union of `earlier`, the edges of `id` and the edges
/// of its neighbors, without `id` itself.
fn gather_candidates(graph: &[Node], id: ObjectId, earlier: &[ObjectId]) -> Result<Vec<ObjectId>> {
    let node = slot(graph, id, id)?;
    let mut candidates = earlier.to_vec();
    for edge in node.edges() {
        candidates.push(edge.id);
        candidates.extend(slot(graph, id, edge.id)?.ids());
    }
    candidates.retain(|&c| c != id);
    candidates.sort_unstable();
    candidates.dedup();
    Ok(candidates)
}

fn slot(graph: &[Node], from: ObjectId, id: ObjectId) -> Result<&Node> {
    graph
        .get((id as usize).wrapping_sub(1))
        .ok_or_else(|| IndexError::corrupt(from, format!("edge to unknown object {id}")))
}

/// Relative-neighborhood selection of at most `degree` candidates.
pub(crate) fn select_neighbors(
    objects: &Objects<'_>,
    id: ObjectId,
    candidates: &[ObjectId],
    degree: usize,
) -> Vec<ObjectDistance> {
    let mut scored: Vec<ObjectDistance> = candidates
        .iter()
        .map(|&c| ObjectDistance::new(c, objects.distance(id, c)))
        .collect();
    scored.sort_by(ObjectDistance::ordering);

    let mut accepted: Vec<ObjectDistance> = Vec::with_capacity(degree);
    for candidate in scored {
        if accepted.len() >= degree {
            break;
        }
        let occluded = accepted
            .iter()
            .any(|kept| objects.distance(kept.id, candidate.id) < candidate.distance);
        if !occluded {
            accepted.push(candidate);
        }
    }
    accepted
}

/// Build the round's adjacency from the selections, adding reverse edges
/// when bidirectionality is forced.
fn complete(selections: Vec<Vec<ObjectDistance>>, options: &RefineOptions) -> Vec<Node> {
    if !options.force_bidirectional {
        return selections.into_iter().map(Node::from_edges).collect();
    }
    let mut reverse: Vec<Vec<ObjectDistance>> = vec![Vec::new(); selections.len()];
    for (idx, selected) in selections.iter().enumerate() {
        let source = idx as ObjectId + 1;
        for edge in selected {
            let target = edge.id as usize - 1;
            if !selections[target].iter().any(|e| e.id == source) {
                reverse[target].push(ObjectDistance::new(source, edge.distance));
            }
        }
    }
    selections
        .into_iter()
        .zip(reverse)
        .map(|(mut selected, mut extra)| {
            extra.sort_by(ObjectDistance::ordering);
            extra.truncate(options.reverse_edge_limit.saturating_sub(selected.len()));
            selected.extend(extra);
            Node::from_edges(selected)
        })
        .collect()
}

//! ONNG optimization: degree reshaping, shortcut reduction and
//! search-parameter tuning.
//!
//! Reshaping keeps each node's closest `num_of_outgoing_edges` edges and
//! turns the remaining input edges around, capping how many reversed edges a
//! node may receive. Shortcut reduction then drops direct edges that a
//! slightly longer two-hop path already covers. Finally a sampled query set
//! is swept over epsilon to pick the default search epsilon and, optionally,
//! to tabulate accuracy per epsilon.

use crate::config;
use crate::error::{IndexError, Result};
use crate::graph::index::Index;
use crate::graph::property::{check_epsilon, AccuracyEntry, GraphKind, Property};
use crate::graph::repository::{GraphRepository, Node};
use crate::graph::search::{linear_search, run_query, SearchParams};
use crate::graph::space::ObjectSpace;
use crate::graph::{ObjectDistance, ObjectId};
use crate::thread::{AbortHandle, WorkerPool};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Optimizer settings.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerOptions {
    pub num_of_outgoing_edges: usize,
    pub num_of_incoming_edges: usize,
    pub shortcut_reduction: bool,
    pub search_parameter_optimization: bool,
    pub accuracy_table_generation: bool,
    /// Detour allowance of shortcut reduction.
    pub margin: f32,
    /// Recall slack granted when accepting an epsilon.
    pub gt_epsilon: f32,
    pub target_accuracy: f32,
    pub num_of_queries: usize,
    pub num_of_results: usize,
    /// Shortcut reduction never leaves a node with fewer edges than this.
    pub min_num_of_edges: usize,
    pub epsilon_sweep: Vec<f32>,
    pub sample_seed: u64,
    pub thread_count: usize,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            num_of_outgoing_edges: config::DEFAULT_NUM_OF_OUTGOING_EDGES,
            num_of_incoming_edges: config::DEFAULT_NUM_OF_INCOMING_EDGES,
            shortcut_reduction: true,
            search_parameter_optimization: true,
            accuracy_table_generation: false,
            margin: config::DEFAULT_SHORTCUT_MARGIN,
            gt_epsilon: config::DEFAULT_GT_EPSILON,
            target_accuracy: config::DEFAULT_TARGET_ACCURACY,
            num_of_queries: config::DEFAULT_NUM_OF_QUERIES,
            num_of_results: config::DEFAULT_NUM_OF_RESULTS,
            min_num_of_edges: 0,
            epsilon_sweep: config::DEFAULT_EPSILON_SWEEP.to_vec(),
            sample_seed: config::DEFAULT_SAMPLE_SEED,
            thread_count: config::DEFAULT_THREAD_POOL_SIZE,
        }
    }
}

impl OptimizerOptions {
    pub fn with_edges(mut self, outgoing: usize, incoming: usize) -> Self {
        self.num_of_outgoing_edges = outgoing;
        self.num_of_incoming_edges = incoming;
        self
    }

    pub fn with_shortcut_reduction(mut self, enabled: bool) -> Self {
        self.shortcut_reduction = enabled;
        self
    }

    pub fn with_search_parameter_optimization(mut self, enabled: bool) -> Self {
        self.search_parameter_optimization = enabled;
        self
    }

    pub fn with_accuracy_table_generation(mut self, enabled: bool) -> Self {
        self.accuracy_table_generation = enabled;
        self
    }

    pub fn with_margin(mut self, margin: f32) -> Self {
        self.margin = margin;
        self
    }

    pub fn with_target_accuracy(mut self, target: f32, gt_epsilon: f32) -> Self {
        self.target_accuracy = target;
        self.gt_epsilon = gt_epsilon;
        self
    }

    pub fn with_sampling(mut self, queries: usize, results: usize) -> Self {
        self.num_of_queries = queries;
        self.num_of_results = results;
        self
    }

    pub fn with_min_num_of_edges(mut self, edges: usize) -> Self {
        self.min_num_of_edges = edges;
        self
    }

    pub fn with_epsilon_sweep(mut self, sweep: Vec<f32>) -> Self {
        self.epsilon_sweep = sweep;
        self
    }

    pub fn with_sample_seed(mut self, seed: u64) -> Self {
        self.sample_seed = seed;
        self
    }

    pub fn with_thread_count(mut self, threads: usize) -> Self {
        self.thread_count = threads;
        self
    }

    fn sweeps(&self) -> bool {
        self.search_parameter_optimization || self.accuracy_table_generation
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_of_outgoing_edges == 0 {
            return Err(IndexError::invalid("num_of_outgoing_edges", "must be at least 1"));
        }
        if !self.margin.is_finite() || self.margin < 0.0 {
            return Err(IndexError::invalid(
                "margin",
                format!("{} is not a non-negative finite number", self.margin),
            ));
        }
        if self.thread_count == 0 {
            return Err(IndexError::invalid("thread_count", "must be at least 1"));
        }
        if !self.sweeps() {
            return Ok(());
        }
        if !(0.0..=1.0).contains(&self.gt_epsilon) {
            return Err(IndexError::invalid(
                "gt_epsilon",
                format!("{} is outside [0, 1]", self.gt_epsilon),
            ));
        }
        if !(self.target_accuracy > 0.0 && self.target_accuracy <= 1.0) {
            return Err(IndexError::invalid(
                "target_accuracy",
                format!("{} is outside (0, 1]", self.target_accuracy),
            ));
        }
        if self.num_of_queries == 0 {
            return Err(IndexError::invalid("num_of_queries", "must be at least 1"));
        }
        if self.num_of_results == 0 {
            return Err(IndexError::invalid("num_of_results", "must be at least 1"));
        }
        if self.epsilon_sweep.is_empty() {
            return Err(IndexError::invalid("epsilon_sweep", "needs at least one epsilon"));
        }
        for &epsilon in &self.epsilon_sweep {
            check_epsilon(epsilon)?;
        }
        Ok(())
    }
}

/// What an optimization pass did.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationReport {
    pub edges_before: usize,
    pub edges_after: usize,
    pub shortcuts_removed: usize,
    /// Epsilon recorded as the index default, when tuning ran.
    pub chosen_epsilon: Option<f32>,
    /// One entry per swept epsilon, when a sweep ran.
    pub sweep: Vec<AccuracyEntry>,
}

/// Converts an ANNG or RNNG into an ONNG.
#[derive(Debug, Clone)]
pub struct GraphOptimizer {
    options: OptimizerOptions,
}

impl GraphOptimizer {
    pub fn new(options: OptimizerOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { options })
    }

    pub fn options(&self) -> &OptimizerOptions {
        &self.options
    }

    /// Load `input`, optimize it and write the result to `output`.
    ///
    /// The input file is never written.
    pub fn execute(&self, input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<OptimizationReport> {
        let (input, output) = (input.as_ref(), output.as_ref());
        if input == output
            || (output.exists() && input.canonicalize()? == output.canonicalize()?)
        {
            return Err(IndexError::invalid(
                "output",
                format!("{} would overwrite the input index", output.display()),
            ));
        }
        let index = Index::open(input)?;
        let report = self.optimize(&index)?;
        index.save(output)?;
        tracing::info!("Optimized index written to {:?}", output);
        Ok(report)
    }

    /// Optimize `index` in memory, swapping in the new adjacency on success.
    pub fn optimize(&self, index: &Index) -> Result<OptimizationReport> {
        let _pass = index.begin_pass();
        index.require_fully_indexed()?;
        let options = &self.options;
        let started = Instant::now();
        let input = index.graph.snapshot();
        let edges_before = input.iter().map(Node::len).sum();
        tracing::info!(
            "Optimizing {} nodes (out {}, in {}, shortcut reduction {}, parameter search {})",
            input.len(),
            options.num_of_outgoing_edges,
            options.num_of_incoming_edges,
            options.shortcut_reduction,
            options.search_parameter_optimization
        );

        let pool = WorkerPool::new(options.thread_count)?;
        let outcome = self.transform(index, input, &pool);
        pool.join()?;
        let (nodes, property, report) = outcome?;

        index.install(nodes, property)?;
        tracing::info!(
            "ONNG ready: {} -> {} edges ({} shortcuts removed) in {:.2?}",
            edges_before,
            report.edges_after,
            report.shortcuts_removed,
            started.elapsed()
        );
        Ok(OptimizationReport {
            edges_before,
            ..report
        })
    }

    fn transform(
        &self,
        index: &Index,
        input: Vec<Node>,
        pool: &WorkerPool,
    ) -> Result<(Vec<Node>, Property, OptimizationReport)> {
        let options = &self.options;
        let abort = index.abort_flag();
        let mut nodes = reshape(&input, options.num_of_outgoing_edges, options.num_of_incoming_edges)?;
        drop(input);
        let mut shortcuts_removed = 0;
        if options.shortcut_reduction {
            let reshaped = nodes.iter().map(Node::len).sum::<usize>();
            nodes = reduce_shortcuts(nodes, options.margin, options.min_num_of_edges, pool, abort)?;
            shortcuts_removed = reshaped - nodes.iter().map(Node::len).sum::<usize>();
            tracing::debug!("Shortcut reduction removed {} edges", shortcuts_removed);
        }

        let mut property = index.property();
        property.graph_kind = GraphKind::Onng;
        let mut report = OptimizationReport {
            edges_before: 0,
            edges_after: nodes.iter().map(Node::len).sum(),
            shortcuts_removed,
            chosen_epsilon: None,
            sweep: Vec::new(),
        };
        if !options.sweeps() || nodes.is_empty() {
            return Ok((nodes, property, report));
        }

        let candidate = Arc::new(GraphRepository::from_nodes(nodes));
        let sweep = self.sweep(&index.space, &candidate, &property, pool, abort)?;
        if options.search_parameter_optimization {
            let chosen = self.choose_epsilon(&sweep);
            property.default_epsilon = chosen;
            report.chosen_epsilon = chosen;
        }
        if options.accuracy_table_generation {
            property.accuracy_table = sweep.clone();
        }
        report.sweep = sweep;
        let nodes = match Arc::try_unwrap(candidate) {
            Ok(graph) => graph.snapshot(),
            Err(shared) => shared.snapshot(),
        };
        Ok((nodes, property, report))
    }

    /// Measure recall, latency and visited count per swept epsilon on the
    /// candidate graph.
    fn sweep(
        &self,
        space: &Arc<ObjectSpace>,
        graph: &Arc<GraphRepository>,
        property: &Property,
        pool: &WorkerPool,
        abort: &AbortHandle,
    ) -> Result<Vec<AccuracyEntry>> {
        let options = &self.options;
        let count = space.len();
        let queries = options.num_of_queries.min(count);
        let size = options.num_of_results.min(count);
        let mut rng = StdRng::seed_from_u64(options.sample_seed);
        let mut sample: Vec<ObjectId> = rand::seq::index::sample(&mut rng, count, queries)
            .into_iter()
            .map(|i| i as ObjectId + 1)
            .collect();
        sample.sort_unstable();
        let sample = Arc::new(sample);
        tracing::debug!("Sampled {} queries for parameter search", queries);

        let truth = {
            let space = Arc::clone(space);
            let sample = Arc::clone(&sample);
            let abort = abort.clone();
            pool.run_partitioned(queries, move |range| {
                let objects = space.read();
                let mut out = Vec::with_capacity(range.len());
                for i in range {
                    if abort.is_aborted() {
                        return Err(IndexError::Cancelled { id: sample[i] });
                    }
                    let found = linear_search(&objects, objects.vector(sample[i]), size);
                    out.push(found.iter().map(|r| r.id).collect::<HashSet<_>>());
                }
                Ok(out)
            })?
        };
        let truth: Arc<Vec<HashSet<ObjectId>>> = Arc::new(truth.into_iter().flatten().collect());

        let mut epsilons = options.epsilon_sweep.clone();
        epsilons.sort_by(|a, b| a.total_cmp(b));
        epsilons.dedup();
        let mut table = Vec::with_capacity(epsilons.len());
        for epsilon in epsilons {
            let params = SearchParams {
                size,
                exploration: 1.0 + epsilon,
                radius: f32::INFINITY,
                edge_limit: property.edge_size_for_search,
                visit_budget: None,
            };
            let space = Arc::clone(space);
            let graph = Arc::clone(graph);
            let sample = Arc::clone(&sample);
            let truth = Arc::clone(&truth);
            let abort = abort.clone();
            let seed_size = property.seed_size;
            let graphed = count as ObjectId;
            let per_range = pool.run_partitioned(queries, move |range| {
                let (mut hits, mut micros, mut visited) = (0usize, 0f64, 0usize);
                for i in range {
                    if abort.is_aborted() {
                        return Err(IndexError::Cancelled { id: sample[i] });
                    }
                    let query = space.read().vector(sample[i]).to_vec();
                    let timer = Instant::now();
                    let result = run_query(&space, &graph, graphed, seed_size, &query, &params);
                    micros += timer.elapsed().as_secs_f64() * 1e6;
                    visited += result.visited;
                    hits += result
                        .results
                        .iter()
                        .filter(|r| truth[i].contains(&r.id))
                        .count();
                }
                Ok((hits, micros, visited))
            })?;
            let (hits, micros, visited) = per_range
                .into_iter()
                .fold((0, 0.0, 0), |acc, (h, m, v)| (acc.0 + h, acc.1 + m, acc.2 + v));
            let entry = AccuracyEntry {
                epsilon,
                recall: hits as f32 / (queries * size) as f32,
                average_latency_us: micros / queries as f64,
                average_visited: visited as f64 / queries as f64,
            };
            tracing::debug!(
                "epsilon {:+.3}: recall {:.4}, {:.1} us/query, {:.1} visited",
                entry.epsilon,
                entry.recall,
                entry.average_latency_us,
                entry.average_visited
            );
            table.push(entry);
        }
        Ok(table)
    }

    /// Cheapest accepted epsilon, or the most accurate one when the target
    /// is out of reach.
    fn choose_epsilon(&self, sweep: &[AccuracyEntry]) -> Option<f32> {
        let options = &self.options;
        let accepted = sweep
            .iter()
            .filter(|e| e.recall + options.gt_epsilon >= options.target_accuracy)
            .min_by(|a, b| {
                a.average_visited
                    .total_cmp(&b.average_visited)
                    .then(a.epsilon.total_cmp(&b.epsilon))
            });
        if let Some(entry) = accepted {
            return Some(entry.epsilon);
        }
        let best = sweep.iter().max_by(|a, b| {
            a.recall
                .total_cmp(&b.recall)
                .then(b.average_visited.total_cmp(&a.average_visited))
                .then(b.epsilon.total_cmp(&a.epsilon))
        })?;
        tracing::warn!(
            "No epsilon reached recall {:.3} (best {:.3} at {:+.3}); using the best",
            options.target_accuracy,
            best.recall,
            best.epsilon
        );
        Some(best.epsilon)
    }
}

fn slot(len: usize, from: ObjectId, id: ObjectId) -> Result<usize> {
    let idx = (id as usize).wrapping_sub(1);
    if idx >= len {
        return Err(IndexError::corrupt(from, format!("edge to unknown object {id}")));
    }
    Ok(idx)
}

/// Trim forward edges and add capped reversed edges.
///
/// When a node would receive more reversed edges than its incoming budget
/// allows, those from the sources with the most outgoing edges are dropped
/// first (then the longest, then the largest source id).
pub(crate) fn reshape(input: &[Node], outgoing: usize, incoming: usize) -> Result<Vec<Node>> {
    let n = input.len();
    let forward: Vec<Vec<ObjectDistance>> = input
        .iter()
        .map(|node| node.edges().iter().take(outgoing).copied().collect())
        .collect();

    let mut forward_in = vec![0usize; n];
    for (idx, edges) in forward.iter().enumerate() {
        for edge in edges {
            forward_in[slot(n, idx as ObjectId + 1, edge.id)?] += 1;
        }
    }

    // proposals[u] holds the sources v of proposed edges v -> u
    let mut proposals: Vec<Vec<ObjectDistance>> = vec![Vec::new(); n];
    let mut out_degree: Vec<usize> = forward.iter().map(Vec::len).collect();
    for (idx, node) in input.iter().enumerate() {
        let u = idx as ObjectId + 1;
        for edge in node.edges() {
            let v = slot(n, u, edge.id)?;
            if forward[v].iter().any(|e| e.id == u) {
                continue;
            }
            proposals[idx].push(ObjectDistance::new(edge.id, edge.distance));
            out_degree[v] += 1;
        }
    }

    let mut reversed: Vec<Vec<ObjectDistance>> = vec![Vec::new(); n];
    for (idx, mut sources) in proposals.into_iter().enumerate() {
        let room = incoming.saturating_sub(forward_in[idx]);
        sources.sort_by(|a, b| {
            out_degree[a.id as usize - 1]
                .cmp(&out_degree[b.id as usize - 1])
                .then(a.ordering(b))
        });
        for source in sources.into_iter().take(room) {
            reversed[source.id as usize - 1].push(ObjectDistance::new(idx as ObjectId + 1, source.distance));
        }
    }

    Ok(forward
        .into_iter()
        .zip(reversed)
        .map(|(mut edges, extra)| {
            edges.extend(extra);
            Node::from_edges(edges)
        })
        .collect())
}

/// Remove edges covered by a two-hop detour through a kept, shorter edge.
pub(crate) fn reduce_shortcuts(
    nodes: Vec<Node>,
    margin: f32,
    min_edges: usize,
    pool: &WorkerPool,
    abort: &AbortHandle,
) -> Result<Vec<Node>> {
    let len = nodes.len();
    let shared = Arc::new(nodes);
    let abort = abort.clone();
    let per_range = pool.run_partitioned(len, move |range| {
        let mut out = Vec::with_capacity(range.len());
        for idx in range {
            let id = idx as ObjectId + 1;
            if abort.is_aborted() {
                return Err(IndexError::Cancelled { id });
            }
            out.push(reduce_node(&shared, id, margin, min_edges)?);
        }
        Ok(out)
    })?;
    Ok(per_range.into_iter().flatten().collect())
}

fn reduce_node(graph: &[Node], id: ObjectId, margin: f32, min_edges: usize) -> Result<Node> {
    let edges = graph[id as usize - 1].edges();
    let mut kept: Vec<ObjectDistance> = Vec::with_capacity(edges.len());
    for (i, edge) in edges.iter().enumerate() {
        let remaining = edges.len() - i - 1;
        if kept.len() + remaining < min_edges {
            kept.push(*edge);
            continue;
        }
        let mut covered = false;
        for hop in &kept {
            if hop.distance >= edge.distance {
                continue;
            }
            let via = &graph[slot(graph.len(), id, hop.id)?];
            if let Some(second) = via.distance_to(edge.id) {
                if second < edge.distance && hop.distance + second <= (1.0 + margin) * edge.distance {
                    covered = true;
                    break;
                }
            }
        }
        if !covered {
            kept.push(*edge);
        }
    }
    Ok(Node::from_edges(kept))
}

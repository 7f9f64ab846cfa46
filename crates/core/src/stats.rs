//! Read-only graph diagnostics and recall evaluation.

use crate::error::{IndexError, Result};
use crate::graph::{Index, ObjectDistance, ObjectId, SearchQuery};
use crate::storage::VectorSet;
use std::collections::HashSet;
use std::fmt;
use std::time::Instant;

/// Degree distribution and, given exact neighbor lists, graph quality.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphStatistics {
    pub node_count: usize,
    pub edge_count: usize,
    pub average_out_degree: f64,
    pub min_out_degree: usize,
    pub max_out_degree: usize,
    pub min_in_degree: usize,
    pub max_in_degree: usize,
    /// Nodes no edge points to. Unreachable by traversal unless seeded.
    pub zero_in_degree: Vec<ObjectId>,
    /// Fraction of edges whose target is among the node's true nearest
    /// neighbors, compared at the node's own degree.
    pub graph_quality: Option<f64>,
}

impl GraphStatistics {
    pub fn compute(index: &Index) -> Self {
        let n = index.node_count();
        let mut in_degree = vec![0usize; n];
        let (mut edges, mut min_out, mut max_out) = (0usize, usize::MAX, 0usize);
        for id in 1..=n as ObjectId {
            let neighbors = index.neighbors(id).unwrap_or_default();
            edges += neighbors.len();
            min_out = min_out.min(neighbors.len());
            max_out = max_out.max(neighbors.len());
            for edge in &neighbors {
                if let Some(count) = in_degree.get_mut(edge.id as usize - 1) {
                    *count += 1;
                }
            }
        }
        let zero_in_degree = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(idx, _)| idx as ObjectId + 1)
            .collect();
        Self {
            node_count: n,
            edge_count: edges,
            average_out_degree: if n == 0 { 0.0 } else { edges as f64 / n as f64 },
            min_out_degree: if n == 0 { 0 } else { min_out },
            max_out_degree: max_out,
            min_in_degree: in_degree.iter().copied().min().unwrap_or(0),
            max_in_degree: in_degree.iter().copied().max().unwrap_or(0),
            zero_in_degree,
            graph_quality: None,
        }
    }

    /// Statistics plus graph quality against `top_list`, where row `i` holds
    /// the 0-based ids of object `i + 1`'s exact neighbors, closest first.
    pub fn with_top_list(index: &Index, top_list: &[Vec<u32>]) -> Result<Self> {
        let n = index.node_count();
        if top_list.len() < n {
            return Err(IndexError::invalid(
                "top_list",
                format!("{} rows for {n} nodes", top_list.len()),
            ));
        }
        let (mut perfect, mut total) = (0u64, 0u64);
        for id in 1..=n as ObjectId {
            let edges = index.neighbors(id).unwrap_or_default();
            let top = &top_list[id as usize - 1];
            let degree = edges.len().min(top.len());
            let truth: HashSet<u32> = top[..degree].iter().copied().collect();
            total += degree as u64;
            perfect += edges[..degree]
                .iter()
                .filter(|e| truth.contains(&(e.id - 1)))
                .count() as u64;
        }
        let mut stats = Self::compute(index);
        stats.graph_quality = Some(if total == 0 { 0.0 } else { perfect as f64 / total as f64 });
        Ok(stats)
    }
}

impl fmt::Display for GraphStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(quality) = self.graph_quality {
            write!(f, "GQ {quality:.6}, ")?;
        }
        write!(
            f,
            "nodes {}, edges {}, avg degree {:.4}, min_out {}, max_out {}, min_in {}, max_in {}, zero in nodes {}",
            self.node_count,
            self.edge_count,
            self.average_out_degree,
            self.min_out_degree,
            self.max_out_degree,
            self.min_in_degree,
            self.max_in_degree,
            self.zero_in_degree.len()
        )
    }
}

/// Recall and speed at one epsilon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationRow {
    pub epsilon: f32,
    pub recall: f64,
    pub micros_per_query: f64,
    pub average_visited: f64,
}

/// Fraction of `truth` (1-based ids) found in `results`.
pub fn recall(results: &[ObjectDistance], truth: &[ObjectId]) -> f64 {
    if truth.is_empty() {
        return 1.0;
    }
    let expected: HashSet<ObjectId> = truth.iter().copied().collect();
    let hits = results.iter().filter(|r| expected.contains(&r.id)).count();
    hits as f64 / truth.len() as f64
}

/// Run every query at every epsilon and compare the top `k` against the
/// 0-based `ground_truth`.
pub fn evaluate(
    index: &Index,
    queries: &VectorSet,
    ground_truth: &[Vec<u32>],
    k: usize,
    epsilons: &[f32],
) -> Result<Vec<EvaluationRow>> {
    if ground_truth.len() < queries.count {
        return Err(IndexError::invalid(
            "ground_truth",
            format!("{} rows for {} queries", ground_truth.len(), queries.count),
        ));
    }
    if let Some((i, row)) = ground_truth.iter().enumerate().find(|(_, row)| row.len() < k) {
        return Err(IndexError::invalid(
            "ground_truth",
            format!("row {i} has {} ids, fewer than k = {k}", row.len()),
        ));
    }
    let truth = ground_truth
        .iter()
        .take(queries.count)
        .enumerate()
        .map(|(i, row)| {
            row[..k]
                .iter()
                .map(|&id| {
                    id.checked_add(1).ok_or_else(|| {
                        IndexError::invalid("ground_truth", format!("row {i} holds out-of-range id {id}"))
                    })
                })
                .collect::<Result<Vec<ObjectId>>>()
        })
        .collect::<Result<Vec<_>>>()?;

    let mut rows = Vec::with_capacity(epsilons.len());
    for &epsilon in epsilons {
        let (mut total_recall, mut visited) = (0.0f64, 0usize);
        let started = Instant::now();
        for (vector, expected) in queries.iter().zip(&truth) {
            let result = index.search_with(&SearchQuery::new(vector, k).with_epsilon(epsilon))?;
            visited += result.visited;
            total_recall += recall(&result.results, expected);
        }
        let count = queries.count.max(1) as f64;
        let row = EvaluationRow {
            epsilon,
            recall: total_recall / count,
            micros_per_query: started.elapsed().as_secs_f64() * 1e6 / count,
            average_visited: visited as f64 / count,
        };
        tracing::info!(
            "epsilon {:+.3}, recall {:.4}, time_us_per_query {:.1}",
            row.epsilon,
            row.recall,
            row.micros_per_query
        );
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Property;

    fn four_points() -> Index {
        let index = Index::new(Property::new(2).with_edge_size_for_creation(2)).unwrap();
        for point in [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [10.0, 10.0]] {
            index.append(&point).unwrap();
        }
        index.create_index(1).unwrap();
        index
    }

    #[test]
    fn test_degree_statistics() {
        // 1 -> {2,3}, 2 -> {1,3}, 3 -> {1,2}, 4 -> {2,3}
        let stats = GraphStatistics::compute(&four_points());
        assert_eq!(stats.node_count, 4);
        assert_eq!(stats.edge_count, 8);
        assert_eq!(stats.min_out_degree, 2);
        assert_eq!(stats.max_out_degree, 2);
        assert_eq!(stats.min_in_degree, 0);
        assert_eq!(stats.max_in_degree, 3);
        assert_eq!(stats.zero_in_degree, vec![4]);
        assert!((stats.average_out_degree - 2.0).abs() < 1e-9);
        assert!(stats.graph_quality.is_none());
    }

    #[test]
    fn test_graph_quality() {
        let index = four_points();
        // exact lists, 0-based: node 4's true neighbors are 1 and 2 (ids 2, 3)
        let top = vec![vec![1, 2, 3], vec![0, 2, 3], vec![0, 1, 3], vec![1, 2, 0]];
        let stats = GraphStatistics::with_top_list(&index, &top).unwrap();
        assert_eq!(stats.graph_quality, Some(1.0));

        let skewed = vec![vec![3, 2], vec![0, 2], vec![0, 1], vec![1, 2]];
        let stats = GraphStatistics::with_top_list(&index, &skewed).unwrap();
        assert_eq!(stats.graph_quality, Some(7.0 / 8.0));
        assert!(stats.to_string().starts_with("GQ 0.875000"));

        assert!(GraphStatistics::with_top_list(&index, &top[..2]).is_err());
    }

    #[test]
    fn test_recall() {
        let results = [ObjectDistance::new(1, 0.0), ObjectDistance::new(5, 1.0)];
        assert_eq!(recall(&results, &[1, 2]), 0.5);
        assert_eq!(recall(&results, &[]), 1.0);
    }

    #[test]
    fn test_evaluate_sweep() {
        let index = four_points();
        let queries = VectorSet {
            dimension: 2,
            count: 2,
            data: vec![0.1, 0.0, 9.0, 9.0],
        };
        let truth = vec![vec![0, 1], vec![3, 1]];
        let rows = evaluate(&index, &queries, &truth, 1, &[0.1, 0.5]).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.recall == 1.0));

        assert!(evaluate(&index, &queries, &truth[..1], 1, &[0.1]).is_err());
        assert!(evaluate(&index, &queries, &truth, 3, &[0.1]).is_err());

        let malformed = vec![vec![0, 1], vec![u32::MAX, 1]];
        assert!(matches!(
            evaluate(&index, &queries, &malformed, 1, &[0.1]),
            Err(IndexError::InvalidConfiguration { field: "ground_truth", .. })
        ));
    }
}

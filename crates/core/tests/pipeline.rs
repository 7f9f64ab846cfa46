//! End-to-end properties of the ANNG -> RNNG -> ONNG pipeline.

use onng_core::graph::{
    GraphKind, GraphOptimizer, Index, ObjectId, OptimizerOptions, Property, RefineOptions,
    SearchQuery,
};
use onng_core::stats::{recall, GraphStatistics};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..dim).map(|_| rng.gen::<f32>()).collect())
        .collect()
}

fn build(vectors: &[Vec<f32>], property: Property, threads: usize) -> Index {
    let index = Index::new(property).unwrap();
    for v in vectors {
        index.append(v).unwrap();
    }
    index.create_index(threads).unwrap();
    index
}

fn adjacency(index: &Index) -> Vec<Vec<ObjectId>> {
    (1..=index.node_count() as ObjectId)
        .map(|id| index.neighbors(id).unwrap().iter().map(|e| e.id).collect())
        .collect()
}

/// Mean recall@k of graph search against exhaustive search.
fn measured(index: &Index, queries: &[Vec<f32>], k: usize, epsilon: f32) -> (f64, usize) {
    let (mut total, mut visited) = (0.0, 0);
    for q in queries {
        let truth: Vec<ObjectId> = index.linear_search(q, k).unwrap().iter().map(|r| r.id).collect();
        let result = index
            .search_with(&SearchQuery::new(q, k).with_epsilon(epsilon))
            .unwrap();
        total += recall(&result.results, &truth);
        visited += result.visited;
    }
    (total / queries.len() as f64, visited)
}

// ── Construction ──

#[test]
fn test_out_degree_never_exceeds_edge_size() {
    let vectors = random_vectors(400, 6, 1);
    let property = Property::new(6)
        .with_edge_size_for_creation(8)
        .with_batch_size_for_creation(64);
    let index = build(&vectors, property, 4);
    for (idx, edges) in adjacency(&index).iter().enumerate() {
        assert!(edges.len() <= 8, "node {} has {} edges", idx + 1, edges.len());
    }
}

#[test]
fn test_edges_independent_of_thread_count() {
    let vectors = random_vectors(300, 5, 2);
    let property = Property::new(5)
        .with_edge_size_for_creation(6)
        .with_batch_size_for_creation(32);
    let single = build(&vectors, property.clone(), 1);
    let parallel = build(&vectors, property, 4);
    assert_eq!(adjacency(&single), adjacency(&parallel));
}

#[test]
fn test_search_during_construction_sees_valid_graph() {
    let vectors = random_vectors(600, 4, 3);
    let index = Index::new(
        Property::new(4)
            .with_edge_size_for_creation(6)
            .with_batch_size_for_creation(40),
    )
    .unwrap();
    for v in &vectors[..100] {
        index.append(v).unwrap();
    }
    index.create_index(2).unwrap();
    for v in &vectors[100..] {
        index.append(v).unwrap();
    }

    std::thread::scope(|scope| {
        let builder = scope.spawn(|| index.create_index(3));
        for q in vectors.iter().take(200) {
            let hits = index.search(q, 5, 0.1).unwrap();
            assert!(hits.iter().all(|h| h.id >= 1 && h.id as usize <= vectors.len()));
            assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
        }
        builder.join().unwrap().unwrap();
    });
    assert_eq!(index.indexed_count(), vectors.len());
}

// ── Search ──

#[test]
fn test_four_point_scenario() {
    let index = Index::new(Property::new(2).with_edge_size_for_creation(2)).unwrap();
    for point in [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [10.0, 10.0]] {
        index.append(&point).unwrap();
    }
    index.create_index(1).unwrap();
    assert!(!adjacency(&index)[0].contains(&4));

    let hits = index.search(&[0.0, 0.0], 1, 0.1).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, 1);
    assert_eq!(hits[0].distance, 0.0);

    index
        .refine(&RefineOptions::with_edge_size(2).with_force_bidirectional(true))
        .unwrap();
    let stats = GraphStatistics::compute(&index);
    assert!(stats.zero_in_degree.is_empty(), "zero in-degree: {:?}", stats.zero_in_degree);
}

#[test]
fn test_full_recall_at_generous_epsilon() {
    let vectors = random_vectors(250, 3, 4);
    let index = build(&vectors, Property::new(3).with_edge_size_for_creation(10), 2);
    let queries = random_vectors(30, 3, 40);
    let (r, _) = measured(&index, &queries, 10, 1.0);
    assert_eq!(r, 1.0);
}

#[test]
fn test_larger_epsilon_never_hurts() {
    let vectors = random_vectors(800, 8, 5);
    let index = build(
        &vectors,
        Property::new(8)
            .with_edge_size_for_creation(5)
            .with_batch_size_for_creation(100),
        2,
    );
    let queries = random_vectors(60, 8, 50);
    let mut previous = (0.0, 0usize);
    for epsilon in [0.0, 0.2, 1.0, 3.0] {
        let (r, visited) = measured(&index, &queries, 10, epsilon);
        assert!(r >= previous.0, "recall dropped to {r} at epsilon {epsilon}");
        assert!(visited >= previous.1, "visited dropped to {visited} at epsilon {epsilon}");
        previous = (r, visited);
    }
}

#[test]
fn test_every_object_finds_itself() {
    let vectors = random_vectors(200, 4, 6);
    let index = build(&vectors, Property::new(4).with_edge_size_for_creation(8), 1);
    for (idx, v) in vectors.iter().enumerate().step_by(7) {
        let hits = index.search(v, 1, 0.2).unwrap();
        assert_eq!(hits[0].id, idx as ObjectId + 1);
        assert_eq!(hits[0].distance, 0.0);
    }
}

// ── Refinement and optimization ──

#[test]
fn test_refinement_reaches_fixed_point() {
    let vectors = random_vectors(300, 4, 7);
    let index = build(&vectors, Property::new(4).with_edge_size_for_creation(8), 2);
    let options = RefineOptions::with_edge_size(8).with_thread_count(4);
    let first = index.refine(&options).unwrap();
    assert!(first.converged);
    let refined = adjacency(&index);

    let second = index.refine(&options).unwrap();
    assert_eq!(second.rounds, 1);
    assert_eq!(adjacency(&index), refined);
}

#[test]
fn test_full_pipeline_keeps_recall() {
    let vectors = random_vectors(300, 3, 8);
    let index = build(&vectors, Property::new(3).with_edge_size_for_creation(12), 2);
    index.refine(&RefineOptions::with_edge_size(12)).unwrap();

    let options = OptimizerOptions::default()
        .with_edges(8, 16)
        .with_sampling(40, 10)
        .with_target_accuracy(0.9, 0.05)
        .with_accuracy_table_generation(true)
        .with_thread_count(3);
    let report = GraphOptimizer::new(options).unwrap().optimize(&index).unwrap();
    let property = index.property();
    assert_eq!(property.graph_kind, GraphKind::Onng);
    assert_eq!(property.default_epsilon, report.chosen_epsilon);
    assert!(report.chosen_epsilon.is_some());
    assert!(!property.accuracy_table.is_empty());
    assert!(property.accuracy_table.windows(2).all(|w| w[0].epsilon < w[1].epsilon));

    let queries = random_vectors(25, 3, 80);
    let (r, _) = measured(&index, &queries, 5, 1.0);
    assert_eq!(r, 1.0);

    // default epsilon and expected accuracy both resolve without an explicit epsilon
    let q = &queries[0];
    assert_eq!(index.search_with(&SearchQuery::new(q, 5)).unwrap().results.len(), 5);
    let by_accuracy = SearchQuery::new(q, 5).with_expected_accuracy(0.9);
    assert_eq!(index.search_with(&by_accuracy).unwrap().results.len(), 5);
}

#[test]
fn test_optimizer_is_deterministic() {
    let vectors = random_vectors(200, 4, 9);
    let options = OptimizerOptions::default()
        .with_edges(6, 12)
        .with_sampling(20, 5)
        .with_search_parameter_optimization(false);
    let a = build(&vectors, Property::new(4), 1);
    let b = build(&vectors, Property::new(4), 1);
    GraphOptimizer::new(options.clone().with_thread_count(1)).unwrap().optimize(&a).unwrap();
    GraphOptimizer::new(options.with_thread_count(4)).unwrap().optimize(&b).unwrap();
    assert_eq!(adjacency(&a), adjacency(&b));
}

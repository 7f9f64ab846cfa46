//! ANN Benchmark: SIFT (L2) through the whole ANNG -> RNNG -> ONNG pipeline.
//! Measures Recall@10 and latency per epsilon against the shipped ground truth.
//!
//! Usage: cargo bench --bench ann_sift
//!
//! Expects `sift_base.fvecs`, `sift_query.fvecs` and `sift_groundtruth.ivecs`
//! under `benchmarks/data` (override with `ONNG_BENCH_DATA`).

use onng_core::graph::{GraphOptimizer, Index, OptimizerOptions, Property, RefineOptions};
use onng_core::stats::{evaluate, GraphStatistics};
use onng_core::storage::{read_fvecs, read_ivecs};
use std::path::PathBuf;
use std::time::Instant;

const DEFAULT_DATA_DIR: &str = "benchmarks/data";
const EDGE_SIZE: usize = 100;
const OUTGOING: usize = 10;
const INCOMING: usize = 120;
const K: usize = 10;
const EPSILONS: &[f32] = &[-0.03, -0.02, -0.01, 0.0, 0.01, 0.02, 0.03, 0.05, 0.1];

fn main() {
    println!("=== ANN Benchmark: SIFT (L2) ===");
    println!();

    let dir = PathBuf::from(std::env::var("ONNG_BENCH_DATA").unwrap_or_else(|_| DEFAULT_DATA_DIR.into()));
    let base_path = dir.join("sift_base.fvecs");
    if !base_path.exists() {
        println!("No dataset at {}; skipping.", base_path.display());
        return;
    }
    let threads = std::thread::available_parallelism().map_or(1, |n| n.get());

    print!("Loading base vectors...");
    let base = read_fvecs(&base_path).unwrap_or_else(|e| panic!("Cannot read {base_path:?}: {e}"));
    println!(" {} vectors x {}d", base.count, base.dimension);

    print!("Loading queries...");
    let queries = read_fvecs(dir.join("sift_query.fvecs")).expect("query vectors");
    println!(" {} queries", queries.count);

    print!("Loading ground truth...");
    let truth = read_ivecs(dir.join("sift_groundtruth.ivecs")).expect("ground truth");
    println!(" top-{} per query", truth.first().map_or(0, Vec::len));

    // === Build ===
    println!();
    println!("--- ANNG construction (edge size {EDGE_SIZE}, {threads} threads) ---");
    let property = Property::new(base.dimension)
        .with_edge_size_for_creation(EDGE_SIZE)
        .with_thread_pool_size(threads);
    let index = Index::new(property).expect("valid property");
    index.append_all(&base.data).expect("append");
    let t0 = Instant::now();
    index.create_index(threads).expect("create_index");
    let elapsed = t0.elapsed().as_secs_f64();
    println!(
        "  Build time: {elapsed:.2}s ({:.0} inserts/s)",
        base.count as f64 / elapsed
    );
    println!("  {}", GraphStatistics::compute(&index));

    println!();
    println!("--- RNNG refinement ---");
    let t0 = Instant::now();
    let report = index
        .refine(&RefineOptions::with_edge_size(EDGE_SIZE).with_thread_count(threads))
        .expect("refine");
    println!(
        "  {} rounds, {} -> {} edges in {:.2}s",
        report.rounds,
        report.edges_before,
        report.edges_after,
        t0.elapsed().as_secs_f64()
    );

    println!();
    println!("--- ONNG optimization (out {OUTGOING}, in {INCOMING}) ---");
    let options = OptimizerOptions::default()
        .with_edges(OUTGOING, INCOMING)
        .with_thread_count(threads);
    let t0 = Instant::now();
    let report = GraphOptimizer::new(options)
        .expect("valid options")
        .optimize(&index)
        .expect("optimize");
    println!(
        "  {} -> {} edges ({} shortcuts), default epsilon {:?} in {:.2}s",
        report.edges_before,
        report.edges_after,
        report.shortcuts_removed,
        report.chosen_epsilon,
        t0.elapsed().as_secs_f64()
    );
    println!("  {}", GraphStatistics::compute(&index));

    // === Query sweep ===
    println!();
    println!("    epsilon | Recall@10 | Avg latency | Avg visited");
    println!("  ----------+-----------+-------------+------------");
    let rows = evaluate(&index, &queries, &truth, K, EPSILONS).expect("evaluate");
    for row in rows {
        println!(
            "  {:>+9.3} | {:.4}    | {:>8.1} us | {:>10.1}",
            row.epsilon, row.recall, row.micros_per_query, row.average_visited
        );
    }

    println!();
    println!("=== Benchmark complete ===");
}

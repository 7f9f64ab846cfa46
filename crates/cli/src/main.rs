use clap::{Args, Parser, Subcommand};
use onng_core::config;
use onng_core::graph::{
    DistanceKind, GraphOptimizer, Index, ObjectType, OptimizerOptions, Property, RefineOptions,
    SearchQuery,
};
use onng_core::stats::{evaluate, GraphStatistics};
use onng_core::storage::{read_fvecs, read_ivecs};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "onng", version, about = "Graph-based approximate nearest neighbor indexes")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build an ANNG from an fvecs file
    Create(CreateArgs),
    /// Refine an index into an RNNG
    Refine(RefineArgs),
    /// Reshape an index into an ONNG and write it to a new file
    Reconstruct(ReconstructArgs),
    /// Search an index with every vector of an fvecs file
    Search(SearchArgs),
    /// Sweep epsilon against ground truth and report recall and latency
    Evaluate(EvaluateArgs),
    /// Print degree statistics and, given a top list, graph quality
    Stats(StatsArgs),
}

#[derive(Args)]
struct CreateArgs {
    /// Output index file
    index: PathBuf,
    /// Base vectors (fvecs)
    data: PathBuf,
    /// Distance function: l1, l2, cosine, angle
    #[arg(short = 'D', long, default_value = "l2")]
    distance: DistanceKind,
    /// Object type: float, uint8
    #[arg(short, long, default_value = "float")]
    object_type: ObjectType,
    /// Edges per node during construction
    #[arg(short = 'E', long, default_value_t = config::DEFAULT_EDGE_SIZE_FOR_CREATION)]
    edge_size: usize,
    /// Edges explored per node during search (0 = all)
    #[arg(short = 'S', long, default_value_t = config::DEFAULT_EDGE_SIZE_FOR_SEARCH)]
    edge_size_for_search: usize,
    /// Exploration coefficient used while linking new objects
    #[arg(long, default_value_t = config::DEFAULT_INSERTION_RADIUS_COEFFICIENT)]
    insertion_radius_coefficient: f32,
    /// Objects linked against the same graph state
    #[arg(short, long, default_value_t = config::DEFAULT_BATCH_SIZE_FOR_CREATION)]
    batch_size: usize,
    /// Seed nodes per search
    #[arg(long, default_value_t = config::DEFAULT_SEED_SIZE)]
    seed_size: usize,
    /// Worker threads
    #[arg(short, long, default_value_t = config::DEFAULT_THREAD_POOL_SIZE)]
    threads: usize,
    /// Only read this many vectors (0 = all)
    #[arg(short = 'n', long, default_value_t = 0)]
    limit: usize,
}

#[derive(Args)]
struct RefineArgs {
    /// Index file, rewritten unless --output is given
    index: PathBuf,
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Degree kept by pruning (defaults to the index's creation edge size)
    #[arg(short = 'E', long)]
    edge_size: Option<usize>,
    /// Skip adding reverse edges
    #[arg(long)]
    no_bidirectional: bool,
    /// Out-degree cap once reverse edges are added
    #[arg(long)]
    reverse_edge_limit: Option<usize>,
    #[arg(long, default_value_t = config::REFINE_MAX_ITERATIONS)]
    max_iterations: usize,
    #[arg(short, long, default_value_t = config::DEFAULT_THREAD_POOL_SIZE)]
    threads: usize,
}

#[derive(Args)]
struct ReconstructArgs {
    /// Source index, never modified
    input: PathBuf,
    /// Destination index
    output: PathBuf,
    #[arg(short = 'o', long, default_value_t = config::DEFAULT_NUM_OF_OUTGOING_EDGES)]
    outgoing: usize,
    #[arg(short = 'i', long, default_value_t = config::DEFAULT_NUM_OF_INCOMING_EDGES)]
    incoming: usize,
    /// Keep shortcut edges
    #[arg(long)]
    no_shortcut_reduction: bool,
    /// Skip the epsilon sweep
    #[arg(long)]
    no_search_optimization: bool,
    /// Store the sweep as the index's accuracy table
    #[arg(long)]
    accuracy_table: bool,
    #[arg(long, default_value_t = config::DEFAULT_SHORTCUT_MARGIN)]
    margin: f32,
    #[arg(long, default_value_t = config::DEFAULT_TARGET_ACCURACY)]
    target_accuracy: f32,
    #[arg(long, default_value_t = config::DEFAULT_GT_EPSILON)]
    gt_epsilon: f32,
    /// Sampled objects used as queries
    #[arg(long, default_value_t = config::DEFAULT_NUM_OF_QUERIES)]
    queries: usize,
    /// Results per sampled query
    #[arg(long, default_value_t = config::DEFAULT_NUM_OF_RESULTS)]
    results: usize,
    #[arg(long, default_value_t = 0)]
    min_edges: usize,
    #[arg(short, long, default_value_t = config::DEFAULT_THREAD_POOL_SIZE)]
    threads: usize,
}

#[derive(Args)]
struct SearchArgs {
    index: PathBuf,
    /// Query vectors (fvecs)
    queries: PathBuf,
    #[arg(short = 'n', long, default_value_t = 20)]
    size: usize,
    /// Exploration coefficient (defaults to the index's tuned value)
    #[arg(short, long)]
    epsilon: Option<f32>,
    /// Target recall, resolved through the accuracy table
    #[arg(short = 'a', long)]
    expected_accuracy: Option<f32>,
    #[arg(short, long)]
    radius: Option<f32>,
    /// Print only the summary line
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Args)]
struct EvaluateArgs {
    index: PathBuf,
    /// Query vectors (fvecs)
    queries: PathBuf,
    /// Exact neighbors, 0-based (ivecs)
    ground_truth: PathBuf,
    #[arg(short, long, default_value_t = 10)]
    k: usize,
    /// Comma-separated epsilons to sweep
    #[arg(short, long, value_delimiter = ',', default_values_t = config::DEFAULT_EPSILON_SWEEP.to_vec())]
    epsilons: Vec<f32>,
}

#[derive(Args)]
struct StatsArgs {
    index: PathBuf,
    /// Exact neighbors of every object, 0-based (ivecs)
    #[arg(long)]
    top_list: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("onng=info".parse().expect("valid directive literal"))
                .add_directive("onng_core=info".parse().expect("valid directive literal")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Create(args) => create(args)?,
        Command::Refine(args) => refine(args)?,
        Command::Reconstruct(args) => reconstruct(args)?,
        Command::Search(args) => search(args)?,
        Command::Evaluate(args) => run_evaluation(args)?,
        Command::Stats(args) => stats(args)?,
    }
    Ok(())
}

fn open(path: &Path) -> onng_core::Result<Index> {
    let started = Instant::now();
    let index = Index::open(path)?;
    tracing::info!(
        "Loaded {} ({} objects, {}) in {:.2}s",
        path.display(),
        index.object_count(),
        index.property().graph_kind,
        started.elapsed().as_secs_f64()
    );
    Ok(index)
}

fn create(args: CreateArgs) -> onng_core::Result<()> {
    let mut data = read_fvecs(&args.data)?;
    if args.limit > 0 && args.limit < data.count {
        data.data.truncate(args.limit * data.dimension);
        data.count = args.limit;
    }
    let property = Property::new(data.dimension)
        .with_distance(args.distance)
        .with_object_type(args.object_type)
        .with_edge_size_for_creation(args.edge_size)
        .with_edge_size_for_search(args.edge_size_for_search)
        .with_insertion_radius_coefficient(args.insertion_radius_coefficient)
        .with_batch_size_for_creation(args.batch_size)
        .with_seed_size(args.seed_size)
        .with_thread_pool_size(args.threads);
    let index = Index::new(property)?;
    index.append_all(&data.data)?;

    let started = Instant::now();
    index.create_index(args.threads)?;
    tracing::info!(
        "Indexed {} objects in {:.2}s",
        index.indexed_count(),
        started.elapsed().as_secs_f64()
    );
    index.save(&args.index)
}

fn refine(args: RefineArgs) -> onng_core::Result<()> {
    let index = open(&args.index)?;
    let mut options = match args.edge_size {
        Some(edges) => RefineOptions::with_edge_size(edges),
        None => RefineOptions::for_property(&index.property()),
    }
    .with_force_bidirectional(!args.no_bidirectional)
    .with_max_iterations(args.max_iterations)
    .with_thread_count(args.threads);
    if let Some(limit) = args.reverse_edge_limit {
        options = options.with_reverse_edge_limit(limit);
    }
    let report = index.refine(&options)?;
    println!(
        "rounds {}, converged {}, edges {} -> {}",
        report.rounds, report.converged, report.edges_before, report.edges_after
    );
    index.save(args.output.as_deref().unwrap_or(args.index.as_path()))
}

fn reconstruct(args: ReconstructArgs) -> onng_core::Result<()> {
    let options = OptimizerOptions::default()
        .with_edges(args.outgoing, args.incoming)
        .with_shortcut_reduction(!args.no_shortcut_reduction)
        .with_search_parameter_optimization(!args.no_search_optimization)
        .with_accuracy_table_generation(args.accuracy_table)
        .with_margin(args.margin)
        .with_target_accuracy(args.target_accuracy, args.gt_epsilon)
        .with_sampling(args.queries, args.results)
        .with_min_num_of_edges(args.min_edges)
        .with_thread_count(args.threads);
    let report = GraphOptimizer::new(options)?.execute(&args.input, &args.output)?;
    println!(
        "edges {} -> {}, shortcuts removed {}",
        report.edges_before, report.edges_after, report.shortcuts_removed
    );
    if let Some(epsilon) = report.chosen_epsilon {
        println!("default epsilon {epsilon:+.3}");
    }
    for entry in &report.sweep {
        println!(
            "  epsilon {:+.3}  recall {:.4}  visited {:.1}  {:.1} us",
            entry.epsilon, entry.recall, entry.average_visited, entry.average_latency_us
        );
    }
    Ok(())
}

fn search(args: SearchArgs) -> onng_core::Result<()> {
    let index = open(&args.index)?;
    let queries = read_fvecs(&args.queries)?;
    let started = Instant::now();
    for (no, vector) in queries.iter().enumerate() {
        let mut query = SearchQuery::new(vector, args.size);
        if let Some(epsilon) = args.epsilon {
            query = query.with_epsilon(epsilon);
        }
        if let Some(accuracy) = args.expected_accuracy {
            query = query.with_expected_accuracy(accuracy);
        }
        if let Some(radius) = args.radius {
            query = query.with_radius(radius);
        }
        let result = index.search_with(&query)?;
        if args.quiet {
            continue;
        }
        println!("Query No.{}", no + 1);
        println!("Rank\tID\tDistance");
        for (rank, hit) in result.results.iter().enumerate() {
            println!("{}\t{}\t{:.6}", rank + 1, hit.id, hit.distance);
        }
    }
    let elapsed = started.elapsed().as_secs_f64();
    println!(
        "Average query time (ms)={:.4}",
        elapsed * 1e3 / queries.count.max(1) as f64
    );
    Ok(())
}

fn run_evaluation(args: EvaluateArgs) -> onng_core::Result<()> {
    let index = open(&args.index)?;
    let queries = read_fvecs(&args.queries)?;
    let truth = read_ivecs(&args.ground_truth)?;
    println!("  epsilon | Recall@{:<3}| us/query | visited", args.k);
    for row in evaluate(&index, &queries, &truth, args.k, &args.epsilons)? {
        println!(
            "  {:>+7.3} | {:.4}    | {:>8.1} | {:.1}",
            row.epsilon, row.recall, row.micros_per_query, row.average_visited
        );
    }
    Ok(())
}

fn stats(args: StatsArgs) -> onng_core::Result<()> {
    let index = open(&args.index)?;
    let stats = match &args.top_list {
        Some(path) => GraphStatistics::with_top_list(&index, &read_ivecs(path)?)?,
        None => GraphStatistics::compute(&index),
    };
    println!("{stats}");
    if !stats.zero_in_degree.is_empty() {
        tracing::warn!("{} objects are unreachable by traversal", stats.zero_in_degree.len());
    }
    Ok(())
}

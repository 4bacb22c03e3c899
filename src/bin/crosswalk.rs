//! Command-line entry point for the crosswalk engine

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[cfg(not(feature = "embeddings"))]
use crosswalk::HashEmbedder;
#[cfg(feature = "embeddings")]
use crosswalk::FastEmbedEmbedder;
use crosswalk::{
    open_store, AnalysisCache, CrosswalkEngine, Embedder, EngineConfig, GraphStore,
    InProcessQueue, JobReport, JobStatus, PairOutcome, PrecomputeCoordinator, ResolveConfig,
    SqliteStore, Worker,
};

#[derive(Parser)]
#[command(
    name = "crosswalk",
    version,
    about = "Gap and map analysis across security standards"
)]
struct Cli {
    /// Open the graph at this URL and precompute analyses for every
    /// pair of its standards
    #[arg(long = "preload_map_analysis_target_url", value_name = "URL")]
    preload_map_analysis_target_url: Option<String>,

    /// Drop every cached analysis depending on this resource
    #[arg(long = "delete_map_analysis_for", value_name = "RESOURCE")]
    delete_map_analysis_for: Option<String>,

    /// Delete a node, edge or standard, dropping dependent analyses
    #[arg(long = "delete_resource", value_name = "RESOURCE")]
    delete_resource: Option<String>,

    /// Mirror the primary store into the graph database target
    #[arg(long = "populate_neo4j_db")]
    populate_neo4j_db: bool,

    /// Target URL for --populate_neo4j_db (memory: or sqlite:<path>)
    #[arg(long = "graph_db_url", value_name = "URL")]
    graph_db_url: Option<String>,

    /// Propose related edges from text embedding similarity
    #[arg(long = "generate_embeddings")]
    generate_embeddings: bool,

    /// Run a job worker until interrupted
    #[arg(long = "start_worker")]
    start_worker: bool,

    /// Graph database path
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Analysis cache database path
    #[arg(long = "cache_db", value_name = "PATH")]
    cache_db: Option<PathBuf>,

    /// Maximum number of edges on a mapping path
    #[arg(long = "max_depth", default_value_t = 4)]
    max_depth: usize,

    /// Minimum edge confidence to traverse
    #[arg(long = "min_confidence", default_value_t = 0.5)]
    min_confidence: f32,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn has_operation(&self) -> bool {
        self.preload_map_analysis_target_url.is_some()
            || self.delete_map_analysis_for.is_some()
            || self.delete_resource.is_some()
            || self.populate_neo4j_db
            || self.generate_embeddings
            || self.start_worker
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::new(format!("crosswalk={level}")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn default_data_dir() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    let dir = data_dir.join("crosswalk");
    std::fs::create_dir_all(&dir).ok();
    dir
}

fn default_db_path() -> PathBuf {
    default_data_dir().join("crosswalk.db")
}

fn default_cache_path() -> PathBuf {
    default_data_dir().join("analyses.db")
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    if !cli.has_operation() {
        let _ = Cli::command().print_help();
        return 2;
    }

    let resolve = ResolveConfig::default()
        .with_max_depth(cli.max_depth)
        .with_min_confidence(cli.min_confidence);
    let config = EngineConfig::default().with_resolve(resolve);

    let db = cli.db.clone().unwrap_or_else(default_db_path);
    let cache_db = cli.cache_db.clone().unwrap_or_else(default_cache_path);

    let store: Arc<dyn GraphStore> = match SqliteStore::open(&db) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            eprintln!("Error: failed to open graph database {}: {err}", db.display());
            return 1;
        }
    };
    let cache = match AnalysisCache::open(&cache_db) {
        Ok(cache) => cache,
        Err(err) => {
            eprintln!(
                "Error: failed to open analysis cache {}: {err}",
                cache_db.display()
            );
            return 1;
        }
    };
    let engine = Arc::new(CrosswalkEngine::with_config(store, config.clone()).with_cache(cache));

    let mut failures = 0;
    if let Some(resource) = &cli.delete_map_analysis_for {
        failures += cmd_delete_map_analysis(&engine, resource);
    }
    if let Some(resource) = &cli.delete_resource {
        failures += cmd_delete_resource(&engine, resource).await;
    }
    if cli.populate_neo4j_db {
        failures += cmd_populate_graph_db(&engine, cli.graph_db_url.as_deref()).await;
    }
    if cli.generate_embeddings {
        failures += cmd_generate_embeddings(&engine).await;
    }
    if let Some(url) = &cli.preload_map_analysis_target_url {
        failures += cmd_preload(url, &cache_db, config.clone()).await;
    }
    if cli.start_worker {
        failures += cmd_start_worker(engine).await;
    }

    if failures > 0 {
        1
    } else {
        0
    }
}

fn cmd_delete_map_analysis(engine: &CrosswalkEngine, resource: &str) -> i32 {
    let removed = engine.invalidate_resource(resource);
    println!("Invalidated {removed} cached analyses for '{resource}'");
    0
}

async fn cmd_delete_resource(engine: &Arc<CrosswalkEngine>, resource: &str) -> i32 {
    let (queue, receiver) = InProcessQueue::new();
    let _worker = Worker::new(engine.clone(), receiver).spawn();
    let coordinator = PrecomputeCoordinator::new(engine.clone(), Arc::new(queue));

    let (invalidated, handle) = match coordinator.enqueue_delete_cascade(resource).await {
        Ok(accepted) => accepted,
        Err(err) => {
            eprintln!("Error: {err}");
            return 1;
        }
    };
    println!("Invalidated {invalidated} cached analyses for '{resource}'");

    match handle.wait().await {
        JobStatus::Done(JobReport::Delete(report)) => {
            println!(
                "Deleted {} ({} further analyses invalidated)",
                report.deleted, report.analyses_invalidated
            );
            0
        }
        JobStatus::Failed(message) => {
            eprintln!("Error: {message}");
            1
        }
        other => {
            eprintln!("Error: deletion ended in unexpected status {other:?}");
            1
        }
    }
}

async fn cmd_populate_graph_db(engine: &CrosswalkEngine, url: Option<&str>) -> i32 {
    let Some(url) = url else {
        eprintln!("Error: --populate_neo4j_db requires --graph_db_url");
        return 1;
    };
    let target = match open_store(url) {
        Ok(target) => target,
        Err(err) => {
            eprintln!("Error: {err}");
            return 1;
        }
    };
    match engine.mirror_into(target.as_ref()).await {
        Ok(report) => {
            println!("Mirrored {} nodes and {} edges to {url}", report.nodes, report.edges);
            0
        }
        Err(err) => {
            eprintln!("Error: {err}");
            1
        }
    }
}

#[cfg(feature = "embeddings")]
fn build_embedder() -> Result<Box<dyn Embedder>, String> {
    FastEmbedEmbedder::default_model()
        .map(|embedder| Box::new(embedder) as Box<dyn Embedder>)
        .map_err(|err| err.to_string())
}

#[cfg(not(feature = "embeddings"))]
fn build_embedder() -> Result<Box<dyn Embedder>, String> {
    Ok(Box::new(HashEmbedder::new(384)))
}

async fn cmd_generate_embeddings(engine: &CrosswalkEngine) -> i32 {
    let embedder = match build_embedder() {
        Ok(embedder) => embedder,
        Err(message) => {
            eprintln!("Error: {message}");
            return 1;
        }
    };
    match engine.generate_related_edges(embedder.as_ref()).await {
        Ok(created) => {
            println!("Proposed {created} related edges");
            0
        }
        Err(err) => {
            eprintln!("Error: {err}");
            1
        }
    }
}

async fn cmd_preload(url: &str, cache_db: &Path, config: EngineConfig) -> i32 {
    let store = match open_store(url) {
        Ok(store) => store,
        Err(err) => {
            eprintln!("Error: {err}");
            return 1;
        }
    };
    // Preloaded analyses land in the shared cache file, where later
    // runs find them as long as the graph fingerprint still matches
    let cache = match AnalysisCache::open(cache_db) {
        Ok(cache) => cache,
        Err(err) => {
            eprintln!(
                "Error: failed to open analysis cache {}: {err}",
                cache_db.display()
            );
            return 1;
        }
    };
    let engine = Arc::new(CrosswalkEngine::with_config(store, config).with_cache(cache));

    let (queue, receiver) = InProcessQueue::new();
    let _worker = Worker::new(engine.clone(), receiver).spawn();
    let coordinator = PrecomputeCoordinator::new(engine, Arc::new(queue));

    let handle = match coordinator.enqueue_precompute(Vec::new()).await {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("Error: {err}");
            return 1;
        }
    };

    match handle.wait().await {
        JobStatus::Done(JobReport::Precompute(summary)) => {
            println!(
                "Precomputed {} pairs: {} computed, {} fresh, {} skipped, {} failed",
                summary.pairs(),
                summary.computed,
                summary.fresh,
                summary.skipped_stale,
                summary.failed
            );
            for (pair, outcome) in &summary.outcomes {
                if matches!(outcome, PairOutcome::Failed(_)) {
                    eprintln!("  {pair}: {outcome}");
                }
            }
            if summary.failed > 0 {
                1
            } else {
                0
            }
        }
        JobStatus::Failed(message) => {
            eprintln!("Error: {message}");
            1
        }
        other => {
            eprintln!("Error: precomputation ended in unexpected status {other:?}");
            1
        }
    }
}

async fn cmd_start_worker(engine: Arc<CrosswalkEngine>) -> i32 {
    let (queue, receiver) = InProcessQueue::new();
    let worker = Worker::new(engine, receiver).spawn();
    println!("Worker running; press ctrl-c to stop");

    if let Err(err) = tokio::signal::ctrl_c().await {
        eprintln!("Error: {err}");
        return 1;
    }
    drop(queue);
    let _ = worker.await;
    println!("Worker stopped");
    0
}

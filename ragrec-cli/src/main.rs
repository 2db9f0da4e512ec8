//! ragrec CLI: index item documents, rank candidates for every user through a
//! RAG engine, and score the rankings.

mod startup;

use clap::Parser;
use ragrec_core::config::EngineKind;
use ragrec_core::rag::QueryMode;
use ragrec_core::{Experiment, ExperimentPaths, ExperimentSettings, RagRecConfig};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// ragrec: retrieval-augmented next-item recommendation runner
#[derive(Parser, Debug)]
#[command(name = "ragrec", version, about, long_about = None)]
struct Cli {
    /// Completion model name
    #[arg(long)]
    model: String,

    /// Dataset name (folder under the data root)
    #[arg(long)]
    dataset: String,

    /// Core level of the processed dataset (e.g. 15)
    #[arg(long)]
    core: u32,

    /// Query mode: coldrag or hybrid
    #[arg(long)]
    mode: Option<QueryMode>,

    /// Number of ranked items per user
    #[arg(long)]
    k: Option<usize>,

    /// Candidate list size, selects the candidate file
    #[arg(long = "cand-size", default_value_t = 100)]
    cand_size: usize,

    /// Users dispatched per batch
    #[arg(long = "batch-size")]
    batch_size: Option<usize>,

    /// Maximum queries in flight
    #[arg(long)]
    concurrency: Option<usize>,

    /// Index at most this many item documents (0 means no limit)
    #[arg(long = "index-limit")]
    index_limit: Option<usize>,

    /// Skip the indexing step
    #[arg(long = "skip-index")]
    skip_index: bool,

    /// Predictions output file
    #[arg(long, default_value = "./outputs/preds.json")]
    out: PathBuf,

    /// Root directory holding the datasets
    #[arg(long = "data-root")]
    data_root: Option<PathBuf>,

    /// RAG engine: http or local
    #[arg(long)]
    engine: Option<EngineKind>,

    /// Workspace directory (for .ragrec/config.toml)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only print errors
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    /// Apply command-line overrides on top of the layered configuration.
    fn apply_overrides(&self, config: &mut RagRecConfig) {
        config.completion.model = self.model.clone();
        if let Some(mode) = self.mode {
            config.orchestrator.mode = mode;
        }
        if let Some(k) = self.k {
            config.orchestrator.k = k;
        }
        if let Some(batch_size) = self.batch_size {
            config.orchestrator.batch_size = batch_size;
        }
        if let Some(concurrency) = self.concurrency {
            config.orchestrator.concurrency = concurrency;
        }
        if self.index_limit.is_some() {
            config.ingest.limit = self.index_limit;
        }
        if let Some(root) = &self.data_root {
            config.dataset.data_root = root.clone();
        }
        if let Some(engine) = self.engine {
            config.rag.engine = engine;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "ragrec", "ragrec")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("./logs"));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "ragrec.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| cli.workspace.clone());

    let mut config = ragrec_core::load_config(Some(&workspace), cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    cli.apply_overrides(&mut config);

    for warning in config.validate() {
        warn!("{warning}");
    }

    if cli.print_config {
        println!("{}", config.to_toml_string()?);
        return Ok(());
    }

    let engine = startup::build_engine(&config)?;
    info!(
        engine = engine.name(),
        model = %config.completion.model,
        dataset = %cli.dataset,
        core = cli.core,
        "Starting experiment"
    );

    let paths = ExperimentPaths::new(
        &config.dataset.data_root,
        &cli.dataset,
        cli.core,
        cli.cand_size,
    );
    let settings = ExperimentSettings {
        model: cli.model.clone(),
        dataset: cli.dataset.clone(),
        out: cli.out.clone(),
        skip_index: cli.skip_index,
    };
    let experiment = Experiment::new(
        paths,
        settings,
        engine,
        config.orchestrator.clone(),
        config.ingest.clone(),
    );

    let outcome = experiment.run().await?;
    let k = outcome.report.k;
    let result = outcome.report.result();
    println!(
        "[EVAL] Recall@{k}={:.4}  NDCG@{k}={:.4}  MRR@{k}={:.4}",
        result.recall, result.ndcg, result.mrr
    );
    if let Some(run) = &outcome.run {
        println!(
            "Ranked {} users in {} batches ({} exhausted, {} attempts)",
            run.users, run.batches, run.exhausted, run.attempts
        );
    }
    println!("Evaluation results saved to {}", outcome.eval_path.display());
    Ok(())
}

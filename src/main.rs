//! Wallet Harvester CLI
//!
//! Collects the transactions of every wallet in a list, joined with their
//! smart contract results and logs, into one JSON file per wallet.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use wallet_harvester::artifacts::{validate_artifacts, ArtifactStore};
use wallet_harvester::config::HarvesterConfig;
use wallet_harvester::harvest::EntityHarvester;
use wallet_harvester::orchestrator::{
    discover_worklist, read_wallet_list, HarvestOrchestrator, WorklistOptions,
};
use wallet_harvester::search::SearchClient;

#[derive(Parser)]
#[command(name = "wallet-harvester")]
#[command(version)]
#[command(about = "Bulk wallet transaction harvester", long_about = None)]
struct Cli {
    /// Path to configuration file (optional, uses env vars if not provided)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output directory for wallet artifacts
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest every wallet in a list that has no artifact yet
    Harvest {
        /// The wallets list, one address per line
        #[arg(short, long, default_value = "lists/all_wallets.txt")]
        list: PathBuf,

        /// Randomize the processing order
        #[arg(short, long)]
        shuffle: bool,

        /// Worker pool size (capped at 32)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Check that every JSON artifact parses
    Validate {
        /// Delete artifacts that fail to parse
        #[arg(long)]
        remove: bool,
    },

    /// Show artifact counts
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => HarvesterConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => HarvesterConfig::load().context("Failed to load config from environment")?,
    };

    if let Some(dir) = cli.output_dir {
        config.paths.output_dir = dir;
    }

    match cli.command {
        Commands::Harvest {
            list,
            shuffle,
            workers,
        } => {
            if let Some(workers) = workers {
                config.workers.max_workers = workers;
            }
            cmd_harvest(&config, &list, shuffle).await?;
        }
        Commands::Validate { remove } => {
            cmd_validate(&config, remove)?;
        }
        Commands::Status => {
            cmd_status(&config)?;
        }
    }

    Ok(())
}

async fn cmd_harvest(config: &HarvesterConfig, list: &PathBuf, shuffle: bool) -> Result<()> {
    info!("=== Harvesting Wallets ===");
    info!("Reading {:?}", list);

    // Ensure directories exist
    config.ensure_directories()?;
    let store = ArtifactStore::from_config(&config.paths);
    store
        .ensure_directories()
        .context("Failed to create output directories")?;

    let candidates =
        read_wallet_list(list).with_context(|| format!("Failed to read wallet list {:?}", list))?;
    let processed = store
        .processed_wallets()
        .context("Failed to list existing artifacts")?;

    let options = WorklistOptions {
        reserved_prefix: config.reserved_prefix.clone(),
        shuffle,
    };
    let worklist = discover_worklist(candidates, &processed, &options);
    info!(
        "{} wallets to harvest ({} reserved, {} rejected)",
        worklist.wallets.len(),
        worklist.reserved,
        worklist.rejected
    );

    let client = SearchClient::from_config(config).context("Failed to build HTTP client")?;
    let harvester = Arc::new(EntityHarvester::new(Arc::new(client), store));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, finishing in-flight wallets");
            let _ = shutdown_tx.send(true);
        }
    });

    let orchestrator = HarvestOrchestrator::new(harvester, config.workers.effective())
        .with_shutdown(shutdown_rx);
    let report = orchestrator.run(worklist.wallets).await;

    let failed = report.failed();
    if !failed.is_empty() {
        warn!(
            "{} wallets failed; they have no artifact and will be retried on the next run",
            failed.len()
        );
    }

    Ok(())
}

fn cmd_validate(config: &HarvesterConfig, remove: bool) -> Result<()> {
    info!("=== Validating Artifacts ===");

    let report = validate_artifacts(&config.paths.output_dir, remove)
        .with_context(|| format!("Failed to scan {:?}", config.paths.output_dir))?;

    if report.is_clean() {
        info!("All {} artifacts are valid JSON", report.checked);
    }

    Ok(())
}

fn cmd_status(config: &HarvesterConfig) -> Result<()> {
    info!("=== Harvester Status ===");
    info!("Output directory: {:?}", config.paths.output_dir);

    let store = ArtifactStore::new(&config.paths.output_dir, &config.paths.ignored_subdir);
    let counts = store.counts().context("Failed to scan output directory")?;

    info!("  Harvested wallets: {}", counts.data);
    info!("  Ignored wallets: {}", counts.ignored);
    if counts.other > 0 {
        info!("  Other files: {}", counts.other);
    }

    Ok(())
}

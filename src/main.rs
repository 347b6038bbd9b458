//! Sumi-Frontier main entry point
//!
//! This is the command-line interface for the Sumi-Frontier crawl engine.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use sumi_frontier::config::{load_config_with_hash, Config, ExecutionMode};
use sumi_frontier::crawler::CrawlerBuilder;
use sumi_frontier::output::{load_statistics, print_drain_report, print_statistics};
use sumi_frontier::queue::Frontier;
use sumi_frontier::storage::{open_storage, RunStatus, SqliteStorage, Storage};
use tracing_subscriber::EnvFilter;

/// Sumi-Frontier: a durable crawl scheduler
///
/// Sumi-Frontier drains a crawl frontier through a bounded worker pool,
/// spacing requests per politeness lane, retrying failures with backoff and
/// journaling every change so an interrupted crawl picks up where it stopped.
#[derive(Parser, Debug)]
#[command(name = "sumi-frontier")]
#[command(version = "1.0.0")]
#[command(about = "A durable crawl scheduler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Start a fresh crawl, discarding journaled state
    #[arg(long)]
    fresh: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
        return Ok(());
    }
    if cli.stats {
        return handle_stats(&config);
    }

    let mut runtime = tokio::runtime::Builder::new_multi_thread();
    if config.engine.mode == ExecutionMode::Pooled {
        runtime.worker_threads(config.engine.pool_size);
    } else {
        runtime.worker_threads(1);
    }
    let runtime = runtime
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    runtime.block_on(handle_crawl(config, config_hash, cli.fresh))
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_frontier=info,warn"),
            1 => EnvFilter::new("sumi_frontier=debug,info"),
            2 => EnvFilter::new("sumi_frontier=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config) {
    println!("=== Sumi-Frontier Dry Run ===\n");

    println!("Engine:");
    println!("  Mode: {:?}", config.engine.mode);
    println!("  Pool size: {}", config.engine.pool_size);
    println!("  Max in flight: {}", config.engine.max_in_flight);
    println!("  Max idle wait: {}ms", config.engine.max_idle_wait_ms);
    println!("  Unroutable tasks: {:?}", config.engine.on_unroutable);

    println!("\nPoliteness:");
    println!("  Default interval: {}ms", config.politeness.default_interval_ms);
    match config.politeness.default_max_concurrent {
        Some(max) => println!("  Default max concurrent: {}", max),
        None => println!("  Default max concurrent: unbounded"),
    }
    for lane in &config.politeness.lanes {
        println!(
            "  - lane {} ({}ms, max concurrent {})",
            lane.name,
            lane.interval_ms,
            lane.max_concurrent
                .map(|max| max.to_string())
                .unwrap_or_else(|| "unbounded".to_string())
        );
    }

    println!("\nRetry:");
    println!("  Max attempts: {}", config.retry.max_attempts);
    println!(
        "  Backoff: {}ms doubling up to {}ms",
        config.retry.base_delay_ms, config.retry.max_delay_ms
    );
    if !config.retry.dead_letter_on.is_empty() {
        println!("  Dead-letter immediately on: {:?}", config.retry.dead_letter_on);
    }

    println!("\nPersistence:");
    println!("  Database: {}", config.persistence.database_path);
    println!(
        "  Checkpoint every {} events or {}s",
        config.persistence.checkpoint_every, config.persistence.checkpoint_interval_secs
    );

    println!("\nUser Agent:");
    println!("  {}", config.user_agent.header_value());

    println!("\nCrawl:");
    println!("  Max depth: {}", config.crawl.max_depth);
    println!("  Same host only: {}", config.crawl.same_host_only);
    println!("  HTTPS only: {}", config.crawl.https_only);

    println!("\nSeeds ({}):", config.seeds.len());
    for seed in &config.seeds {
        println!("  - {} ({})", seed.url, seed.routing_hint());
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Would start crawling with {} seed URLs", config.seeds.len());
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.persistence.database_path);

    let storage = SqliteStorage::new(Path::new(&config.persistence.database_path))?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, config_hash: String, fresh: bool) -> anyhow::Result<()> {
    let storage = open_storage(Path::new(&config.persistence.database_path))
        .context("failed to open the crawl database")?;

    let mut resuming = false;
    if fresh {
        tracing::info!("Starting fresh crawl (discarding journaled state)");
        storage.clear_crawl_state()?;
    } else if let Some(run) = storage.get_latest_run()? {
        if !run.status.is_resumable() {
            tracing::info!(
                "Run {} already completed; pass --fresh to crawl again",
                run.id
            );
            return Ok(());
        }
        tracing::info!("Resuming run {} ({})", run.id, run.status.to_db_string());
        storage.update_run_status(run.id, RunStatus::Interrupted)?;
        resuming = true;
    }

    let crawler = CrawlerBuilder::from_config(&config)?
        .sqlite(&storage, &config.persistence)
        .build()?;

    let recovery = crawler.recover()?;
    if resuming && (recovery.restored > 0 || !crawler.frontier().is_empty()) {
        tracing::info!(
            "Continuing from journaled state ({} restored, {} requeued)",
            recovery.restored,
            recovery.requeued
        );
    } else {
        tracing::info!("Seeding {} URLs", config.seeds.len());
        for seed in &config.seeds {
            crawler.seed_str(&seed.url, seed.routing_hint())?;
        }
    }

    let run_id = storage.create_run(&config_hash)?;

    tokio::select! {
        result = crawler.run_until_drained() => match result {
            Ok(report) => {
                crawler.checkpoint()?;
                storage.complete_run(run_id)?;
                tracing::info!("Crawl completed successfully");
                print_drain_report(&report);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Crawl failed: {}", e);
                storage.update_run_status(run_id, RunStatus::Failed)?;
                Err(e.into())
            }
        },
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            tracing::warn!("Interrupted; journaled state will be resumed on the next run");
            storage.update_run_status(run_id, RunStatus::Interrupted)?;
            Ok(())
        }
    }
}

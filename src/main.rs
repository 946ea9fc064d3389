//! Sumi-Spindle main entry point
//!
//! This is the command-line interface for the Sumi-Spindle crawl scheduler.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use sumi_spindle::config::{load_config_with_hash, Config};
use sumi_spindle::crawler::{configured_spiders, history_report, Engine};
use tracing_subscriber::EnvFilter;

/// Sumi-Spindle: a multi-spider crawl scheduler
///
/// Runs every spider declared in the configuration under one global
/// concurrency limit, skipping pages that succeeded in earlier runs and
/// retrying failed ones once.
#[derive(Parser, Debug)]
#[command(name = "sumi-spindle")]
#[command(version = "1.0.0")]
#[command(about = "A multi-spider crawl scheduler", long_about = None)]
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

    /// Ignore success and failure history from earlier runs
    #[arg(long)]
    fresh: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show durable history counts per spider and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    if cli.fresh {
        config.history.success_inherit = false;
        config.history.failure_inherit = false;
    }

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_crawl(&config).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_spindle=info,warn"),
            1 => EnvFilter::new("sumi_spindle=debug,info"),
            2 => EnvFilter::new("sumi_spindle=trace,debug"),
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

/// Handles the --dry-run mode: shows what would be crawled
fn handle_dry_run(config: &Config) {
    println!("=== Sumi-Spindle Dry Run ===\n");

    println!("Scheduler:");
    println!("  Global slots: {}", config.scheduler.thread_num);
    println!("  Mode: {:?}", config.scheduler.mode);
    println!("  Proxy rotation: {} min", config.scheduler.proxy_minute);
    println!("  Proxies: {}", config.proxy.proxies.len());

    println!("\nHistory:");
    println!("  Backend: {}", config.history.output);
    println!("  Inherit success: {}", config.history.success_inherit);
    println!("  Inherit failure: {}", config.history.failure_inherit);
    println!("  Flush interval: {}s", config.history.flush_interval_secs);

    println!("\nOutput:");
    println!("  Directory: {}", config.output.dir);
    println!("  Max crawl units: {}", config.pool.max_crawlers);

    println!("\nSpiders ({}):", config.spiders.len());
    for spider in configured_spiders(config) {
        let budget = if spider.limit < 0 {
            format!("{} pages", -spider.limit)
        } else {
            "unlimited".to_string()
        };
        println!("  - {} [{}] ({})", spider.name, spider.sub_name(), budget);
    }
    for entry in &config.spiders {
        for seed in &entry.seeds {
            println!("    * {}", seed);
        }
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows durable history per spider
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("History backend: {}\n", config.history.output);

    let report = history_report(config).context("failed to read history")?;
    println!("{:<24} {:<16} {:>10} {:>10}", "SPIDER", "SUB", "SUCCESS", "FAILURE");
    for row in &report {
        println!(
            "{:<24} {:<16} {:>10} {:>10}",
            row.spider, row.sub_name, row.success, row.failure
        );
    }

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: &Config) -> anyhow::Result<()> {
    let spiders = configured_spiders(config);
    tracing::info!("Spiders: {}", spiders.len());

    let engine = Engine::new(config).context("failed to start engine")?;

    let run = engine.run(spiders);
    tokio::pin!(run);

    // Interrupted runs still flush their history before returning
    let summaries = tokio::select! {
        summaries = &mut run => summaries,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, stopping spiders");
            engine.stop();
            run.await
        }
    };

    for summary in &summaries {
        tracing::info!(
            "{}: {} succeeded, {} failed, {} pending",
            summary.spider,
            summary.success,
            summary.failure,
            summary.pending
        );
    }
    Ok(())
}

// CLI module - command-line argument parsing and handlers
//
// Operational surface of the pipeline:
// - init:    create tables and indexes
// - ingest:  run one ingestion cycle
// - trends:  run one trend cycle (alert gate included)
// - cleanup: remove aged trends and resolved alerts
// - backup:  online copy of the database
// - health:  integrity report
// - stats:   totals and recent activity
// - run:     periodic ingest + trends on an in-process ticker
//
// Exit codes: 0 success, 1 configuration error, 2 storage error,
// 3 cycle completed with per-source errors.

use crate::alerts::{build_sinks, AlertGate};
use crate::config::{Config, TrendConfig, VERSION};
use crate::error::Error;
use crate::ingest::{CycleReport, IngestCoordinator};
use crate::sources::build_adapters;
use crate::store::Store;
use crate::trends::TrendEngine;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const EXIT_OK: u8 = 0;
pub const EXIT_CONFIG: u8 = 1;
pub const EXIT_STORAGE: u8 = 2;
pub const EXIT_PARTIAL: u8 = 3;

/// Trendlens - trend detection over public discussion and feed sources
#[derive(Parser)]
#[command(name = "trendlens")]
#[command(version = VERSION)]
#[command(about = "Ingests public posts and scores trending entities", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the database, tables and indexes
    Init,

    /// Run one ingestion cycle across all enabled sources
    Ingest {
        /// Cap on records fetched per source
        #[arg(long)]
        limit_per_source: Option<usize>,
    },

    /// Run one trend scoring cycle, then the alert gate
    Trends {
        /// Current window in hours
        #[arg(long)]
        window: Option<i64>,

        /// Baseline window in hours
        #[arg(long)]
        baseline: Option<i64>,

        /// Minimum current-window mentions to score an entity
        #[arg(long)]
        min_count: Option<i64>,
    },

    /// Remove trends older than N days and resolved alerts older than 2N days
    Cleanup {
        #[arg(long)]
        days: i64,

        /// Also vacuum the database afterwards
        #[arg(long)]
        vacuum: bool,
    },

    /// Create an online backup of the database
    Backup {
        /// Target path (defaults to a timestamped sibling of the database)
        #[arg(long)]
        to: Option<PathBuf>,
    },

    /// Print the store health report
    Health,

    /// Print totals and recent activity
    Stats,

    /// Run ingest + trends periodically until interrupted
    Run {
        /// Seconds between cycles
        #[arg(long, default_value_t = 900)]
        interval: u64,
    },
}

/// Dispatch a parsed command. Returns the process exit code.
pub async fn run(cli: Cli, config: Config) -> u8 {
    let result = match cli.command {
        Commands::Init => cmd_init(&config),
        Commands::Ingest { limit_per_source } => cmd_ingest(&config, limit_per_source).await,
        Commands::Trends {
            window,
            baseline,
            min_count,
        } => cmd_trends(&config, window, baseline, min_count).await,
        Commands::Cleanup { days, vacuum } => cmd_cleanup(&config, days, vacuum),
        Commands::Backup { to } => cmd_backup(&config, to.as_deref()),
        Commands::Health => cmd_health(&config),
        Commands::Stats => cmd_stats(&config),
        Commands::Run { interval } => cmd_run(&config, interval).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            match e {
                Error::Config(_) => EXIT_CONFIG,
                Error::Storage(_) => EXIT_STORAGE,
                _ => EXIT_PARTIAL,
            }
        }
    }
}

fn open_store(config: &Config) -> crate::error::Result<Store> {
    Store::open(&config.db_path)
}

fn cmd_init(config: &Config) -> crate::error::Result<u8> {
    let _store = open_store(config)?;
    // The retrieval system reads this directory; we only make sure it exists
    std::fs::create_dir_all(&config.chroma_path)?;
    println!("Database initialized: {}", config.db_path.display());
    Ok(EXIT_OK)
}

async fn cmd_ingest(config: &Config, limit_override: Option<usize>) -> crate::error::Result<u8> {
    let store = open_store(config)?;
    let mut ingest_config = config.ingest.clone();
    if let Some(limit) = limit_override {
        ingest_config.limit_per_source = limit;
    }
    let coordinator = IngestCoordinator::new(&store, build_adapters(config), &ingest_config);
    let report = coordinator.run_cycle().await?;
    print_cycle_report(&report);
    Ok(if report.has_errors() {
        EXIT_PARTIAL
    } else {
        EXIT_OK
    })
}

fn print_cycle_report(report: &CycleReport) {
    println!("Ingestion cycle complete");
    for source in &report.sources {
        if !source.enabled {
            println!("  {:<12} disabled", source.name);
            continue;
        }
        println!(
            "  {:<12} fetched {:>4}  ingested {:>4}  skipped {:>3}  errors {}",
            source.name,
            source.fetched,
            source.ingested,
            source.skipped,
            source.errors.len()
        );
        for error in &source.errors {
            println!("    - {error}");
        }
    }
    println!("Duration: {:.1}s", report.duration.as_secs_f64());
}

async fn cmd_trends(
    config: &Config,
    window: Option<i64>,
    baseline: Option<i64>,
    min_count: Option<i64>,
) -> crate::error::Result<u8> {
    let store = open_store(config)?;
    let trend_config = TrendConfig {
        min_count: min_count.unwrap_or(config.trends.min_count),
        window_hours: window.unwrap_or(config.trends.window_hours),
        baseline_hours: baseline.unwrap_or(config.trends.baseline_hours),
    };
    let engine = TrendEngine::new(&store, trend_config);
    let rows = engine.run()?;

    if rows.is_empty() {
        println!("No trending topics found");
    } else {
        let high = rows.iter().filter(|r| r.trend_score >= 2.0).count();
        let viral = rows.iter().filter(|r| r.trend_score >= 3.0).count();
        println!("Computed {} trends ({high} >= 2.0, {viral} >= 3.0)", rows.len());
        println!("Top trending topics:");
        for row in rows.iter().take(10) {
            println!(
                "  {:<24} {:<10} score {:>7.2}  mentions {:>5}  growth {:>6.1}%",
                row.entity,
                row.source_kind.to_string(),
                row.trend_score,
                row.current_count,
                row.growth_rate * 100.0
            );
        }
    }

    let gate = AlertGate::new(&store, config.alerts.clone(), build_sinks(&config.alerts));
    let summary = gate.run(&rows).await;
    if config.alerts.enabled {
        println!(
            "Alerts: {} triggered, {} suppressed by cooldown, {} sink failures",
            summary.triggered, summary.deduplicated, summary.sink_failures
        );
    }

    Ok(if summary.sink_failures > 0 {
        EXIT_PARTIAL
    } else {
        EXIT_OK
    })
}

fn cmd_cleanup(config: &Config, days: i64, vacuum: bool) -> crate::error::Result<u8> {
    if days <= 0 {
        return Err(Error::Config("--days must be positive".into()));
    }
    let store = open_store(config)?;
    let report = store.cleanup_older_than(days)?;
    println!(
        "Cleanup complete: {} trends, {} resolved alerts deleted (kept {days} days)",
        report.trends_deleted, report.alerts_deleted
    );
    if vacuum {
        store.vacuum()?;
        println!("Vacuum complete");
    }
    Ok(EXIT_OK)
}

fn cmd_backup(config: &Config, target: Option<&std::path::Path>) -> crate::error::Result<u8> {
    let store = open_store(config)?;
    let path = store.backup_to(target)?;
    println!("Database backed up to: {}", path.display());
    Ok(EXIT_OK)
}

fn cmd_health(config: &Config) -> crate::error::Result<u8> {
    let store = open_store(config)?;
    let report = store.health()?;
    println!("Database status: {}", report.status);
    if !report.issues.is_empty() {
        println!("Issues:");
        for issue in &report.issues {
            println!("  - {issue}");
        }
    }
    if !report.recommendations.is_empty() {
        println!("Recommendations:");
        for rec in &report.recommendations {
            println!("  - {rec}");
        }
    }
    Ok(if report.ok() { EXIT_OK } else { EXIT_STORAGE })
}

fn cmd_stats(config: &Config) -> crate::error::Result<u8> {
    let store = open_store(config)?;
    let stats = store.stats()?;
    println!("Database statistics");
    println!("  Total posts:        {}", stats.total_posts);
    println!("  With entities:      {}", stats.posts_with_entities);
    println!("  Last 24h:           {}", stats.recent_posts_24h);
    for (source, count) in &stats.source_breakdown {
        println!("    {source:<12} {count}");
    }
    println!("  Trends (24h):       {}", stats.trends_24h);
    println!(
        "  Trend scores:       avg {:.2}, max {:.2} ({} >= 2.0, {} >= 3.0)",
        stats.avg_trend_score,
        stats.max_trend_score,
        stats.high_trends_24h,
        stats.viral_trends_24h
    );
    println!(
        "  Alerts (7d):        {} total, {} active",
        stats.alerts_7d, stats.active_alerts
    );
    println!("  Database size:      {:.2} MB", stats.file_size_mb);

    let mut sinks = vec!["log"];
    if config.alerts.webhook_url.is_some() {
        sinks.push("webhook");
    }
    if config.alerts.email_configured {
        sinks.push("email (external)");
    }
    println!("  Alert sinks:        {}", sinks.join(", "));
    Ok(EXIT_OK)
}

/// Periodic mode: one ingest + trend + alert pass per tick. A tick that
/// arrives while a cycle is still running is dropped, never queued.
async fn cmd_run(config: &Config, interval_secs: u64) -> crate::error::Result<u8> {
    if interval_secs == 0 {
        return Err(Error::Config("--interval must be positive".into()));
    }
    let store = open_store(config)?;
    let mut worst = EXIT_OK;

    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    println!("Running every {interval_secs}s; Ctrl+C to stop");
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted, shutting down");
                return Ok(worst);
            }
        }

        let coordinator = IngestCoordinator::new(&store, build_adapters(config), &config.ingest);
        match coordinator.run_cycle().await {
            Ok(report) => {
                if report.has_errors() {
                    worst = worst.max(EXIT_PARTIAL);
                }
                tracing::info!(
                    ingested = report.total_ingested(),
                    "Scheduled ingestion pass done"
                );
            }
            Err(e @ Error::Storage(_)) => return Err(e),
            Err(e) => {
                tracing::error!("Ingestion pass failed: {e}");
                worst = worst.max(EXIT_PARTIAL);
            }
        }

        let engine = TrendEngine::new(&store, config.trends.clone());
        match engine.run() {
            Ok(rows) => {
                let gate =
                    AlertGate::new(&store, config.alerts.clone(), build_sinks(&config.alerts));
                let summary = gate.run(&rows).await;
                tracing::info!(
                    trends = rows.len(),
                    alerts = summary.triggered,
                    "Scheduled trend pass done"
                );
            }
            Err(e @ Error::Storage(_)) => return Err(e),
            Err(e) => {
                tracing::error!("Trend pass failed: {e}");
                worst = worst.max(EXIT_PARTIAL);
            }
        }
    }
}

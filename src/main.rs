// Trendlens - entity trend detection over public sources
//
// The pipeline ingests short textual items from a discussion-site API and
// syndication feeds, normalizes them into a common post schema, extracts
// entity features, and periodically scores each entity's recent mention
// volume against a longer baseline. Trends crossing configured thresholds
// fire deduplicated alerts.
//
// Architecture:
// - Source adapters (reqwest, feed-rs): bounded, rate-limited fetches
// - Normalizer + FeatureExtractor: canonical posts with entity sets
// - Store (rusqlite): single-writer SQLite with a read pool
// - TrendEngine: two-window z-score trend scoring
// - AlertGate: threshold classification, cooldown dedup, sink fan-out

mod alerts;
mod cli;
mod config;
mod error;
mod features;
mod ingest;
mod normalize;
mod post;
mod sources;
mod store;
mod trends;
mod util;

use clap::Parser;
use config::Config;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = cli::Cli::parse();

    // Configuration errors surface before logging is even up; print them
    // plainly and exit with the config error code
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(cli::EXIT_CONFIG);
        }
    };

    // Precedence: RUST_LOG env var > config file > default "info"
    let default_filter = format!("trendlens={}", config.log_level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::debug!(version = config::VERSION, "Starting trendlens");

    ExitCode::from(cli::run(cli, config).await)
}

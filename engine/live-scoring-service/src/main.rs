//! Live Scoring Production Service
//!
//! Polls SportsDataIO on a fixed interval, rescores every league roster,
//! and keeps leaderboards and notifications current until shutdown.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use live_scoring_service::{
    graceful_shutdown, initialize_logging, load_configuration, setup_signal_handlers, LiveScoringService,
};

#[derive(Parser, Debug)]
#[command(name = "live-scoring")]
#[command(about = "Live fantasy scoring and leaderboard service")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the scoring week
    #[arg(long)]
    week: Option<u32>,

    /// Override the season
    #[arg(long)]
    season: Option<u32>,

    /// Run a single poll pass, flush notifications and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let mut config = load_configuration(args.config.as_deref())?;
    if let Some(week) = args.week {
        config.season.week = week;
    }
    if let Some(season) = args.season {
        config.season.season = season;
    }

    initialize_logging(&config.logging)?;
    info!("Starting Live Scoring Service v{}", env!("CARGO_PKG_VERSION"));

    let shutdown_timeout = Duration::from_secs(config.service.shutdown_timeout_secs);
    let service = LiveScoringService::new(config).context("Failed to initialize service")?;

    if args.once {
        let summary = service.scheduler.trigger_poll().await;
        for outcome in &summary.outcomes {
            info!(
                league_id = %outcome.league_id,
                status = ?outcome.status,
                updates = outcome.updates_committed,
                rank_changes = outcome.rank_changes,
                "Cycle finished"
            );
        }
        let flushed = service.notifications.flush_all().await;
        info!(flushed, duration_ms = summary.duration.as_millis() as u64, "Single poll pass complete");
        return Ok(());
    }

    let mut shutdown = setup_signal_handlers()?;
    info!("Signal handlers configured");

    let handles = service.start(shutdown.clone());

    info!("Live Scoring Service is running. Press Ctrl+C to shutdown gracefully.");
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            warn!("Shutdown channel closed");
            break;
        }
    }

    info!("Shutdown signal received. Initiating graceful shutdown...");
    graceful_shutdown(handles, shutdown_timeout).await;

    let flushed = service.notifications.flush_all().await;
    info!(flushed, "Flushed pending notifications");

    info!("Live Scoring Service shutdown complete");
    Ok(())
}

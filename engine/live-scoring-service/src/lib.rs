//! Live Scoring Production Service Library
//!
//! Configuration, logging, signal handling and the SportsDataIO and roster
//! adapters that run the live scoring engine as a standalone process.

use anyhow::{Context, Result};
use std::path::Path;

pub mod config;
pub mod logging;
pub mod rosters;
pub mod service;
pub mod signals;
pub mod sportsdataio;

pub use config::ServiceConfig;
pub use logging::initialize_logging;
pub use service::LiveScoringService;
pub use signals::{graceful_shutdown, setup_signal_handlers};

/// Load configuration from an optional file and environment variables
pub fn load_configuration(path: Option<&Path>) -> Result<ServiceConfig> {
    config::load_config(path).context("Failed to load service configuration")
}

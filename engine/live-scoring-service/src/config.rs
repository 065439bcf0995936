//! Service configuration management

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use live_scoring::LiveScoringConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Scoring engine configuration
    pub engine: LiveScoringConfig,

    /// Scoring week being polled
    pub season: SeasonConfig,

    /// SportsDataIO stats feed
    pub sportsdataio: SportsDataIoConfig,

    /// League rosters
    pub rosters: RosterFileConfig,

    /// Service-level configuration
    pub service: ServiceSettings,

    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeasonConfig {
    pub season: u32,
    pub week: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SportsDataIoConfig {
    /// Base URL of the NFL API
    pub base_url: String,

    /// Name of the environment variable holding the API key
    pub api_key_env: String,

    /// HTTP request timeout in seconds
    pub timeout_secs: u64,

    /// Retry hint used when a 429 carries no Retry-After header
    pub default_retry_after_secs: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RosterFileConfig {
    /// JSON file with leagues, entrants and lineups
    pub path: PathBuf,

    /// Leagues to poll. Empty means every league in the file.
    pub leagues: Vec<String>,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_secs: u64,

    /// Log every broadcast event at debug level
    pub log_events: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for SeasonConfig {
    fn default() -> Self {
        Self { season: 2025, week: 1 }
    }
}

impl Default for SportsDataIoConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.sportsdata.io/v3/nfl".to_string(),
            api_key_env: "SPORTSDATAIO_API_KEY".to_string(),
            timeout_secs: 30,
            default_retry_after_secs: 60,
        }
    }
}

impl Default for RosterFileConfig {
    fn default() -> Self {
        Self { path: PathBuf::from("./rosters.json"), leagues: Vec::new() }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self { shutdown_timeout_secs: 10, log_events: false }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

impl SportsDataIoConfig {
    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env)
            .with_context(|| format!("Missing SportsDataIO API key in ${}", self.api_key_env))
    }
}

/// Load configuration: engine env overrides, then the optional TOML file,
/// then `LIVE_SCORING__SECTION__KEY` environment variables
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig> {
    let base = ServiceConfig {
        engine: LiveScoringConfig::from_env().context("Invalid engine environment overrides")?,
        ..ServiceConfig::default()
    };

    let mut builder = Config::builder().add_source(Config::try_from(&base).context("Failed to encode defaults")?);

    if let Some(path) = path {
        tracing::debug!("Loading configuration from file: {:?}", path);
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("LIVE_SCORING").separator("__").try_parsing(true));

    let config: ServiceConfig = builder
        .build()
        .context("Failed to build configuration")?
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    validate_config(&config)?;
    Ok(config)
}

/// Validate configuration
fn validate_config(config: &ServiceConfig) -> Result<()> {
    config.engine.validate().context("Invalid engine configuration")?;

    if config.season.week == 0 || config.season.week > 22 {
        anyhow::bail!("Week must be between 1 and 22, got {}", config.season.week);
    }

    if config.sportsdataio.timeout_secs == 0 {
        anyhow::bail!("SportsDataIO timeout must be positive");
    }

    if config.service.shutdown_timeout_secs == 0 {
        anyhow::bail!("Shutdown timeout must be positive");
    }

    Ok(())
}

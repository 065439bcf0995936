//! Configuration for the live scoring engine

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{LiveScoringError, Result};
use crate::scorer::ScoringRules;

/// Configuration for the live scoring engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveScoringConfig {
    /// Poll cycle and scheduler configuration
    pub polling: PollingConfig,

    /// Notification batching and thresholds
    pub notifications: NotificationConfig,

    /// Leaderboard view configuration
    pub leaderboard: LeaderboardConfig,

    /// Fantasy point formula and bonuses
    pub scoring: ScoringRules,
}

/// Poll cycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Interval between poll passes in milliseconds
    pub poll_interval_ms: u64,

    /// Poll duration above which a backpressure warning is logged
    pub backpressure_threshold_ms: u64,

    /// Interval between polling status log lines
    pub status_interval_ms: u64,

    /// Retry hint sent to clients when the stats source is down
    pub unavailable_retry_after_secs: u32,

    /// Retry hint sent to clients when a cycle fails unexpectedly
    pub error_retry_after_secs: u32,

    /// Single-player point gain treated as a touchdown-sized play
    pub touchdown_points_threshold: Decimal,
}

/// Notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Score milestones, ascending
    pub milestones: Vec<Decimal>,

    /// Pending notifications per user before a batch is flushed
    pub max_batch_size: usize,

    /// Periodic flush interval in milliseconds
    pub flush_interval_ms: u64,

    /// Places gained that count as a significant rank improvement
    pub significant_rank_jump: u32,
}

/// Leaderboard view configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderboardConfig {
    /// Page size used when the caller passes none or zero
    pub default_page_size: usize,

    /// How far back to look for an entrant's last score update
    pub recent_update_window_minutes: i64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 30_000,
            backpressure_threshold_ms: 25_000,
            status_interval_ms: 300_000,
            unavailable_retry_after_secs: 60,
            error_retry_after_secs: 30,
            touchdown_points_threshold: dec!(6),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            milestones: vec![dec!(50), dec!(100), dec!(150), dec!(200), dec!(250), dec!(300)],
            max_batch_size: 5,
            flush_interval_ms: 120_000,
            significant_rank_jump: 3,
        }
    }
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self { default_page_size: 25, recent_update_window_minutes: 30 }
    }
}

impl PollingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn backpressure_threshold(&self) -> Duration {
        Duration::from_millis(self.backpressure_threshold_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }
}

impl NotificationConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl LiveScoringConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Ok(interval) = std::env::var("LIVE_SCORING_POLL_INTERVAL_MS") {
            config.polling.poll_interval_ms = interval.parse().unwrap_or(30_000);
        }

        if let Ok(batch_size) = std::env::var("LIVE_SCORING_MAX_BATCH_SIZE") {
            config.notifications.max_batch_size = batch_size.parse().unwrap_or(5);
        }

        if let Ok(flush) = std::env::var("LIVE_SCORING_FLUSH_INTERVAL_MS") {
            config.notifications.flush_interval_ms = flush.parse().unwrap_or(120_000);
        }

        if let Ok(page_size) = std::env::var("LIVE_SCORING_PAGE_SIZE") {
            config.leaderboard.default_page_size = page_size.parse().unwrap_or(25);
        }

        if let Ok(milestones) = std::env::var("LIVE_SCORING_MILESTONES") {
            let parsed: std::result::Result<Vec<Decimal>, _> =
                milestones.split(',').map(|m| m.trim().parse::<Decimal>()).collect();
            match parsed {
                Ok(values) if !values.is_empty() => config.notifications.milestones = values,
                _ => anyhow::bail!("Invalid LIVE_SCORING_MILESTONES: {}", milestones),
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.polling.poll_interval_ms == 0 {
            return Err(LiveScoringError::Configuration("poll interval must be positive".into()));
        }

        if self.notifications.max_batch_size == 0 {
            return Err(LiveScoringError::Configuration("max batch size must be positive".into()));
        }

        if self.leaderboard.default_page_size == 0 {
            return Err(LiveScoringError::Configuration("default page size must be positive".into()));
        }

        if self.notifications.milestones.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(LiveScoringError::Configuration(
                "milestones must be strictly ascending".into(),
            ));
        }

        Ok(())
    }
}

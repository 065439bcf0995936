//! Error types for the live scoring engine

use thiserror::Error;

/// Result type for live scoring operations
pub type Result<T> = std::result::Result<T, LiveScoringError>;

/// Errors that can occur while polling, scoring, ranking or notifying
#[derive(Error, Debug)]
pub enum LiveScoringError {
    #[error("Stats source unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Rate limited by stats source, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u32 },

    #[error("Stats source error: {0}")]
    StatsSource(String),

    #[error("Roster source error: {0}")]
    RosterSource(String),

    #[error("Score store error: {0}")]
    Store(String),

    #[error("Broadcast error: {0}")]
    Broadcast(String),

    #[error("Notification delivery error: {0}")]
    Notification(String),

    #[error("Malformed roster for entrant {entrant_id}: {reason}")]
    MalformedRoster { entrant_id: String, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LiveScoringError {
    /// Retry hint carried by the error, if the upstream supplied one
    pub fn retry_after_secs(&self) -> Option<u32> {
        match self {
            LiveScoringError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

impl From<String> for LiveScoringError {
    fn from(err: String) -> Self {
        LiveScoringError::Internal(err)
    }
}

impl From<&str> for LiveScoringError {
    fn from(err: &str) -> Self {
        LiveScoringError::Internal(err.to_string())
    }
}

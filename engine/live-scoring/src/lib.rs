//! # Live Scoring
//!
//! Live fantasy scoring and leaderboard engine.
//!
//! Each poll cycle pulls the latest player stats, rescores every roster in a
//! league, persists the changes exactly once, re-ranks the league with
//! standard competition ranking, finalizes entrants whose games are all over,
//! and feeds a batched, quiet-hours-aware notification stream.
//!
//! All external systems are reached through the traits in [`ports`]; the
//! [`memory`] module provides in-memory implementations of each.

pub mod config;
pub mod error;
pub mod finalizer;
pub mod leaderboard;
pub mod ledger;
pub mod memory;
pub mod metrics;
pub mod models;
pub mod notifications;
pub mod orchestrator;
pub mod ports;
pub mod ranking;
pub mod scheduler;
pub mod scorer;
pub mod state;

#[cfg(test)]
mod tests;

#[cfg(test)]
mod integration_tests;

pub use config::{LeaderboardConfig, LiveScoringConfig, NotificationConfig, PollingConfig};
pub use error::{LiveScoringError, Result};
pub use leaderboard::{LeaderboardEntry, LeaderboardPage, LeaderboardService, LiveScoreView};
pub use ledger::{ScoreLedger, TouchdownPlay};
pub use metrics::{PollMetrics, PollMetricsSnapshot};
pub use models::{
    EntrantId, GameCompletedEvent, GameId, GameStatus, LeagueId, PlayerId, PlayerStatLine, Position, RankChange,
    RankedEntrant, Roster, RosterSlot, ScoreSnapshot, ScoreStatus, StatRef, UserId,
};
pub use notifications::{DeliveryResult, NotificationEngine, NotificationPreferences};
pub use orchestrator::{CycleOutcome, CycleStatus, EnginePorts, PollOrchestrator};
pub use ports::{
    BroadcastSink, Clock, EntrantDirectory, NotificationSink, PreferenceStore, RosterSource, ScoreStore, StatsSource,
    SystemClock,
};
pub use ranking::rank_entrants;
pub use scheduler::LiveScoringScheduler;
pub use scorer::{RosterScorer, ScoringRules};
pub use state::{LeagueState, LiveScoringState};

/// Current version of the live scoring engine
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

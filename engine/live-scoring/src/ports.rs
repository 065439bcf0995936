//! External collaborators of the live scoring engine
//!
//! Everything the engine reads or writes outside its own caches goes through
//! one of these traits. Production adapters live in the service crate; the
//! in-memory adapters in [`crate::memory`] back tests and local runs.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::Result;
use crate::models::{
    EntrantId, GameCompletedEvent, GameId, GameStatus, LeagueId, PlayerId, PlayerStatLine, RankChange,
    RankedEntrant, Roster, ScoreSnapshot, ScoreStatus, UserId,
};
use crate::notifications::NotificationPreferences;

/// Live game statistics provider
#[async_trait::async_trait]
pub trait StatsSource: Send + Sync {
    /// Cheap health check. `false` means the cycle should be skipped.
    async fn is_available(&self) -> bool;

    /// Ids of games currently in progress
    async fn games_in_progress(&self, week: u32, season: u32) -> Result<Vec<GameId>>;

    /// Stat lines for every player who has recorded stats this week
    async fn live_player_stats(&self, week: u32, season: u32) -> Result<Vec<PlayerStatLine>>;

    /// Stat lines of every player who played in the given game
    async fn final_game_stats(&self, game_id: &str) -> Result<Vec<PlayerStatLine>>;

    /// Status of every game scheduled this week
    async fn game_statuses(&self, week: u32, season: u32) -> Result<HashMap<GameId, GameStatus>>;

    /// Stat lines for specific players this week. Players who have not played are absent.
    async fn player_stats(&self, player_ids: &[PlayerId], week: u32, season: u32) -> Result<Vec<PlayerStatLine>>;
}

/// League membership and lineups
#[async_trait::async_trait]
pub trait RosterSource: Send + Sync {
    async fn active_leagues(&self) -> Result<Vec<LeagueId>>;

    async fn rosters(&self, league_id: &str) -> Result<Vec<Roster>>;
}

/// Authoritative store for score snapshots and entrant status
#[async_trait::async_trait]
pub trait ScoreStore: Send + Sync {
    /// Persist a batch of snapshots in one round-trip
    async fn save_all(&self, snapshots: &[ScoreSnapshot]) -> Result<()>;

    /// Latest persisted score of every entrant in the league
    async fn current_scores(&self, league_id: &str) -> Result<HashMap<EntrantId, Decimal>>;

    /// Number of persisted snapshots per entrant in the league
    async fn update_counts(&self, league_id: &str) -> Result<HashMap<EntrantId, u64>>;

    /// `None` when the entrant has no status yet (treated as LIVE)
    async fn score_status(&self, entrant_id: &str) -> Result<Option<ScoreStatus>>;

    async fn transition_status(&self, entrant_id: &str, status: ScoreStatus) -> Result<()>;

    /// Snapshots for one entrant newer than `since`, newest first
    async fn recent_updates(&self, entrant_id: &str, since: DateTime<Utc>) -> Result<Vec<ScoreSnapshot>>;

    /// Snapshots for a whole league newer than `since`, newest first
    async fn recent_league_updates(&self, league_id: &str, since: DateTime<Utc>) -> Result<Vec<ScoreSnapshot>>;

    async fn is_duplicate(&self, idempotency_key: &str) -> Result<bool>;

    async fn mark_applied(&self, idempotency_key: &str) -> Result<()>;

    async fn last_update_time(&self, entrant_id: &str) -> Result<Option<DateTime<Utc>>>;

    async fn league_last_update_time(&self, league_id: &str) -> Result<Option<DateTime<Utc>>>;

    /// Drop any cached state the store keeps for the league
    async fn clear_cache(&self, league_id: &str) -> Result<()>;
}

/// Real-time fan-out to connected clients
#[async_trait::async_trait]
pub trait BroadcastSink: Send + Sync {
    async fn score_update(&self, snapshot: &ScoreSnapshot) -> Result<()>;

    async fn rank_changes(&self, league_id: &str, changes: &[RankChange]) -> Result<()>;

    async fn leaderboard(&self, league_id: &str, ranked: &[RankedEntrant]) -> Result<()>;

    async fn game_completed(&self, event: &GameCompletedEvent) -> Result<()>;

    async fn delay_warning(&self, league_id: &str, message: &str, retry_after_secs: u32) -> Result<()>;
}

/// Push notification delivery
#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, user_id: &str, title: &str, body: &str, payload: &Value) -> Result<()>;

    async fn schedule(
        &self,
        user_id: &str,
        title: &str,
        body: &str,
        payload: &Value,
        deliver_at_epoch_ms: i64,
    ) -> Result<()>;

    async fn register_device(&self, user_id: &str, device_token: &str, platform: &str) -> Result<()>;
}

/// Per-user notification preferences
#[async_trait::async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn find(&self, user_id: &str) -> Result<Option<NotificationPreferences>>;

    async fn save(&self, preferences: &NotificationPreferences) -> Result<()>;
}

/// Maps entrants to the users who own them
#[async_trait::async_trait]
pub trait EntrantDirectory: Send + Sync {
    async fn user_for_entrant(&self, entrant_id: &str) -> Result<Option<UserId>>;
}

/// Time source
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

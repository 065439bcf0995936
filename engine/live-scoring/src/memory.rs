//! In-memory adapters for every port
//!
//! Used by the tests and by the service when no external store is configured.

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use tokio::sync::{broadcast, Mutex, RwLock};

use crate::error::{LiveScoringError, Result};
use crate::models::{
    EntrantId, GameCompletedEvent, GameId, GameStatus, LeagueId, PlayerId, PlayerStatLine, RankChange,
    RankedEntrant, Roster, ScoreSnapshot, ScoreStatus, UserId,
};
use crate::notifications::NotificationPreferences;
use crate::ports::{
    BroadcastSink, Clock, EntrantDirectory, NotificationSink, PreferenceStore, RosterSource, ScoreStore, StatsSource,
};

/// Score store backed by concurrent maps
#[derive(Debug, Default)]
pub struct InMemoryScoreStore {
    scores: DashMap<LeagueId, HashMap<EntrantId, Decimal>>,
    history: DashMap<EntrantId, Vec<ScoreSnapshot>>,
    statuses: DashMap<EntrantId, ScoreStatus>,
    applied: DashSet<String>,
    save_calls: AtomicUsize,
}

impl InMemoryScoreStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a persisted score directly, bypassing the ledger
    pub fn set_score(&self, league_id: &str, entrant_id: &str, score: Decimal) {
        self.scores.entry(league_id.to_string()).or_default().insert(entrant_id.to_string(), score);
    }

    /// Number of `save_all` round-trips so far
    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::Relaxed)
    }

    /// Every snapshot saved for the entrant, oldest first
    pub fn snapshots_for(&self, entrant_id: &str) -> Vec<ScoreSnapshot> {
        self.history.get(entrant_id).map(|history| history.clone()).unwrap_or_default()
    }

    pub fn snapshot_count(&self) -> usize {
        self.history.iter().map(|entry| entry.len()).sum()
    }
}

#[async_trait::async_trait]
impl ScoreStore for InMemoryScoreStore {
    async fn save_all(&self, snapshots: &[ScoreSnapshot]) -> Result<()> {
        self.save_calls.fetch_add(1, Ordering::Relaxed);
        for snapshot in snapshots {
            self.set_score(&snapshot.league_id, &snapshot.entrant_id, snapshot.new_score);
            self.history.entry(snapshot.entrant_id.clone()).or_default().push(snapshot.clone());
        }
        Ok(())
    }

    async fn current_scores(&self, league_id: &str) -> Result<HashMap<EntrantId, Decimal>> {
        Ok(self.scores.get(league_id).map(|scores| scores.clone()).unwrap_or_default())
    }

    async fn update_counts(&self, league_id: &str) -> Result<HashMap<EntrantId, u64>> {
        Ok(self
            .history
            .iter()
            .filter_map(|entry| {
                let count = entry.iter().filter(|s| s.league_id == league_id).count() as u64;
                (count > 0).then(|| (entry.key().clone(), count))
            })
            .collect())
    }

    async fn score_status(&self, entrant_id: &str) -> Result<Option<ScoreStatus>> {
        Ok(self.statuses.get(entrant_id).map(|status| *status))
    }

    async fn transition_status(&self, entrant_id: &str, status: ScoreStatus) -> Result<()> {
        let mut current = self.statuses.entry(entrant_id.to_string()).or_insert(ScoreStatus::Live);
        if current.is_final() && !status.is_final() {
            return Err(LiveScoringError::Store(format!("entrant {} is already final", entrant_id)));
        }
        *current = status;
        Ok(())
    }

    async fn recent_updates(&self, entrant_id: &str, since: DateTime<Utc>) -> Result<Vec<ScoreSnapshot>> {
        let mut updates: Vec<ScoreSnapshot> = self
            .history
            .get(entrant_id)
            .map(|history| history.iter().filter(|s| s.timestamp >= since).cloned().collect())
            .unwrap_or_default();
        updates.reverse();
        Ok(updates)
    }

    async fn recent_league_updates(&self, league_id: &str, since: DateTime<Utc>) -> Result<Vec<ScoreSnapshot>> {
        let mut updates: Vec<ScoreSnapshot> = self
            .history
            .iter()
            .flat_map(|entry| {
                entry
                    .iter()
                    .filter(|s| s.league_id == league_id && s.timestamp >= since)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        updates.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(updates)
    }

    async fn is_duplicate(&self, idempotency_key: &str) -> Result<bool> {
        Ok(self.applied.contains(idempotency_key))
    }

    async fn mark_applied(&self, idempotency_key: &str) -> Result<()> {
        self.applied.insert(idempotency_key.to_string());
        Ok(())
    }

    async fn last_update_time(&self, entrant_id: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.history.get(entrant_id).and_then(|history| history.last().map(|s| s.timestamp)))
    }

    async fn league_last_update_time(&self, league_id: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .history
            .iter()
            .filter_map(|entry| entry.iter().filter(|s| s.league_id == league_id).map(|s| s.timestamp).max())
            .max())
    }

    async fn clear_cache(&self, _league_id: &str) -> Result<()> {
        Ok(())
    }
}

/// Preference store backed by a concurrent map
#[derive(Debug, Default)]
pub struct InMemoryPreferenceStore {
    preferences: DashMap<UserId, NotificationPreferences>,
}

impl InMemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PreferenceStore for InMemoryPreferenceStore {
    async fn find(&self, user_id: &str) -> Result<Option<NotificationPreferences>> {
        Ok(self.preferences.get(user_id).map(|prefs| prefs.clone()))
    }

    async fn save(&self, preferences: &NotificationPreferences) -> Result<()> {
        self.preferences.insert(preferences.user_id.clone(), preferences.clone());
        Ok(())
    }
}

/// Leagues, rosters and entrant ownership held in memory
#[derive(Debug, Default)]
pub struct InMemoryRosterSource {
    rosters: DashMap<LeagueId, Vec<Roster>>,
    owners: DashMap<EntrantId, UserId>,
}

impl InMemoryRosterSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_rosters(&self, league_id: &str, rosters: Vec<Roster>) {
        self.rosters.insert(league_id.to_string(), rosters);
    }

    pub fn assign_owner(&self, entrant_id: &str, user_id: &str) {
        self.owners.insert(entrant_id.to_string(), user_id.to_string());
    }
}

#[async_trait::async_trait]
impl RosterSource for InMemoryRosterSource {
    async fn active_leagues(&self) -> Result<Vec<LeagueId>> {
        let mut leagues: Vec<LeagueId> = self.rosters.iter().map(|entry| entry.key().clone()).collect();
        leagues.sort();
        Ok(leagues)
    }

    async fn rosters(&self, league_id: &str) -> Result<Vec<Roster>> {
        Ok(self.rosters.get(league_id).map(|rosters| rosters.clone()).unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl EntrantDirectory for InMemoryRosterSource {
    async fn user_for_entrant(&self, entrant_id: &str) -> Result<Option<UserId>> {
        Ok(self.owners.get(entrant_id).map(|user| user.clone()))
    }
}

/// Scriptable stats source. Starts available with no games.
#[derive(Debug)]
pub struct InMemoryStatsSource {
    available: AtomicBool,
    rate_limited: Mutex<Option<u32>>,
    games: RwLock<HashMap<GameId, GameStatus>>,
    lines: RwLock<HashMap<PlayerId, PlayerStatLine>>,
}

impl Default for InMemoryStatsSource {
    fn default() -> Self {
        Self {
            available: AtomicBool::new(true),
            rate_limited: Mutex::new(None),
            games: RwLock::new(HashMap::new()),
            lines: RwLock::new(HashMap::new()),
        }
    }
}

impl InMemoryStatsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Fail the next stats fetch with a rate-limit error
    pub async fn rate_limit_next(&self, retry_after_secs: u32) {
        *self.rate_limited.lock().await = Some(retry_after_secs);
    }

    pub async fn set_game(&self, game_id: &str, status: GameStatus) {
        self.games.write().await.insert(game_id.to_string(), status);
    }

    /// Insert or replace a player's stat line
    pub async fn set_line(&self, line: PlayerStatLine) {
        self.lines.write().await.insert(line.player_id, line);
    }
}

#[async_trait::async_trait]
impl StatsSource for InMemoryStatsSource {
    async fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    async fn games_in_progress(&self, _week: u32, _season: u32) -> Result<Vec<GameId>> {
        let mut games: Vec<GameId> = self
            .games
            .read()
            .await
            .iter()
            .filter(|(_, status)| status.is_in_progress())
            .map(|(game_id, _)| game_id.clone())
            .collect();
        games.sort();
        Ok(games)
    }

    async fn live_player_stats(&self, _week: u32, _season: u32) -> Result<Vec<PlayerStatLine>> {
        if let Some(retry_after_secs) = self.rate_limited.lock().await.take() {
            return Err(LiveScoringError::RateLimited { retry_after_secs });
        }
        Ok(self.lines.read().await.values().cloned().collect())
    }

    async fn final_game_stats(&self, game_id: &str) -> Result<Vec<PlayerStatLine>> {
        Ok(self
            .lines
            .read()
            .await
            .values()
            .filter(|line| line.game_id.as_deref() == Some(game_id))
            .cloned()
            .collect())
    }

    async fn game_statuses(&self, _week: u32, _season: u32) -> Result<HashMap<GameId, GameStatus>> {
        Ok(self.games.read().await.clone())
    }

    async fn player_stats(&self, player_ids: &[PlayerId], _week: u32, _season: u32) -> Result<Vec<PlayerStatLine>> {
        let lines = self.lines.read().await;
        Ok(player_ids.iter().filter_map(|id| lines.get(id).cloned()).collect())
    }
}

/// Event pushed to connected clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveEvent {
    ScoreUpdate(ScoreSnapshot),
    RankChanges { league_id: LeagueId, changes: Vec<RankChange> },
    Leaderboard { league_id: LeagueId, ranked: Vec<RankedEntrant> },
    GameCompleted(GameCompletedEvent),
    DelayWarning { league_id: LeagueId, message: String, retry_after_secs: u32 },
}

/// Broadcast sink that fans events out over a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct ChannelBroadcaster {
    sender: broadcast::Sender<LiveEvent>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.sender.subscribe()
    }

    fn publish(&self, event: LiveEvent) -> Result<()> {
        // No subscribers is not an error
        let _ = self.sender.send(event);
        Ok(())
    }
}

#[async_trait::async_trait]
impl BroadcastSink for ChannelBroadcaster {
    async fn score_update(&self, snapshot: &ScoreSnapshot) -> Result<()> {
        self.publish(LiveEvent::ScoreUpdate(snapshot.clone()))
    }

    async fn rank_changes(&self, league_id: &str, changes: &[RankChange]) -> Result<()> {
        self.publish(LiveEvent::RankChanges { league_id: league_id.to_string(), changes: changes.to_vec() })
    }

    async fn leaderboard(&self, league_id: &str, ranked: &[RankedEntrant]) -> Result<()> {
        self.publish(LiveEvent::Leaderboard { league_id: league_id.to_string(), ranked: ranked.to_vec() })
    }

    async fn game_completed(&self, event: &GameCompletedEvent) -> Result<()> {
        self.publish(LiveEvent::GameCompleted(event.clone()))
    }

    async fn delay_warning(&self, league_id: &str, message: &str, retry_after_secs: u32) -> Result<()> {
        self.publish(LiveEvent::DelayWarning {
            league_id: league_id.to_string(),
            message: message.to_string(),
            retry_after_secs,
        })
    }
}

/// A notification the recording sink accepted
#[derive(Debug, Clone, PartialEq)]
pub struct SentNotification {
    pub user_id: UserId,
    pub title: String,
    pub body: String,
    pub payload: Value,
    /// Set for scheduled deliveries
    pub deliver_at_epoch_ms: Option<i64>,
}

/// Notification sink that records everything it is handed
#[derive(Debug, Default)]
pub struct RecordingNotificationSink {
    sent: Mutex<Vec<SentNotification>>,
    devices: DashMap<UserId, Vec<(String, String)>>,
    failing: AtomicBool,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every delivery fail until reset
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub async fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().await.clone()
    }

    pub fn devices(&self, user_id: &str) -> Vec<(String, String)> {
        self.devices.get(user_id).map(|devices| devices.clone()).unwrap_or_default()
    }

    async fn record(&self, notification: SentNotification) -> Result<()> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(LiveScoringError::Notification("push gateway rejected the message".to_string()));
        }
        self.sent.lock().await.push(notification);
        Ok(())
    }
}

#[async_trait::async_trait]
impl NotificationSink for RecordingNotificationSink {
    async fn send(&self, user_id: &str, title: &str, body: &str, payload: &Value) -> Result<()> {
        self.record(SentNotification {
            user_id: user_id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            payload: payload.clone(),
            deliver_at_epoch_ms: None,
        })
        .await
    }

    async fn schedule(
        &self,
        user_id: &str,
        title: &str,
        body: &str,
        payload: &Value,
        deliver_at_epoch_ms: i64,
    ) -> Result<()> {
        self.record(SentNotification {
            user_id: user_id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            payload: payload.clone(),
            deliver_at_epoch_ms: Some(deliver_at_epoch_ms),
        })
        .await
    }

    async fn register_device(&self, user_id: &str, device_token: &str, platform: &str) -> Result<()> {
        self.devices
            .entry(user_id.to_string())
            .or_default()
            .push((device_token.to_string(), platform.to_string()));
        Ok(())
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn at(time: DateTime<Utc>) -> Self {
        Self { millis: AtomicI64::new(time.timestamp_millis()) }
    }

    pub fn set(&self, time: DateTime<Utc>) {
        self.millis.store(time.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn advance(&self, by: chrono::Duration) {
        self.millis.fetch_add(by.num_milliseconds(), Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.millis.load(Ordering::Relaxed)).unwrap_or_default()
    }
}

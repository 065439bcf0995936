//! Per-league working state
//!
//! The engine is a cache over the authoritative score store. Everything it
//! remembers between cycles (previous scores, rank history, view deltas,
//! finalized entrants and handled games) lives in one [`LeagueState`] per
//! league, registered in [`LiveScoringState`].

use dashmap::{DashMap, DashSet};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard};

use crate::models::{EntrantId, GameId, LeagueId, PlayerId};

/// Last committed score of an entrant and the per-player points behind it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntrantScoreState {
    pub score: Decimal,
    pub player_points: HashMap<PlayerId, Decimal>,
    /// Number of score changes persisted for the entrant
    pub version: u64,
}

/// Ranks from the latest cycle and the one before it
#[derive(Debug, Clone, Default)]
pub struct RankHistory {
    pub current: HashMap<EntrantId, u32>,
    pub previous: HashMap<EntrantId, u32>,
}

/// Working state for one league
#[derive(Debug)]
pub struct LeagueState {
    league_id: LeagueId,
    scores: DashMap<EntrantId, EntrantScoreState>,
    ranks: RwLock<RankHistory>,
    view_deltas: DashMap<EntrantId, Decimal>,
    finalized: DashSet<EntrantId>,
    completed_games: DashSet<GameId>,
    seeded: AtomicBool,
    cycle_lock: Mutex<()>,
}

impl LeagueState {
    pub fn new(league_id: impl Into<LeagueId>) -> Self {
        Self {
            league_id: league_id.into(),
            scores: DashMap::new(),
            ranks: RwLock::new(RankHistory::default()),
            view_deltas: DashMap::new(),
            finalized: DashSet::new(),
            completed_games: DashSet::new(),
            seeded: AtomicBool::new(false),
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn league_id(&self) -> &str {
        &self.league_id
    }

    /// Held for the whole poll cycle; serializes cycles of this league only
    pub async fn lock_cycle(&self) -> MutexGuard<'_, ()> {
        self.cycle_lock.lock().await
    }

    /// Cached score, zero when the entrant has never changed
    pub fn previous_score(&self, entrant_id: &str) -> Decimal {
        self.scores.get(entrant_id).map(|entry| entry.score).unwrap_or(Decimal::ZERO)
    }

    pub fn entrant_state(&self, entrant_id: &str) -> Option<EntrantScoreState> {
        self.scores.get(entrant_id).map(|entry| entry.clone())
    }

    pub fn record_score(&self, entrant_id: &str, state: EntrantScoreState) {
        self.scores.insert(entrant_id.to_string(), state);
    }

    /// Load persisted scores and change counts the first time a league is
    /// polled after startup. Entrants already in the cache are left alone.
    pub fn seed_scores(&self, scores: HashMap<EntrantId, Decimal>, versions: &HashMap<EntrantId, u64>) {
        if self.seeded.swap(true, Ordering::AcqRel) {
            return;
        }
        for (entrant_id, score) in scores {
            let version = versions.get(&entrant_id).copied().unwrap_or(0);
            self.scores
                .entry(entrant_id)
                .or_insert_with(|| EntrantScoreState { score, player_points: HashMap::new(), version });
        }
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded.load(Ordering::Acquire)
    }

    /// Cached score of every entrant seen so far
    pub fn scores(&self) -> HashMap<EntrantId, Decimal> {
        self.scores.iter().map(|entry| (entry.key().clone(), entry.score)).collect()
    }

    /// Accumulate a score change the entrant has not viewed yet
    pub fn record_view_delta(&self, entrant_id: &str, delta: Decimal) {
        *self.view_deltas.entry(entrant_id.to_string()).or_insert(Decimal::ZERO) += delta;
    }

    pub fn view_delta(&self, entrant_id: &str) -> Decimal {
        self.view_deltas.get(entrant_id).map(|delta| *delta).unwrap_or(Decimal::ZERO)
    }

    pub fn acknowledge_view(&self, entrant_id: &str) {
        self.view_deltas.remove(entrant_id);
    }

    pub fn is_finalized(&self, entrant_id: &str) -> bool {
        self.finalized.contains(entrant_id)
    }

    pub fn mark_finalized(&self, entrant_id: &str) {
        self.finalized.insert(entrant_id.to_string());
    }

    pub fn is_game_completed(&self, game_id: &str) -> bool {
        self.completed_games.contains(game_id)
    }

    /// Returns `true` the first time a game is marked
    pub fn mark_game_completed(&self, game_id: &str) -> bool {
        self.completed_games.insert(game_id.to_string())
    }

    pub async fn rank_history(&self) -> RwLockReadGuard<'_, RankHistory> {
        self.ranks.read().await
    }

    /// Replace the current ranks; the old current becomes previous
    pub async fn replace_ranks(&self, ranks: HashMap<EntrantId, u32>) {
        let mut history = self.ranks.write().await;
        let current = std::mem::replace(&mut history.current, ranks);
        history.previous = current;
    }
}

/// Registry of league states
#[derive(Debug, Default)]
pub struct LiveScoringState {
    leagues: DashMap<LeagueId, Arc<LeagueState>>,
}

impl LiveScoringState {
    pub fn new() -> Self {
        Self::default()
    }

    /// State for a league, created on first access
    pub fn league(&self, league_id: &str) -> Arc<LeagueState> {
        if let Some(existing) = self.leagues.get(league_id) {
            return Arc::clone(existing.value());
        }
        let entry = self
            .leagues
            .entry(league_id.to_string())
            .or_insert_with(|| Arc::new(LeagueState::new(league_id)));
        Arc::clone(entry.value())
    }

    pub fn get(&self, league_id: &str) -> Option<Arc<LeagueState>> {
        self.leagues.get(league_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Drop a league's state (end of the scoring week)
    pub fn remove(&self, league_id: &str) -> Option<Arc<LeagueState>> {
        self.leagues.remove(league_id).map(|(_, state)| state)
    }

    pub fn league_ids(&self) -> Vec<LeagueId> {
        self.leagues.iter().map(|entry| entry.key().clone()).collect()
    }
}

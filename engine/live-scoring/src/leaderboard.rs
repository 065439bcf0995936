//! Leaderboard views over the ranked league

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::LeaderboardConfig;
use crate::error::Result;
use crate::models::{EntrantId, LeagueId, RankedEntrant, ScoreStatus};
use crate::ports::{Clock, RosterSource, ScoreStore, StatsSource};
use crate::ranking::{rank_entrants, with_rostered_entrants};
use crate::state::{LeagueState, LiveScoringState};

/// One row of a leaderboard page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub entrant_id: EntrantId,
    pub rank: u32,
    pub previous_rank: u32,
    /// Positive when the entrant moved up
    pub rank_delta: i64,
    pub total_score: Decimal,
    pub points_behind_leader: Decimal,
    pub status: ScoreStatus,
    /// Score change since the entrant last acknowledged the view
    pub score_delta: Decimal,
    pub last_update: Option<DateTime<Utc>>,
}

/// One page of a league leaderboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardPage {
    pub league_id: LeagueId,
    pub page: usize,
    pub page_size: usize,
    pub total_entrants: usize,
    pub total_pages: usize,
    pub leader_score: Decimal,
    pub entries: Vec<LeaderboardEntry>,
    pub last_update: Option<DateTime<Utc>>,
}

impl LeaderboardPage {
    pub fn has_next(&self) -> bool {
        self.page + 1 < self.total_pages
    }
}

/// Snapshot of one entrant's score for a reconnecting client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveScoreView {
    pub entrant_id: EntrantId,
    pub league_id: LeagueId,
    pub current_score: Decimal,
    pub previous_score: Decimal,
    pub delta: Decimal,
    pub status: ScoreStatus,
    pub rank: Option<u32>,
    pub last_update: Option<DateTime<Utc>>,
}

/// Slice `[page * size, min(page * size + size, len))`. Pages past the end are empty.
pub fn paginate<T>(items: &[T], page: usize, page_size: usize) -> &[T] {
    let start = page.saturating_mul(page_size);
    if start >= items.len() {
        return &[];
    }
    let end = start.saturating_add(page_size).min(items.len());
    &items[start..end]
}

/// Builds leaderboard, matchup and single-entrant views
pub struct LeaderboardService {
    state: Arc<LiveScoringState>,
    store: Arc<dyn ScoreStore>,
    stats: Arc<dyn StatsSource>,
    rosters: Arc<dyn RosterSource>,
    clock: Arc<dyn Clock>,
    config: LeaderboardConfig,
}

impl LeaderboardService {
    pub fn new(
        state: Arc<LiveScoringState>,
        store: Arc<dyn ScoreStore>,
        stats: Arc<dyn StatsSource>,
        rosters: Arc<dyn RosterSource>,
        clock: Arc<dyn Clock>,
        config: LeaderboardConfig,
    ) -> Self {
        Self { state, store, stats, rosters, clock, config }
    }

    /// Page `page` (zero-based) of the league leaderboard. `None` or zero
    /// page size falls back to the configured default.
    pub async fn leaderboard(&self, league_id: &str, page: usize, page_size: Option<usize>) -> Result<LeaderboardPage> {
        let page_size = match page_size {
            Some(size) if size > 0 => size,
            _ => self.config.default_page_size,
        };

        let scores = self.ranked_scores(league_id).await?;
        let ranked = rank_entrants(&scores);
        let league = self.state.get(league_id);

        let total_entrants = ranked.len();
        let total_pages = total_entrants.div_ceil(page_size);
        let leader_score = ranked.first().map(|leader| leader.score).unwrap_or(Decimal::ZERO);

        let entries = self.build_entries(league.as_deref(), paginate(&ranked, page, page_size)).await?;
        let last_update = self.store.league_last_update_time(league_id).await?;

        Ok(LeaderboardPage {
            league_id: league_id.to_string(),
            page,
            page_size,
            total_entrants,
            total_pages,
            leader_score,
            entries,
            last_update,
        })
    }

    /// Head-to-head view of two entrants, ranked against each other only
    pub async fn matchup(&self, league_id: &str, entrant_a: &str, entrant_b: &str) -> Result<Vec<LeaderboardEntry>> {
        let scores = self.store.current_scores(league_id).await?;
        let pair: HashMap<EntrantId, Decimal> = [entrant_a, entrant_b]
            .into_iter()
            .map(|id| (id.to_string(), scores.get(id).copied().unwrap_or(Decimal::ZERO)))
            .collect();

        let ranked = rank_entrants(&pair);
        let league = self.state.get(league_id);
        self.build_entries(league.as_deref(), &ranked).await
    }

    /// Clear the entrant's unseen score delta
    pub fn acknowledge_view(&self, league_id: &str, entrant_id: &str) {
        if let Some(league) = self.state.get(league_id) {
            league.acknowledge_view(entrant_id);
        }
    }

    /// Current score of one entrant. Unknown entrants get a zeroed LIVE view.
    pub async fn live_score(&self, league_id: &str, entrant_id: &str) -> Result<LiveScoreView> {
        let scores = self.ranked_scores(league_id).await?;
        let current_score = scores.get(entrant_id).copied().unwrap_or(Decimal::ZERO);
        let rank = rank_entrants(&scores)
            .into_iter()
            .find(|entry| entry.entrant_id == entrant_id)
            .map(|entry| entry.rank);

        let since = self.clock.now() - Duration::minutes(self.config.recent_update_window_minutes);
        let recent = self.store.recent_updates(entrant_id, since).await?;
        let (previous_score, delta) = match recent.first() {
            Some(latest) => (latest.previous_score, latest.delta),
            None => (current_score, Decimal::ZERO),
        };

        let league = self.state.get(league_id);
        Ok(LiveScoreView {
            entrant_id: entrant_id.to_string(),
            league_id: league_id.to_string(),
            current_score,
            previous_score,
            delta,
            status: self.status_of(league.as_deref(), entrant_id).await?,
            rank,
            last_update: self.store.last_update_time(entrant_id).await?,
        })
    }

    /// Entrants with at least one rostered player in a game that is in progress
    pub async fn entrants_with_live_games(&self, league_id: &str, week: u32, season: u32) -> Result<HashSet<EntrantId>> {
        let statuses = self.stats.game_statuses(week, season).await?;
        let live_games: HashSet<&String> =
            statuses.iter().filter(|(_, status)| status.is_in_progress()).map(|(game_id, _)| game_id).collect();
        if live_games.is_empty() {
            return Ok(HashSet::new());
        }

        let rosters = self.rosters.rosters(league_id).await?;
        let player_ids: Vec<_> = rosters
            .iter()
            .flat_map(|roster| roster.filled_player_ids())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let lines = self.stats.player_stats(&player_ids, week, season).await?;
        let live_players: HashSet<_> = lines
            .iter()
            .filter(|line| line.game_id.as_ref().map_or(false, |game_id| live_games.contains(game_id)))
            .map(|line| line.player_id)
            .collect();

        Ok(rosters
            .into_iter()
            .filter(|roster| roster.filled_player_ids().iter().any(|id| live_players.contains(id)))
            .map(|roster| roster.entrant_id)
            .collect())
    }

    /// Stored scores plus every rostered entrant, matching what the poll cycle ranks
    async fn ranked_scores(&self, league_id: &str) -> Result<HashMap<EntrantId, Decimal>> {
        let scores = self.store.current_scores(league_id).await?;
        let rosters = self.rosters.rosters(league_id).await?;
        Ok(with_rostered_entrants(scores, &rosters))
    }

    async fn build_entries(&self, league: Option<&LeagueState>, ranked: &[RankedEntrant]) -> Result<Vec<LeaderboardEntry>> {
        let previous_ranks: HashMap<EntrantId, u32> = match league {
            Some(league) => league.rank_history().await.previous.clone(),
            None => HashMap::new(),
        };

        let mut entries = Vec::with_capacity(ranked.len());
        for entry in ranked {
            let previous_rank = previous_ranks.get(&entry.entrant_id).copied().unwrap_or(entry.rank);
            entries.push(LeaderboardEntry {
                entrant_id: entry.entrant_id.clone(),
                rank: entry.rank,
                previous_rank,
                rank_delta: i64::from(previous_rank) - i64::from(entry.rank),
                total_score: entry.score,
                points_behind_leader: entry.points_behind_leader,
                status: self.status_of(league, &entry.entrant_id).await?,
                score_delta: league.map_or(Decimal::ZERO, |league| league.view_delta(&entry.entrant_id)),
                last_update: self.store.last_update_time(&entry.entrant_id).await?,
            });
        }
        Ok(entries)
    }

    async fn status_of(&self, league: Option<&LeagueState>, entrant_id: &str) -> Result<ScoreStatus> {
        if league.map_or(false, |league| league.is_finalized(entrant_id)) {
            return Ok(ScoreStatus::Final);
        }
        Ok(self.store.score_status(entrant_id).await?.unwrap_or(ScoreStatus::Live))
    }
}

//! Poll orchestrator
//!
//! One call to [`PollOrchestrator::poll_and_update`] runs one scoring cycle
//! for a (league, week, season). Every failure is contained here: the caller
//! always gets a [`CycleOutcome`] and connected clients get a delay warning.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{LiveScoringConfig, PollingConfig};
use crate::error::{LiveScoringError, Result};
use crate::finalizer::{FinalizationOutcome, GameFinalizer};
use crate::ledger::ScoreLedger;
use crate::models::{index_stats, LeagueId, Roster};
use crate::notifications::NotificationEngine;
use crate::ports::{BroadcastSink, Clock, RosterSource, ScoreStore, StatsSource};
use crate::ranking::{update_rankings, with_rostered_entrants};
use crate::scorer::RosterScorer;
use crate::state::{LeagueState, LiveScoringState};

/// How a cycle ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum CycleStatus {
    Completed,
    /// No game in progress; only finalization ran
    NoLiveGames,
    /// Games in progress but the stats feed returned nothing
    NoStats,
    Unavailable { retry_after_secs: u32 },
    RateLimited { retry_after_secs: u32 },
    Failed { reason: String, retry_after_secs: u32 },
}

/// Summary of one poll cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleOutcome {
    pub league_id: LeagueId,
    pub status: CycleStatus,
    pub updates_committed: usize,
    pub duplicates_discarded: usize,
    pub rank_changes: usize,
    pub games_completed: usize,
    pub entrants_finalized: usize,
    pub duration_ms: u64,
}

impl CycleOutcome {
    fn new(league_id: &str, status: CycleStatus) -> Self {
        Self {
            league_id: league_id.to_string(),
            status,
            updates_committed: 0,
            duplicates_discarded: 0,
            rank_changes: 0,
            games_completed: 0,
            entrants_finalized: 0,
            duration_ms: 0,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, CycleStatus::Failed { .. } | CycleStatus::RateLimited { .. })
    }

    pub fn retry_after_secs(&self) -> Option<u32> {
        match self.status {
            CycleStatus::Unavailable { retry_after_secs }
            | CycleStatus::RateLimited { retry_after_secs }
            | CycleStatus::Failed { retry_after_secs, .. } => Some(retry_after_secs),
            _ => None,
        }
    }
}

/// External collaborators of the scoring cycle
#[derive(Clone)]
pub struct EnginePorts {
    pub stats: Arc<dyn StatsSource>,
    pub rosters: Arc<dyn RosterSource>,
    pub store: Arc<dyn ScoreStore>,
    pub broadcaster: Arc<dyn BroadcastSink>,
    pub clock: Arc<dyn Clock>,
}

pub struct PollOrchestrator {
    state: Arc<LiveScoringState>,
    ports: EnginePorts,
    ledger: ScoreLedger,
    finalizer: GameFinalizer,
    notifications: Arc<NotificationEngine>,
    config: PollingConfig,
}

impl PollOrchestrator {
    pub fn new(
        state: Arc<LiveScoringState>,
        ports: EnginePorts,
        notifications: Arc<NotificationEngine>,
        config: &LiveScoringConfig,
    ) -> Self {
        let ledger = ScoreLedger::new(
            RosterScorer::new(config.scoring.clone()),
            Arc::clone(&ports.store),
            Arc::clone(&ports.clock),
            config.polling.touchdown_points_threshold,
        );
        let finalizer = GameFinalizer::new(
            Arc::clone(&ports.stats),
            Arc::clone(&ports.store),
            Arc::clone(&ports.broadcaster),
            Arc::clone(&ports.clock),
        );
        Self { state, ports, ledger, finalizer, notifications, config: config.polling.clone() }
    }

    pub fn state(&self) -> &Arc<LiveScoringState> {
        &self.state
    }

    pub fn ports(&self) -> &EnginePorts {
        &self.ports
    }

    /// Run one cycle. Never returns an error.
    pub async fn poll_and_update(&self, league_id: &str, week: u32, season: u32) -> CycleOutcome {
        let started = Instant::now();
        let league = self.state.league(league_id);
        let _cycle = league.lock_cycle().await;

        let mut outcome = match self.run_cycle(&league, week, season).await {
            Ok(outcome) => outcome,
            Err(e) => self.handle_failure(league_id, e).await,
        };
        outcome.duration_ms = started.elapsed().as_millis() as u64;
        outcome
    }

    /// Drop the league's cached state and the store's cache (end of week)
    pub async fn clear_caches(&self, league_id: &str) -> Result<()> {
        self.state.remove(league_id);
        self.ports.store.clear_cache(league_id).await?;
        info!(league_id = %league_id, "Cleared live scoring caches");
        Ok(())
    }

    async fn run_cycle(&self, league: &LeagueState, week: u32, season: u32) -> Result<CycleOutcome> {
        let league_id = league.league_id();

        if !self.ports.stats.is_available().await {
            let retry_after_secs = self.config.unavailable_retry_after_secs;
            warn!(league_id = %league_id, "Stats source unavailable, skipping cycle");
            self.warn_clients(league_id, "Live scoring is temporarily delayed", retry_after_secs).await;
            return Ok(CycleOutcome::new(league_id, CycleStatus::Unavailable { retry_after_secs }));
        }

        let games = self.ports.stats.games_in_progress(week, season).await?;
        if games.is_empty() {
            debug!(league_id = %league_id, week, season, "No games in progress");
            let rosters = self.ports.rosters.rosters(league_id).await?;
            let finalization = self.finalize(league, &rosters, week, season).await?;
            let mut outcome = CycleOutcome::new(league_id, CycleStatus::NoLiveGames);
            outcome.games_completed = finalization.completed_games.len();
            outcome.entrants_finalized = finalization.finalized_entrants.len();
            return Ok(outcome);
        }

        let stats = index_stats(self.ports.stats.live_player_stats(week, season).await?);
        if stats.is_empty() {
            warn!(league_id = %league_id, games = games.len(), "Games in progress but no player stats returned");
            return Ok(CycleOutcome::new(league_id, CycleStatus::NoStats));
        }

        if !league.is_seeded() {
            let scores = self.ports.store.current_scores(league_id).await?;
            let versions = self.ports.store.update_counts(league_id).await?;
            league.seed_scores(scores, &versions);
        }

        let rosters = self.ports.rosters.rosters(league_id).await?;
        let batch = self.ledger.prepare(league, &rosters, &stats).await?;
        let duplicates_discarded = batch.duplicates.len();
        let touchdowns = batch.touchdowns.clone();
        let committed = self.ledger.commit(league, batch).await?;

        let broadcasts = join_all(committed.iter().map(|snapshot| self.ports.broadcaster.score_update(snapshot))).await;
        for (snapshot, result) in committed.iter().zip(broadcasts) {
            if let Err(e) = result {
                warn!(league_id = %league_id, entrant_id = %snapshot.entrant_id, error = %e, "Failed to broadcast score update");
            }
        }

        let ranking = update_rankings(league, &with_rostered_entrants(league.scores(), &rosters)).await;
        if !ranking.changes.is_empty() {
            if let Err(e) = self.ports.broadcaster.rank_changes(league_id, &ranking.changes).await {
                warn!(league_id = %league_id, error = %e, "Failed to broadcast rank changes");
            }
        }
        // Sent every completed cycle, changed or not
        if let Err(e) = self.ports.broadcaster.leaderboard(league_id, &ranking.ranked).await {
            warn!(league_id = %league_id, error = %e, "Failed to broadcast leaderboard");
        }

        for snapshot in &committed {
            self.notifications.on_score_update(snapshot).await;
        }
        for change in &ranking.changes {
            self.notifications.on_rank_change(change).await;
        }
        for play in &touchdowns {
            self.notifications.on_player_touchdown(play).await;
        }

        let finalization = self.finalize(league, &rosters, week, season).await?;

        info!(
            league_id = %league_id,
            games = games.len(),
            updates = committed.len(),
            duplicates = duplicates_discarded,
            rank_changes = ranking.changes.len(),
            finalized = finalization.finalized_entrants.len(),
            "Live scoring cycle complete"
        );

        Ok(CycleOutcome {
            league_id: league_id.to_string(),
            status: CycleStatus::Completed,
            updates_committed: committed.len(),
            duplicates_discarded,
            rank_changes: ranking.changes.len(),
            games_completed: finalization.completed_games.len(),
            entrants_finalized: finalization.finalized_entrants.len(),
            duration_ms: 0,
        })
    }

    async fn finalize(
        &self,
        league: &LeagueState,
        rosters: &[Roster],
        week: u32,
        season: u32,
    ) -> Result<FinalizationOutcome> {
        let outcome = self.finalizer.finalize(league, rosters, week, season).await?;
        for event in &outcome.completed_games {
            for entrant_id in &event.affected_entrants {
                let score = league.previous_score(entrant_id);
                self.notifications.on_game_completed(entrant_id, event, score).await;
            }
        }
        Ok(outcome)
    }

    async fn handle_failure(&self, league_id: &str, e: LiveScoringError) -> CycleOutcome {
        match e.retry_after_secs() {
            Some(retry_after_secs) => {
                warn!(league_id = %league_id, retry_after_secs, "Stats source rate limited this cycle");
                self.warn_clients(league_id, "Live scoring is rate limited", retry_after_secs).await;
                CycleOutcome::new(league_id, CycleStatus::RateLimited { retry_after_secs })
            }
            None => {
                let retry_after_secs = self.config.error_retry_after_secs;
                error!(league_id = %league_id, error = %e, "Live scoring cycle failed");
                self.warn_clients(league_id, "Live scoring hit an error and will retry", retry_after_secs).await;
                CycleOutcome::new(league_id, CycleStatus::Failed { reason: e.to_string(), retry_after_secs })
            }
        }
    }

    async fn warn_clients(&self, league_id: &str, message: &str, retry_after_secs: u32) {
        if let Err(e) = self.ports.broadcaster.delay_warning(league_id, message, retry_after_secs).await {
            warn!(league_id = %league_id, error = %e, "Failed to broadcast delay warning");
        }
    }
}

//! Game completion finalizer
//!
//! Once per cycle, after score updates: every game that has turned terminal
//! since the league last looked is broadcast once, and each entrant with a
//! player in it is flipped LIVE → FINAL when all of their filled-slot players'
//! games are terminal. FINAL never reverts.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::models::{EntrantId, GameCompletedEvent, GameId, GameStatus, PlayerId, Roster, ScoreStatus};
use crate::ports::{BroadcastSink, Clock, ScoreStore, StatsSource};
use crate::state::LeagueState;

/// What a finalization pass did
#[derive(Debug, Clone, Default)]
pub struct FinalizationOutcome {
    pub completed_games: Vec<GameCompletedEvent>,
    pub finalized_entrants: Vec<EntrantId>,
}

pub struct GameFinalizer {
    stats: Arc<dyn StatsSource>,
    store: Arc<dyn ScoreStore>,
    broadcaster: Arc<dyn BroadcastSink>,
    clock: Arc<dyn Clock>,
}

impl GameFinalizer {
    pub fn new(
        stats: Arc<dyn StatsSource>,
        store: Arc<dyn ScoreStore>,
        broadcaster: Arc<dyn BroadcastSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { stats, store, broadcaster, clock }
    }

    pub async fn finalize(
        &self,
        league: &LeagueState,
        rosters: &[Roster],
        week: u32,
        season: u32,
    ) -> Result<FinalizationOutcome> {
        let statuses = self.stats.game_statuses(week, season).await?;

        let mut newly_terminal: Vec<(&GameId, &GameStatus)> = statuses
            .iter()
            .filter(|(game_id, status)| status.is_terminal() && !league.is_game_completed(game_id))
            .collect();
        newly_terminal.sort_by(|a, b| a.0.cmp(b.0));

        let mut outcome = FinalizationOutcome::default();
        for (game_id, status) in newly_terminal {
            let players: HashSet<PlayerId> =
                self.stats.final_game_stats(game_id).await?.into_iter().map(|line| line.player_id).collect();

            let affected: Vec<&Roster> = rosters
                .iter()
                .filter(|roster| roster.filled_player_ids().iter().any(|id| players.contains(id)))
                .collect();

            for roster in &affected {
                if self.finalize_entrant(league, roster, &statuses, week, season).await? {
                    outcome.finalized_entrants.push(roster.entrant_id.clone());
                }
            }

            let event = GameCompletedEvent {
                league_id: league.league_id().to_string(),
                game_id: game_id.clone(),
                overtime: status.is_overtime(),
                affected_entrants: affected.iter().map(|roster| roster.entrant_id.clone()).collect(),
                completed_at: self.clock.now(),
            };

            if league.mark_game_completed(game_id) {
                if let Err(e) = self.broadcaster.game_completed(&event).await {
                    warn!(league_id = %event.league_id, game_id = %game_id, error = %e, "Failed to broadcast game completion");
                }
                info!(
                    league_id = %event.league_id,
                    game_id = %game_id,
                    affected = event.affected_entrants.len(),
                    "{}",
                    event.summary()
                );
                outcome.completed_games.push(event);
            }
        }

        Ok(outcome)
    }

    /// Flip the entrant to FINAL if every filled-slot player's game is terminal.
    /// A player with no game this week counts as not terminal.
    async fn finalize_entrant(
        &self,
        league: &LeagueState,
        roster: &Roster,
        statuses: &HashMap<GameId, GameStatus>,
        week: u32,
        season: u32,
    ) -> Result<bool> {
        let entrant_id = roster.entrant_id.as_str();
        if league.is_finalized(entrant_id) {
            return Ok(false);
        }
        if self.store.score_status(entrant_id).await?.map_or(false, |status| status.is_final()) {
            league.mark_finalized(entrant_id);
            return Ok(false);
        }

        let player_ids = roster.filled_player_ids();
        if player_ids.is_empty() {
            return Ok(false);
        }

        let games: HashMap<PlayerId, Option<GameId>> = self
            .stats
            .player_stats(&player_ids, week, season)
            .await?
            .into_iter()
            .map(|line| (line.player_id, line.game_id))
            .collect();

        let all_terminal = player_ids.iter().all(|player_id| {
            games
                .get(player_id)
                .and_then(|game| game.as_ref())
                .and_then(|game_id| statuses.get(game_id))
                .map_or(false, |status| status.is_terminal())
        });

        if !all_terminal {
            debug!(entrant_id = %entrant_id, "Entrant still has players in unfinished games");
            return Ok(false);
        }

        self.store.transition_status(entrant_id, ScoreStatus::Final).await?;
        league.mark_finalized(entrant_id);
        info!(league_id = %league.league_id(), entrant_id = %entrant_id, "Entrant score is final");
        Ok(true)
    }
}

//! Idempotent score ledger
//!
//! Turns freshly computed roster scores into persisted score snapshots. A
//! cycle runs in two phases: [`ScoreLedger::prepare`] scores every roster and
//! filters out unchanged, finalized and already-applied updates without
//! touching any cache, then [`ScoreLedger::commit`] persists the batch and
//! only afterwards advances the league's cached scores.

use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    EntrantId, LeagueId, PlayerId, Roster, ScoreSnapshot, ScoreStatus, StatRef, StatSnapshot,
};
use crate::ports::{Clock, ScoreStore};
use crate::scorer::{RosterScore, RosterScorer};
use crate::state::{EntrantScoreState, LeagueState};

/// A single player's point gain large enough to count as a touchdown
#[derive(Debug, Clone, PartialEq)]
pub struct TouchdownPlay {
    pub league_id: LeagueId,
    pub entrant_id: EntrantId,
    pub player_id: PlayerId,
    pub player_name: String,
    pub points_gained: Decimal,
}

/// A deduplicated update waiting to be persisted
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    pub snapshot: ScoreSnapshot,
    pub player_points: HashMap<PlayerId, Decimal>,
    /// Entrant version once this update is applied
    pub version: u64,
}

/// A change whose key the store had already applied
#[derive(Debug, Clone)]
pub struct AppliedElsewhere {
    pub entrant_id: EntrantId,
    pub score: RosterScore,
    pub version: u64,
}

/// Result of the prepare phase
#[derive(Debug, Default)]
pub struct PreparedBatch {
    pub updates: Vec<PendingUpdate>,
    pub touchdowns: Vec<TouchdownPlay>,
    /// Changed scores the store had already applied; only the cache catches up
    pub duplicates: Vec<AppliedElsewhere>,
    pub unchanged: usize,
    pub skipped_final: usize,
}

impl PreparedBatch {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.duplicates.is_empty()
    }
}

/// Deterministic key for one score change: league, entrant, how many changes
/// the entrant already has, the attributed stat update and the score
/// transition. Replaying the same change from the same persisted state
/// reproduces the key; a later change that lands on an earlier score does not.
pub fn idempotency_key(
    league_id: &str,
    entrant_id: &str,
    version: u64,
    source: &StatRef,
    previous_score: Decimal,
    new_score: Decimal,
) -> String {
    let player = source.player_id.map(|id| id.to_string()).unwrap_or_else(|| "roster".to_string());
    format!(
        "{}:{}:v{}:{}:{}:{}->{}",
        league_id,
        entrant_id,
        version,
        player,
        source.stat_update,
        previous_score.normalize(),
        new_score.normalize()
    )
}

/// Converts roster scores into deduplicated, persisted snapshots
pub struct ScoreLedger {
    scorer: RosterScorer,
    store: Arc<dyn ScoreStore>,
    clock: Arc<dyn Clock>,
    touchdown_threshold: Decimal,
}

impl ScoreLedger {
    pub fn new(
        scorer: RosterScorer,
        store: Arc<dyn ScoreStore>,
        clock: Arc<dyn Clock>,
        touchdown_threshold: Decimal,
    ) -> Self {
        Self { scorer, store, clock, touchdown_threshold }
    }

    pub fn scorer(&self) -> &RosterScorer {
        &self.scorer
    }

    /// Score every roster and build the pending batch. No cache is modified.
    pub async fn prepare(&self, league: &LeagueState, rosters: &[Roster], stats: &StatSnapshot) -> Result<PreparedBatch> {
        let mut batch = PreparedBatch::default();
        let now = self.clock.now();

        for roster in rosters {
            let entrant_id = roster.entrant_id.as_str();

            if self.is_final(league, entrant_id).await? {
                batch.skipped_final += 1;
                continue;
            }

            let score = self.scorer.score_roster(roster, stats);
            let previous = league.entrant_state(entrant_id).unwrap_or_default();
            if score.total == previous.score {
                batch.unchanged += 1;
                continue;
            }

            let source = attribute_change(&previous.player_points, &score.player_points, stats);
            let key =
                idempotency_key(league.league_id(), entrant_id, previous.version, &source, previous.score, score.total);
            let version = previous.version + 1;

            if self.store.is_duplicate(&key).await? {
                debug!(entrant_id = %entrant_id, key = %key, "Discarding already-applied score update");
                batch.duplicates.push(AppliedElsewhere { entrant_id: entrant_id.to_string(), score, version });
                continue;
            }

            batch.touchdowns.extend(self.touchdown_plays(league.league_id(), entrant_id, &previous, &score, stats));

            let snapshot = ScoreSnapshot {
                id: Uuid::new_v4(),
                entrant_id: entrant_id.to_string(),
                league_id: league.league_id().to_string(),
                previous_score: previous.score,
                new_score: score.total,
                delta: score.total - previous.score,
                status: ScoreStatus::Live,
                idempotency_key: key,
                source,
                timestamp: now,
            };

            if snapshot.is_negative_change() {
                debug!(
                    entrant_id = %entrant_id,
                    delta = %snapshot.delta,
                    "Score decreased, likely a stat correction"
                );
            }

            batch.updates.push(PendingUpdate { snapshot, player_points: score.player_points, version });
        }

        Ok(batch)
    }

    /// Persist the batch, mark every key applied, then advance the caches.
    /// Returns the committed snapshots in roster order.
    pub async fn commit(&self, league: &LeagueState, batch: PreparedBatch) -> Result<Vec<ScoreSnapshot>> {
        for duplicate in batch.duplicates {
            league.record_score(
                &duplicate.entrant_id,
                EntrantScoreState {
                    score: duplicate.score.total,
                    player_points: duplicate.score.player_points,
                    version: duplicate.version,
                },
            );
        }

        if batch.updates.is_empty() {
            return Ok(Vec::new());
        }

        let snapshots: Vec<ScoreSnapshot> = batch.updates.iter().map(|update| update.snapshot.clone()).collect();
        self.store.save_all(&snapshots).await?;

        for snapshot in &snapshots {
            if let Err(e) = self.store.mark_applied(&snapshot.idempotency_key).await {
                // The snapshot is already persisted; a missing marker only costs a
                // duplicate check miss if the same key is produced again.
                warn!(key = %snapshot.idempotency_key, error = %e, "Failed to mark score update applied");
            }
        }

        for update in batch.updates {
            let snapshot = update.snapshot;
            league.record_score(
                &snapshot.entrant_id,
                EntrantScoreState {
                    score: snapshot.new_score,
                    player_points: update.player_points,
                    version: update.version,
                },
            );
            league.record_view_delta(&snapshot.entrant_id, snapshot.delta);
        }

        Ok(snapshots)
    }

    async fn is_final(&self, league: &LeagueState, entrant_id: &str) -> Result<bool> {
        if league.is_finalized(entrant_id) {
            return Ok(true);
        }
        let status = self.store.score_status(entrant_id).await?;
        if status.map_or(false, |status| status.is_final()) {
            league.mark_finalized(entrant_id);
            return Ok(true);
        }
        Ok(false)
    }

    fn touchdown_plays(
        &self,
        league_id: &str,
        entrant_id: &str,
        previous: &EntrantScoreState,
        score: &RosterScore,
        stats: &StatSnapshot,
    ) -> Vec<TouchdownPlay> {
        // No breakdown means the cache was seeded from the store; every player
        // would look like a fresh gain.
        if previous.player_points.is_empty() && previous.score != Decimal::ZERO {
            return Vec::new();
        }

        let mut plays: Vec<TouchdownPlay> = score
            .player_points
            .iter()
            .filter_map(|(player_id, points)| {
                let before = previous.player_points.get(player_id).copied().unwrap_or(Decimal::ZERO);
                let gained = *points - before;
                (gained >= self.touchdown_threshold).then(|| TouchdownPlay {
                    league_id: league_id.to_string(),
                    entrant_id: entrant_id.to_string(),
                    player_id: *player_id,
                    player_name: stats.get(player_id).map(|line| line.player_name.clone()).unwrap_or_default(),
                    points_gained: gained,
                })
            })
            .collect();
        plays.sort_by_key(|play| play.player_id);
        plays
    }
}

/// The player whose points moved the most explains the change. Ties go to the
/// lowest player id so the attribution is stable across polls.
fn attribute_change(
    previous: &HashMap<PlayerId, Decimal>,
    current: &HashMap<PlayerId, Decimal>,
    stats: &StatSnapshot,
) -> StatRef {
    let players: BTreeSet<PlayerId> = previous.keys().chain(current.keys()).copied().collect();

    let mut best: Option<(PlayerId, Decimal)> = None;
    for player_id in players {
        let before = previous.get(&player_id).copied().unwrap_or(Decimal::ZERO);
        let after = current.get(&player_id).copied().unwrap_or(Decimal::ZERO);
        let moved = (after - before).abs();
        if moved.is_zero() {
            continue;
        }
        if best.map_or(true, |(_, best_moved)| moved > best_moved) {
            best = Some((player_id, moved));
        }
    }

    match best {
        Some((player_id, _)) => match stats.get(&player_id) {
            Some(line) => StatRef {
                player_id: Some(player_id),
                player_name: Some(line.player_name.clone()),
                stat_update: line.describe(),
            },
            None => StatRef { player_id: Some(player_id), player_name: None, stat_update: "removed".to_string() },
        },
        None => StatRef::roster(),
    }
}

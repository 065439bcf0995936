//! League ranking with standard competition ranks

use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::models::{EntrantId, RankChange, RankedEntrant, Roster};
use crate::state::LeagueState;

/// Every rostered entrant takes part in the ranking; those without a score yet rank at zero
pub fn with_rostered_entrants(mut scores: HashMap<EntrantId, Decimal>, rosters: &[Roster]) -> HashMap<EntrantId, Decimal> {
    for roster in rosters {
        scores.entry(roster.entrant_id.clone()).or_insert(Decimal::ZERO);
    }
    scores
}

/// Sort entrants by score (descending, then entrant id) and assign standard
/// competition ranks: equal scores share a rank and the next distinct score
/// takes its 1-based position, so [120.5, 120.5, 99.0] ranks as [1, 1, 3].
pub fn rank_entrants(scores: &HashMap<EntrantId, Decimal>) -> Vec<RankedEntrant> {
    let mut sorted: Vec<(&EntrantId, &Decimal)> = scores.iter().collect();
    sorted.sort_by(|(a_id, a_score), (b_id, b_score)| b_score.cmp(a_score).then_with(|| a_id.cmp(b_id)));

    let leader_score = sorted.first().map(|(_, score)| **score).unwrap_or(Decimal::ZERO);

    let mut ranked = Vec::with_capacity(sorted.len());
    let mut rank = 0u32;
    let mut last_score: Option<Decimal> = None;
    for (position, (entrant_id, score)) in sorted.into_iter().enumerate() {
        if last_score != Some(*score) {
            rank = position as u32 + 1;
            last_score = Some(*score);
        }
        ranked.push(RankedEntrant {
            entrant_id: entrant_id.clone(),
            rank,
            score: *score,
            points_behind_leader: leader_score - *score,
        });
    }
    ranked
}

/// Output of one ranking pass
#[derive(Debug, Clone, Default)]
pub struct RankingOutcome {
    pub ranked: Vec<RankedEntrant>,
    pub changes: Vec<RankChange>,
}

impl RankingOutcome {
    pub fn leader(&self) -> Option<&RankedEntrant> {
        self.ranked.first()
    }
}

/// Rank every entrant of a league and diff against the previous cycle.
///
/// Entrants seen for the first time default their previous rank to the new
/// one and so produce no change. The league's rank cache is replaced only
/// after every diff has been computed.
pub async fn update_rankings(league: &LeagueState, scores: &HashMap<EntrantId, Decimal>) -> RankingOutcome {
    let ranked = rank_entrants(scores);
    let leader_name = ranked.first().map(|leader| leader.entrant_id.clone()).unwrap_or_default();

    let changes: Vec<RankChange> = {
        let history = league.rank_history().await;
        ranked
            .iter()
            .filter_map(|entry| {
                let previous_rank = history.current.get(&entry.entrant_id).copied().unwrap_or(entry.rank);
                (previous_rank != entry.rank).then(|| RankChange {
                    entrant_id: entry.entrant_id.clone(),
                    league_id: league.league_id().to_string(),
                    previous_rank,
                    new_rank: entry.rank,
                    leader_name: leader_name.clone(),
                    points_behind_leader: entry.points_behind_leader,
                    current_score: entry.score,
                })
            })
            .collect()
    };

    let ranks = ranked.iter().map(|entry| (entry.entrant_id.clone(), entry.rank)).collect();
    league.replace_ranks(ranks).await;

    RankingOutcome { ranked, changes }
}

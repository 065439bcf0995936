//! Roster scoring
//!
//! A roster's score is the sum over its filled slots of each player's fantasy
//! points under the configured formula, plus the yardage bonuses that player's
//! stat line earns. Unfilled slots and players without a stat record score zero.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::models::{PlayerId, PlayerStatLine, Position, Roster, StatSnapshot};

/// Point-per-reception scoring formula
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PprFormula {
    // Passing: points per yard (0.04 = 1 point per 25 yards)
    pub passing_yard_points: Decimal,
    pub passing_touchdown_points: Decimal,
    pub interception_points: Decimal,

    // Rushing
    pub rushing_yard_points: Decimal,
    pub rushing_touchdown_points: Decimal,

    // Receiving
    pub receiving_yard_points: Decimal,
    pub receiving_touchdown_points: Decimal,
    pub reception_points: Decimal,

    // Misc
    pub two_point_conversion_points: Decimal,
    pub fumble_lost_points: Decimal,

    // Kicking
    pub field_goal_0_39_points: Decimal,
    pub field_goal_40_49_points: Decimal,
    pub field_goal_50_plus_points: Decimal,
    pub extra_point_points: Decimal,

    // Team defense
    pub sack_points: Decimal,
    pub defensive_interception_points: Decimal,
    pub fumble_recovery_points: Decimal,
    pub defensive_touchdown_points: Decimal,
    pub safety_points: Decimal,
    pub points_allowed_tiers: Vec<PointsAllowedTier>,
}

/// Defense points for allowing at most `max_points_allowed` (None = no upper bound)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointsAllowedTier {
    pub max_points_allowed: Option<i32>,
    pub points: Decimal,
}

/// Stat a yardage bonus is measured on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YardageStat {
    Passing,
    Rushing,
    Receiving,
}

/// Bonus awarded once a stat line reaches `threshold` yards. Tiers are cumulative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YardageBonus {
    pub stat: YardageStat,
    pub threshold: i32,
    pub points: Decimal,
}

/// Complete scoring configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringRules {
    /// Formula used for every position without an override
    pub default_formula: PprFormula,

    /// Per-position formula overrides
    pub position_formulas: HashMap<Position, PprFormula>,

    /// Yardage bonuses applied to every stat line
    pub bonuses: Vec<YardageBonus>,
}

impl Default for PprFormula {
    fn default() -> Self {
        Self {
            passing_yard_points: dec!(0.04),
            passing_touchdown_points: dec!(4),
            interception_points: dec!(-2),
            rushing_yard_points: dec!(0.1),
            rushing_touchdown_points: dec!(6),
            receiving_yard_points: dec!(0.1),
            receiving_touchdown_points: dec!(6),
            reception_points: dec!(1),
            two_point_conversion_points: dec!(2),
            fumble_lost_points: dec!(-2),
            field_goal_0_39_points: dec!(3),
            field_goal_40_49_points: dec!(4),
            field_goal_50_plus_points: dec!(5),
            extra_point_points: dec!(1),
            sack_points: dec!(1),
            defensive_interception_points: dec!(2),
            fumble_recovery_points: dec!(2),
            defensive_touchdown_points: dec!(6),
            safety_points: dec!(2),
            points_allowed_tiers: vec![
                PointsAllowedTier { max_points_allowed: Some(0), points: dec!(10) },
                PointsAllowedTier { max_points_allowed: Some(6), points: dec!(7) },
                PointsAllowedTier { max_points_allowed: Some(13), points: dec!(4) },
                PointsAllowedTier { max_points_allowed: Some(20), points: dec!(1) },
                PointsAllowedTier { max_points_allowed: Some(27), points: dec!(0) },
                PointsAllowedTier { max_points_allowed: None, points: dec!(-4) },
            ],
        }
    }
}

impl Default for ScoringRules {
    fn default() -> Self {
        Self {
            default_formula: PprFormula::default(),
            position_formulas: HashMap::new(),
            bonuses: vec![
                YardageBonus { stat: YardageStat::Passing, threshold: 300, points: dec!(3) },
                YardageBonus { stat: YardageStat::Passing, threshold: 400, points: dec!(3) },
                YardageBonus { stat: YardageStat::Rushing, threshold: 100, points: dec!(3) },
                YardageBonus { stat: YardageStat::Rushing, threshold: 200, points: dec!(3) },
                YardageBonus { stat: YardageStat::Receiving, threshold: 100, points: dec!(3) },
                YardageBonus { stat: YardageStat::Receiving, threshold: 200, points: dec!(3) },
            ],
        }
    }
}

impl PprFormula {
    /// Base fantasy points for a stat line, before bonuses
    pub fn points(&self, line: &PlayerStatLine) -> Decimal {
        let n = |value: i32| Decimal::from(value);

        let mut points = Decimal::ZERO;

        points += n(line.passing_yards) * self.passing_yard_points;
        points += n(line.passing_touchdowns) * self.passing_touchdown_points;
        points += n(line.interceptions) * self.interception_points;

        points += n(line.rushing_yards) * self.rushing_yard_points;
        points += n(line.rushing_touchdowns) * self.rushing_touchdown_points;

        points += n(line.receiving_yards) * self.receiving_yard_points;
        points += n(line.receiving_touchdowns) * self.receiving_touchdown_points;
        points += n(line.receptions) * self.reception_points;

        points += n(line.two_point_conversions) * self.two_point_conversion_points;
        points += n(line.fumbles_lost) * self.fumble_lost_points;

        points += n(line.field_goals_0_39) * self.field_goal_0_39_points;
        points += n(line.field_goals_40_49) * self.field_goal_40_49_points;
        points += n(line.field_goals_50_plus) * self.field_goal_50_plus_points;
        points += n(line.extra_points_made) * self.extra_point_points;

        points += n(line.sacks) * self.sack_points;
        points += n(line.defensive_interceptions) * self.defensive_interception_points;
        points += n(line.fumble_recoveries) * self.fumble_recovery_points;
        points += n(line.defensive_touchdowns) * self.defensive_touchdown_points;
        points += n(line.safeties) * self.safety_points;

        if let Some(allowed) = line.points_allowed {
            points += self.points_allowed_score(allowed);
        }

        points
    }

    /// Tiers are checked in order; the first tier whose bound covers `allowed` wins
    pub fn points_allowed_score(&self, allowed: i32) -> Decimal {
        self.points_allowed_tiers
            .iter()
            .find(|tier| tier.max_points_allowed.map_or(true, |max| allowed <= max))
            .map(|tier| tier.points)
            .unwrap_or(Decimal::ZERO)
    }
}

impl ScoringRules {
    /// Sum of every bonus tier the stat line has reached
    pub fn bonus_points(&self, line: &PlayerStatLine) -> Decimal {
        self.bonuses
            .iter()
            .filter(|bonus| {
                let yards = match bonus.stat {
                    YardageStat::Passing => line.passing_yards,
                    YardageStat::Rushing => line.rushing_yards,
                    YardageStat::Receiving => line.receiving_yards,
                };
                yards >= bonus.threshold
            })
            .map(|bonus| bonus.points)
            .sum()
    }

    fn formula_for(&self, position: Option<Position>) -> &PprFormula {
        position
            .and_then(|position| self.position_formulas.get(&position))
            .unwrap_or(&self.default_formula)
    }
}

/// Fallback for legacy feeds that do not tag a player's position.
///
/// Looks at which stat groups are populated: passing → QB, kicking → K,
/// team-defense → DEF, otherwise the larger of rushing and receiving yardage
/// decides between RB and WR. Tight ends cannot be told apart from receivers
/// and come back as WR. Returns `None` for an empty stat line.
pub fn infer_position(line: &PlayerStatLine) -> Option<Position> {
    if line.passing_yards != 0 || line.passing_touchdowns != 0 || line.interceptions != 0 {
        return Some(Position::QB);
    }

    if line.field_goals_0_39 + line.field_goals_40_49 + line.field_goals_50_plus + line.extra_points_made > 0 {
        return Some(Position::K);
    }

    if line.points_allowed.is_some()
        || line.sacks + line.defensive_interceptions + line.fumble_recoveries + line.safeties > 0
    {
        return Some(Position::DEF);
    }

    let rushing = line.rushing_yards + line.rushing_touchdowns;
    let receiving = line.receiving_yards + line.receptions + line.receiving_touchdowns;
    match (rushing, receiving) {
        (0, 0) => None,
        (rush, rec) if rush >= rec => Some(Position::RB),
        _ => Some(Position::WR),
    }
}

/// Score of one roster plus its per-player breakdown
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RosterScore {
    pub total: Decimal,
    pub player_points: HashMap<PlayerId, Decimal>,
}

/// Computes entrant scores from lineups and a stat snapshot
#[derive(Debug, Clone)]
pub struct RosterScorer {
    rules: ScoringRules,
}

impl RosterScorer {
    pub fn new(rules: ScoringRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &ScoringRules {
        &self.rules
    }

    /// Fantasy points for one stat line, bonuses included, rounded to hundredths
    pub fn player_points(&self, line: &PlayerStatLine) -> Decimal {
        let position = match line.position {
            Some(position) => Some(position),
            None => {
                let inferred = infer_position(line);
                match inferred {
                    Some(position) => {
                        debug!(player_id = line.player_id, %position, "Inferred untagged player position");
                    }
                    None => {
                        warn!(
                            player_id = line.player_id,
                            "Unable to infer player position, using default formula"
                        );
                    }
                }
                inferred
            }
        };

        let formula = self.rules.formula_for(position);
        (formula.points(line) + self.rules.bonus_points(line)).round_dp(2)
    }

    /// Score a roster. Malformed rosters score zero so one bad entrant never
    /// aborts the cycle for the rest of the league.
    pub fn score_roster(&self, roster: &Roster, stats: &StatSnapshot) -> RosterScore {
        if let Err(e) = roster.validate() {
            warn!(entrant_id = %roster.entrant_id, error = %e, "Malformed roster scored as zero");
            return RosterScore::default();
        }

        let mut score = RosterScore::default();
        for player_id in roster.filled_player_ids() {
            let Some(line) = stats.get(&player_id) else {
                continue;
            };
            let points = self.player_points(line);
            score.total += points;
            score.player_points.insert(player_id, points);
        }

        score.total = score.total.round_dp(2);
        score
    }
}

impl Default for RosterScorer {
    fn default() -> Self {
        Self::new(ScoringRules::default())
    }
}

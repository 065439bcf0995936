//! Domain types shared by the scoring, ranking and notification components

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{LiveScoringError, Result};

pub type LeagueId = String;
pub type EntrantId = String;
pub type UserId = String;
/// External (stats provider) player id
pub type PlayerId = i64;
/// External (stats provider) game id
pub type GameId = String;

/// Full stat snapshot for one week, keyed by external player id
pub type StatSnapshot = HashMap<PlayerId, PlayerStatLine>;

/// Index a flat list of stat lines by player id. Later lines win.
pub fn index_stats(lines: Vec<PlayerStatLine>) -> StatSnapshot {
    lines.into_iter().map(|line| (line.player_id, line)).collect()
}

/// Scoring status of an entrant for the current week
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScoreStatus {
    Live,
    Final,
}

impl ScoreStatus {
    pub fn is_final(&self) -> bool {
        matches!(self, ScoreStatus::Final)
    }
}

/// Stat category of a player, supplied by the data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Position {
    QB,
    RB,
    WR,
    TE,
    K,
    DEF,
}

impl FromStr for Position {
    type Err = LiveScoringError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "QB" => Ok(Position::QB),
            "RB" | "FB" => Ok(Position::RB),
            "WR" => Ok(Position::WR),
            "TE" => Ok(Position::TE),
            "K" | "PK" => Ok(Position::K),
            "DEF" | "DST" | "D/ST" => Ok(Position::DEF),
            other => Err(LiveScoringError::StatsSource(format!("unknown position '{}'", other))),
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Position::QB => "QB",
            Position::RB => "RB",
            Position::WR => "WR",
            Position::TE => "TE",
            Position::K => "K",
            Position::DEF => "DEF",
        };
        f.write_str(label)
    }
}

/// Status of an external game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameStatus {
    Scheduled,
    InProgress,
    Halftime,
    Final,
    FinalOvertime,
    Postponed,
    Cancelled,
}

impl GameStatus {
    /// Terminal games will not produce further stat changes
    pub fn is_terminal(&self) -> bool {
        matches!(self, GameStatus::Final | GameStatus::FinalOvertime | GameStatus::Cancelled)
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, GameStatus::InProgress | GameStatus::Halftime)
    }

    pub fn is_overtime(&self) -> bool {
        matches!(self, GameStatus::FinalOvertime)
    }
}

/// One player's counting stats for the current week
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerStatLine {
    pub player_id: PlayerId,
    pub player_name: String,
    pub position: Option<Position>,
    pub game_id: Option<GameId>,

    // Passing
    pub passing_yards: i32,
    pub passing_touchdowns: i32,
    pub interceptions: i32,

    // Rushing
    pub rushing_yards: i32,
    pub rushing_touchdowns: i32,

    // Receiving
    pub receptions: i32,
    pub receiving_yards: i32,
    pub receiving_touchdowns: i32,

    // Misc
    pub two_point_conversions: i32,
    pub fumbles_lost: i32,

    // Kicking
    pub field_goals_0_39: i32,
    pub field_goals_40_49: i32,
    pub field_goals_50_plus: i32,
    pub extra_points_made: i32,

    // Team defense
    pub sacks: i32,
    pub defensive_interceptions: i32,
    pub fumble_recoveries: i32,
    pub defensive_touchdowns: i32,
    pub safeties: i32,
    pub points_allowed: Option<i32>,
}

impl PlayerStatLine {
    pub fn new(player_id: PlayerId, player_name: impl Into<String>) -> Self {
        Self { player_id, player_name: player_name.into(), ..Default::default() }
    }

    /// Compact description of the non-zero stats, used to key score changes
    pub fn describe(&self) -> String {
        let fields = [
            ("pass_yds", self.passing_yards),
            ("pass_td", self.passing_touchdowns),
            ("int", self.interceptions),
            ("rush_yds", self.rushing_yards),
            ("rush_td", self.rushing_touchdowns),
            ("rec", self.receptions),
            ("rec_yds", self.receiving_yards),
            ("rec_td", self.receiving_touchdowns),
            ("2pt", self.two_point_conversions),
            ("fum_lost", self.fumbles_lost),
            ("fg_0_39", self.field_goals_0_39),
            ("fg_40_49", self.field_goals_40_49),
            ("fg_50", self.field_goals_50_plus),
            ("xp", self.extra_points_made),
            ("sack", self.sacks),
            ("def_int", self.defensive_interceptions),
            ("fum_rec", self.fumble_recoveries),
            ("def_td", self.defensive_touchdowns),
            ("safety", self.safeties),
        ];

        let mut parts: Vec<String> = fields
            .iter()
            .filter(|(_, value)| *value != 0)
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        if let Some(points_allowed) = self.points_allowed {
            parts.push(format!("pa={}", points_allowed));
        }

        if parts.is_empty() {
            "no_stats".to_string()
        } else {
            parts.join(" ")
        }
    }
}

/// One lineup position, optionally filled with an external player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterSlot {
    /// Slot label, e.g. "QB", "FLEX"
    pub slot: String,
    pub player_id: Option<PlayerId>,
}

impl RosterSlot {
    pub fn filled(slot: impl Into<String>, player_id: PlayerId) -> Self {
        Self { slot: slot.into(), player_id: Some(player_id) }
    }

    pub fn empty(slot: impl Into<String>) -> Self {
        Self { slot: slot.into(), player_id: None }
    }

    pub fn is_filled(&self) -> bool {
        self.player_id.is_some()
    }
}

/// An entrant's lineup within one league
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    pub entrant_id: EntrantId,
    pub league_id: LeagueId,
    pub slots: Vec<RosterSlot>,
}

impl Roster {
    pub fn new(entrant_id: impl Into<EntrantId>, league_id: impl Into<LeagueId>, slots: Vec<RosterSlot>) -> Self {
        Self { entrant_id: entrant_id.into(), league_id: league_id.into(), slots }
    }

    /// External player ids of every filled slot, in slot order
    pub fn filled_player_ids(&self) -> Vec<PlayerId> {
        self.slots.iter().filter_map(|slot| slot.player_id).collect()
    }

    /// Reject rosters that cannot be scored meaningfully
    pub fn validate(&self) -> Result<()> {
        if self.entrant_id.trim().is_empty() {
            return Err(LiveScoringError::MalformedRoster {
                entrant_id: self.entrant_id.clone(),
                reason: "missing entrant id".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for player_id in self.filled_player_ids() {
            if !seen.insert(player_id) {
                return Err(LiveScoringError::MalformedRoster {
                    entrant_id: self.entrant_id.clone(),
                    reason: format!("player {} appears in more than one slot", player_id),
                });
            }
        }

        Ok(())
    }
}

/// The stat update a score change is attributed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatRef {
    pub player_id: Option<PlayerId>,
    pub player_name: Option<String>,
    pub stat_update: String,
}

impl StatRef {
    /// Change not attributable to a single player (e.g. a player was dropped)
    pub fn roster() -> Self {
        Self { player_id: None, player_name: None, stat_update: "roster".to_string() }
    }
}

/// Persisted record of one entrant's score change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    pub id: Uuid,
    pub entrant_id: EntrantId,
    pub league_id: LeagueId,
    pub previous_score: Decimal,
    pub new_score: Decimal,
    pub delta: Decimal,
    pub status: ScoreStatus,
    pub idempotency_key: String,
    pub source: StatRef,
    pub timestamp: DateTime<Utc>,
}

impl ScoreSnapshot {
    pub fn is_positive_change(&self) -> bool {
        self.delta > Decimal::ZERO
    }

    /// Score went down, typically a stat correction
    pub fn is_negative_change(&self) -> bool {
        self.delta < Decimal::ZERO
    }
}

/// One entrant's position in a fully ranked league
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntrant {
    pub entrant_id: EntrantId,
    pub rank: u32,
    pub score: Decimal,
    pub points_behind_leader: Decimal,
}

/// Emitted when an entrant's rank differs from the previous cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankChange {
    pub entrant_id: EntrantId,
    pub league_id: LeagueId,
    pub previous_rank: u32,
    pub new_rank: u32,
    pub leader_name: String,
    pub points_behind_leader: Decimal,
    pub current_score: Decimal,
}

impl RankChange {
    /// Positive means the entrant improved
    pub fn rank_delta(&self) -> i64 {
        i64::from(self.previous_rank) - i64::from(self.new_rank)
    }

    pub fn moved_up(&self) -> bool {
        self.new_rank < self.previous_rank
    }
}

/// Broadcast once per league when an external game reaches a terminal state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameCompletedEvent {
    pub league_id: LeagueId,
    pub game_id: GameId,
    pub overtime: bool,
    pub affected_entrants: Vec<EntrantId>,
    pub completed_at: DateTime<Utc>,
}

impl GameCompletedEvent {
    pub fn summary(&self) -> String {
        if self.overtime {
            format!("Game {} is final after overtime", self.game_id)
        } else {
            format!("Game {} is final", self.game_id)
        }
    }
}

//! SportsDataIO adapter for the live stats feed

use anyhow::{Context, Result as AnyResult};
use live_scoring::{
    GameId, GameStatus, LiveScoringError, PlayerId, PlayerStatLine, Position, Result, StatsSource,
};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::SportsDataIoConfig;

const API_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Player game stats as returned by `PlayerGameStatsByWeek`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SdioPlayerGameStats {
    #[serde(rename = "PlayerID")]
    pub player_id: i64,

    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "Position")]
    pub position: Option<String>,

    #[serde(rename = "GameKey")]
    pub game_key: Option<String>,

    #[serde(rename = "PassingYards")]
    pub passing_yards: f64,

    #[serde(rename = "PassingTouchdowns")]
    pub passing_touchdowns: f64,

    #[serde(rename = "PassingInterceptions")]
    pub passing_interceptions: f64,

    #[serde(rename = "RushingYards")]
    pub rushing_yards: f64,

    #[serde(rename = "RushingTouchdowns")]
    pub rushing_touchdowns: f64,

    #[serde(rename = "Receptions")]
    pub receptions: f64,

    #[serde(rename = "ReceivingYards")]
    pub receiving_yards: f64,

    #[serde(rename = "ReceivingTouchdowns")]
    pub receiving_touchdowns: f64,

    #[serde(rename = "TwoPointConversionPasses")]
    pub two_point_passes: f64,

    #[serde(rename = "TwoPointConversionRuns")]
    pub two_point_runs: f64,

    #[serde(rename = "TwoPointConversionReceptions")]
    pub two_point_receptions: f64,

    #[serde(rename = "FumblesLost")]
    pub fumbles_lost: f64,

    #[serde(rename = "FieldGoalsMade0to19")]
    pub field_goals_0_19: f64,

    #[serde(rename = "FieldGoalsMade20to29")]
    pub field_goals_20_29: f64,

    #[serde(rename = "FieldGoalsMade30to39")]
    pub field_goals_30_39: f64,

    #[serde(rename = "FieldGoalsMade40to49")]
    pub field_goals_40_49: f64,

    #[serde(rename = "FieldGoalsMade50Plus")]
    pub field_goals_50_plus: f64,

    #[serde(rename = "ExtraPointsMade")]
    pub extra_points_made: f64,
}

/// Team defense line as returned by `FantasyDefenseByGame`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SdioDefenseGameStats {
    #[serde(rename = "PlayerID")]
    pub player_id: i64,

    #[serde(rename = "Team")]
    pub team: String,

    #[serde(rename = "GameKey")]
    pub game_key: Option<String>,

    #[serde(rename = "Sacks")]
    pub sacks: f64,

    #[serde(rename = "Interceptions")]
    pub interceptions: f64,

    #[serde(rename = "FumblesRecovered")]
    pub fumbles_recovered: f64,

    #[serde(rename = "DefensiveTouchdowns")]
    pub defensive_touchdowns: f64,

    #[serde(rename = "Safeties")]
    pub safeties: f64,

    #[serde(rename = "PointsAllowed")]
    pub points_allowed: Option<f64>,
}

/// Game row as returned by `ScoresByWeek`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SdioScore {
    #[serde(rename = "GameKey")]
    pub game_key: String,

    #[serde(rename = "Status")]
    pub status: String,

    #[serde(rename = "Quarter")]
    pub quarter: Option<String>,

    #[serde(rename = "HasStarted")]
    pub has_started: bool,
}

fn stat(value: f64) -> i32 {
    value.round() as i32
}

impl SdioPlayerGameStats {
    pub fn into_stat_line(self) -> PlayerStatLine {
        // Defensive players and unknown labels are left for the scorer to infer
        let position = self.position.as_deref().and_then(|label| label.parse::<Position>().ok());

        PlayerStatLine {
            player_id: self.player_id,
            player_name: self.name,
            position,
            game_id: self.game_key,
            passing_yards: stat(self.passing_yards),
            passing_touchdowns: stat(self.passing_touchdowns),
            interceptions: stat(self.passing_interceptions),
            rushing_yards: stat(self.rushing_yards),
            rushing_touchdowns: stat(self.rushing_touchdowns),
            receptions: stat(self.receptions),
            receiving_yards: stat(self.receiving_yards),
            receiving_touchdowns: stat(self.receiving_touchdowns),
            two_point_conversions: stat(self.two_point_passes + self.two_point_runs + self.two_point_receptions),
            fumbles_lost: stat(self.fumbles_lost),
            field_goals_0_39: stat(self.field_goals_0_19 + self.field_goals_20_29 + self.field_goals_30_39),
            field_goals_40_49: stat(self.field_goals_40_49),
            field_goals_50_plus: stat(self.field_goals_50_plus),
            extra_points_made: stat(self.extra_points_made),
            ..Default::default()
        }
    }
}

impl SdioDefenseGameStats {
    pub fn into_stat_line(self) -> PlayerStatLine {
        PlayerStatLine {
            player_id: self.player_id,
            player_name: format!("{} D/ST", self.team),
            position: Some(Position::DEF),
            game_id: self.game_key,
            sacks: stat(self.sacks),
            defensive_interceptions: stat(self.interceptions),
            fumble_recoveries: stat(self.fumbles_recovered),
            defensive_touchdowns: stat(self.defensive_touchdowns),
            safeties: stat(self.safeties),
            points_allowed: self.points_allowed.map(stat),
            ..Default::default()
        }
    }
}

impl SdioScore {
    pub fn game_status(&self) -> GameStatus {
        match self.status.as_str() {
            "InProgress" if self.quarter.as_deref() == Some("Half") => GameStatus::Halftime,
            "InProgress" => GameStatus::InProgress,
            "Final" => GameStatus::Final,
            "F/OT" => GameStatus::FinalOvertime,
            "Canceled" | "Forfeit" => GameStatus::Cancelled,
            "Postponed" | "Suspended" => GameStatus::Postponed,
            "Delayed" if self.has_started => GameStatus::InProgress,
            _ => GameStatus::Scheduled,
        }
    }
}

/// Retry hint from a 429 response, falling back to `default_secs`
pub fn retry_after_secs(headers: &HeaderMap, default_secs: u32) -> u32 {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(default_secs)
}

/// Translate a non-success HTTP status into the engine's error taxonomy
pub fn status_error(status: StatusCode, headers: &HeaderMap, default_retry_after_secs: u32) -> LiveScoringError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        LiveScoringError::RateLimited { retry_after_secs: retry_after_secs(headers, default_retry_after_secs) }
    } else if status.is_server_error() {
        LiveScoringError::UpstreamUnavailable(format!("SportsDataIO returned {}", status))
    } else {
        LiveScoringError::StatsSource(format!("SportsDataIO returned {}", status))
    }
}

/// `StatsSource` backed by the SportsDataIO NFL API
pub struct SportsDataIoStatsSource {
    client: Client,
    base_url: String,
    api_key: String,
    default_retry_after_secs: u32,
    /// Week of the most recent weekly fetch, used to resolve single-game lookups
    last_week: RwLock<Option<(u32, u32)>>,
}

impl SportsDataIoStatsSource {
    pub fn new(config: &SportsDataIoConfig, api_key: String) -> AnyResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            default_retry_after_secs: config.default_retry_after_secs,
            last_week: RwLock::new(None),
        })
    }

    async fn send(&self, path: &str) -> Result<Response> {
        let url = format!("{}/{}", self.base_url, path);
        debug!("Fetching {}", url);

        let response = self.client.get(&url).header(API_KEY_HEADER, &self.api_key).send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                LiveScoringError::UpstreamUnavailable(format!("{}: {}", path, e))
            } else {
                LiveScoringError::StatsSource(format!("{}: {}", path, e))
            }
        })?;

        if !response.status().is_success() {
            return Err(status_error(response.status(), response.headers(), self.default_retry_after_secs));
        }

        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(path)
            .await?
            .json::<T>()
            .await
            .map_err(|e| LiveScoringError::StatsSource(format!("Failed to parse {}: {}", path, e)))
    }

    async fn weekly_stats(&self, week: u32, season: u32) -> Result<Vec<PlayerStatLine>> {
        *self.last_week.write().await = Some((week, season));

        let players: Vec<SdioPlayerGameStats> =
            self.get_json(&format!("stats/json/PlayerGameStatsByWeek/{}/{}", season, week)).await?;
        let mut lines: Vec<PlayerStatLine> = players.into_iter().map(SdioPlayerGameStats::into_stat_line).collect();

        // Team defenses are optional; offense still scores when the endpoint fails
        match self
            .get_json::<Vec<SdioDefenseGameStats>>(&format!("stats/json/FantasyDefenseByGame/{}/{}", season, week))
            .await
        {
            Ok(defenses) => lines.extend(defenses.into_iter().map(SdioDefenseGameStats::into_stat_line)),
            Err(e @ LiveScoringError::RateLimited { .. }) => return Err(e),
            Err(e) => warn!("Skipping team defense stats for week {}: {}", week, e),
        }

        info!("Fetched {} stat lines for week {} of {}", lines.len(), week, season);
        Ok(lines)
    }
}

#[async_trait::async_trait]
impl StatsSource for SportsDataIoStatsSource {
    async fn is_available(&self) -> bool {
        match self.send("scores/json/AreAnyGamesInProgress").await {
            Ok(_) => true,
            Err(e) => {
                warn!("SportsDataIO health check failed: {}", e);
                false
            }
        }
    }

    async fn games_in_progress(&self, week: u32, season: u32) -> Result<Vec<GameId>> {
        let mut games: Vec<GameId> = self
            .game_statuses(week, season)
            .await?
            .into_iter()
            .filter(|(_, status)| status.is_in_progress())
            .map(|(game_id, _)| game_id)
            .collect();
        games.sort();
        Ok(games)
    }

    async fn live_player_stats(&self, week: u32, season: u32) -> Result<Vec<PlayerStatLine>> {
        self.weekly_stats(week, season).await
    }

    async fn final_game_stats(&self, game_id: &str) -> Result<Vec<PlayerStatLine>> {
        let Some((week, season)) = *self.last_week.read().await else {
            return Err(LiveScoringError::StatsSource(format!(
                "No week fetched yet, cannot resolve game {}",
                game_id
            )));
        };

        Ok(self
            .weekly_stats(week, season)
            .await?
            .into_iter()
            .filter(|line| line.game_id.as_deref() == Some(game_id))
            .collect())
    }

    async fn game_statuses(&self, week: u32, season: u32) -> Result<HashMap<GameId, GameStatus>> {
        let scores: Vec<SdioScore> = self.get_json(&format!("scores/json/ScoresByWeek/{}/{}", season, week)).await?;
        Ok(scores.into_iter().map(|score| (score.game_key.clone(), score.game_status())).collect())
    }

    async fn player_stats(&self, player_ids: &[PlayerId], week: u32, season: u32) -> Result<Vec<PlayerStatLine>> {
        let wanted: HashSet<PlayerId> = player_ids.iter().copied().collect();
        Ok(self
            .weekly_stats(week, season)
            .await?
            .into_iter()
            .filter(|line| wanted.contains(&line.player_id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_player_stats_mapping() {
        let json = r#"{
            "PlayerID": 19801,
            "Name": "Josh Allen",
            "Position": "QB",
            "GameKey": "202510111",
            "PassingYards": 287.0,
            "PassingTouchdowns": 2.0,
            "PassingInterceptions": 1.0,
            "RushingYards": 41.0,
            "RushingTouchdowns": 1.0,
            "TwoPointConversionRuns": 1.0,
            "FumblesLost": 0.0,
            "FantasyPointsPPR": 29.18
        }"#;

        let raw: SdioPlayerGameStats = serde_json::from_str(json).unwrap();
        let line = raw.into_stat_line();

        assert_eq!(line.player_id, 19801);
        assert_eq!(line.position, Some(Position::QB));
        assert_eq!(line.game_id.as_deref(), Some("202510111"));
        assert_eq!(line.passing_yards, 287);
        assert_eq!(line.interceptions, 1);
        assert_eq!(line.rushing_touchdowns, 1);
        assert_eq!(line.two_point_conversions, 1);
        assert_eq!(line.receptions, 0);
    }

    #[test]
    fn test_kicker_buckets_and_unknown_position() {
        let kicker = SdioPlayerGameStats {
            player_id: 1,
            position: Some("K".to_string()),
            field_goals_20_29: 1.0,
            field_goals_30_39: 2.0,
            field_goals_50_plus: 1.0,
            extra_points_made: 3.0,
            ..Default::default()
        }
        .into_stat_line();
        assert_eq!(kicker.field_goals_0_39, 3);
        assert_eq!(kicker.field_goals_50_plus, 1);
        assert_eq!(kicker.extra_points_made, 3);

        let linebacker = SdioPlayerGameStats {
            player_id: 2,
            position: Some("LB".to_string()),
            ..Default::default()
        }
        .into_stat_line();
        assert_eq!(linebacker.position, None);
    }

    #[test]
    fn test_defense_mapping() {
        let json = r#"{"PlayerID": 90001, "Team": "BUF", "GameKey": "202510111",
            "Sacks": 4.0, "Interceptions": 2.0, "PointsAllowed": 13.0}"#;
        let line = serde_json::from_str::<SdioDefenseGameStats>(json).unwrap().into_stat_line();

        assert_eq!(line.position, Some(Position::DEF));
        assert_eq!(line.player_name, "BUF D/ST");
        assert_eq!(line.sacks, 4);
        assert_eq!(line.defensive_interceptions, 2);
        assert_eq!(line.points_allowed, Some(13));
    }

    #[test]
    fn test_game_status_mapping() {
        let score = |status: &str, quarter: Option<&str>, has_started: bool| SdioScore {
            game_key: "g".to_string(),
            status: status.to_string(),
            quarter: quarter.map(str::to_string),
            has_started,
        };

        assert_eq!(score("InProgress", Some("2"), true).game_status(), GameStatus::InProgress);
        assert_eq!(score("InProgress", Some("Half"), true).game_status(), GameStatus::Halftime);
        assert_eq!(score("Final", Some("F"), true).game_status(), GameStatus::Final);
        assert_eq!(score("F/OT", Some("F/OT"), true).game_status(), GameStatus::FinalOvertime);
        assert_eq!(score("Canceled", None, false).game_status(), GameStatus::Cancelled);
        assert_eq!(score("Postponed", None, false).game_status(), GameStatus::Postponed);
        assert_eq!(score("Delayed", None, false).game_status(), GameStatus::Scheduled);
        assert_eq!(score("Scheduled", None, false).game_status(), GameStatus::Scheduled);
    }

    #[test]
    fn test_status_errors() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, &headers, 60),
            LiveScoringError::RateLimited { retry_after_secs: 60 }
        ));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("90"));
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, &headers, 60),
            LiveScoringError::RateLimited { retry_after_secs: 90 }
        ));

        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, &headers, 60),
            LiveScoringError::UpstreamUnavailable(_)
        ));
        assert!(matches!(status_error(StatusCode::UNAUTHORIZED, &headers, 60), LiveScoringError::StatsSource(_)));
    }
}

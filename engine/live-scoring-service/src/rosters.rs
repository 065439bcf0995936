//! League rosters loaded from a JSON file

use anyhow::{Context, Result};
use live_scoring::memory::InMemoryRosterSource;
use live_scoring::{LeagueId, Roster, RosterSlot};
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct RosterFile {
    pub leagues: Vec<LeagueFile>,
}

#[derive(Debug, Deserialize)]
pub struct LeagueFile {
    pub league_id: LeagueId,
    pub entrants: Vec<EntrantFile>,
}

#[derive(Debug, Deserialize)]
pub struct EntrantFile {
    pub entrant_id: String,
    /// Owning user, if notifications should be delivered
    #[serde(default)]
    pub user_id: Option<String>,
    pub slots: Vec<RosterSlot>,
}

/// Parse a roster file into an in-memory roster source.
/// A non-empty `leagues` filter keeps only the named leagues.
pub fn load_rosters(path: &Path, leagues: &[String]) -> Result<InMemoryRosterSource> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read roster file {:?}", path))?;
    let file: RosterFile =
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse roster file {:?}", path))?;

    let source = InMemoryRosterSource::new();
    let mut loaded = 0;

    for league in file.leagues {
        if !leagues.is_empty() && !leagues.contains(&league.league_id) {
            continue;
        }

        let mut rosters = Vec::with_capacity(league.entrants.len());
        for entrant in league.entrants {
            if let Some(user_id) = &entrant.user_id {
                source.assign_owner(&entrant.entrant_id, user_id);
            }
            rosters.push(Roster::new(entrant.entrant_id, league.league_id.clone(), entrant.slots));
        }

        info!(league_id = %league.league_id, entrants = rosters.len(), "Loaded league rosters");
        source.set_rosters(&league.league_id, rosters);
        loaded += 1;
    }

    if loaded == 0 {
        warn!("No leagues loaded from {:?}", path);
    }

    Ok(source)
}

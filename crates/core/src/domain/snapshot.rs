use crate::domain::GenerationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    Goalkeeper,
    Defender,
    Midfielder,
    Forward,
}

impl Position {
    /// FPL `element_type` (1..=4).
    pub fn from_element_type(element_type: i32) -> Option<Self> {
        match element_type {
            1 => Some(Self::Goalkeeper),
            2 => Some(Self::Defender),
            3 => Some(Self::Midfielder),
            4 => Some(Self::Forward),
            _ => None,
        }
    }

    pub fn element_type(self) -> i32 {
        match self {
            Self::Goalkeeper => 1,
            Self::Defender => 2,
            Self::Midfielder => 3,
            Self::Forward => 4,
        }
    }

    pub fn short_name(self) -> &'static str {
        match self {
            Self::Goalkeeper => "GKP",
            Self::Defender => "DEF",
            Self::Midfielder => "MID",
            Self::Forward => "FWD",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    Doubtful,
    Injured,
    Suspended,
    Unavailable,
    NotInSquad,
}

impl Availability {
    /// FPL single-letter status code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "a" => Some(Self::Available),
            "d" => Some(Self::Doubtful),
            "i" => Some(Self::Injured),
            "s" => Some(Self::Suspended),
            "u" => Some(Self::Unavailable),
            "n" => Some(Self::NotInSquad),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Available => "a",
            Self::Doubtful => "d",
            Self::Injured => "i",
            Self::Suspended => "s",
            Self::Unavailable => "u",
            Self::NotInSquad => "n",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRecord {
    pub id: i32,
    pub name: String,
    pub short_name: String,
    pub strength: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: i32,
    pub name: String,
    pub team_id: i32,
    pub position: Position,
    pub form: f64,
    pub total_points: i32,
    pub points_per_game: f64,
    pub expected_points: Option<f64>,
    /// Price in tenths of a million (FPL `now_cost`).
    pub now_cost: i32,
    pub selected_by_percent: f64,
    pub status: Availability,
    pub chance_of_playing: Option<i32>,
}

impl PlayerRecord {
    pub fn price(&self) -> f64 {
        f64::from(self.now_cost) / 10.0
    }

    /// Captain eligibility. Available players always pass; doubtful ones only if their chance
    /// of playing is known and at least `min_chance`.
    pub fn is_eligible(&self, min_chance: i32) -> bool {
        match self.status {
            Availability::Available => true,
            Availability::Doubtful => self.chance_of_playing.is_some_and(|c| c >= min_chance),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureRecord {
    pub id: i32,
    pub gameweek: Option<i32>,
    pub home_team_id: i32,
    pub away_team_id: i32,
    pub kickoff_time: Option<DateTime<Utc>>,
    pub home_difficulty: i32,
    pub away_difficulty: i32,
    pub finished: bool,
}

impl FixtureRecord {
    pub fn involves(&self, team_id: i32) -> bool {
        self.home_team_id == team_id || self.away_team_id == team_id
    }
}

/// Reconciled league state for one generation. Every collection is unique by id and sorted
/// by id; use [`Snapshot::new`] to build one from unsorted records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub generation: GenerationId,
    pub teams: Vec<TeamRecord>,
    pub players: Vec<PlayerRecord>,
    pub fixtures: Vec<FixtureRecord>,
}

impl Snapshot {
    /// Later records win on duplicate ids.
    pub fn new(
        generation: GenerationId,
        teams: impl IntoIterator<Item = TeamRecord>,
        players: impl IntoIterator<Item = PlayerRecord>,
        fixtures: impl IntoIterator<Item = FixtureRecord>,
    ) -> Self {
        let teams: BTreeMap<i32, TeamRecord> = teams.into_iter().map(|t| (t.id, t)).collect();
        let players: BTreeMap<i32, PlayerRecord> =
            players.into_iter().map(|p| (p.id, p)).collect();
        let fixtures: BTreeMap<i32, FixtureRecord> =
            fixtures.into_iter().map(|f| (f.id, f)).collect();

        Self {
            generation,
            teams: teams.into_values().collect(),
            players: players.into_values().collect(),
            fixtures: fixtures.into_values().collect(),
        }
    }

    pub fn gameweek(&self) -> i32 {
        self.generation.gameweek
    }

    pub fn player(&self, id: i32) -> Option<&PlayerRecord> {
        self.players
            .binary_search_by_key(&id, |p| p.id)
            .ok()
            .map(|idx| &self.players[idx])
    }

    pub fn team(&self, id: i32) -> Option<&TeamRecord> {
        self.teams
            .binary_search_by_key(&id, |t| t.id)
            .ok()
            .map(|idx| &self.teams[idx])
    }

    /// Fixtures for `team_id` in the snapshot's target gameweek, by kickoff.
    pub fn fixtures_for(&self, team_id: i32) -> Vec<&FixtureRecord> {
        let gw = self.gameweek();
        let mut out: Vec<&FixtureRecord> = self
            .fixtures
            .iter()
            .filter(|f| f.gameweek == Some(gw) && f.involves(team_id))
            .collect();
        out.sort_by_key(|f| (f.kickoff_time, f.id));
        out
    }
}

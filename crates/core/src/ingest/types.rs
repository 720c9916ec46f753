use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Subset of `GET /bootstrap-static/` the pipeline reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapStatic {
    pub events: Vec<FplEvent>,
    pub teams: Vec<FplTeam>,
    pub elements: Vec<FplElement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FplEvent {
    pub id: i32,
    #[serde(default)]
    pub deadline_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_current: bool,
    #[serde(default)]
    pub is_next: bool,
    #[serde(default)]
    pub finished: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FplTeam {
    pub id: i32,
    pub name: String,
    pub short_name: String,
    #[serde(default)]
    pub strength: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FplElement {
    pub id: i32,
    pub web_name: String,
    pub team: i32,
    pub element_type: i32,
    #[serde(deserialize_with = "de_decimal")]
    pub form: f64,
    #[serde(default)]
    pub total_points: i32,
    #[serde(deserialize_with = "de_decimal")]
    pub points_per_game: f64,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub ep_next: Option<f64>,
    pub now_cost: i32,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub selected_by_percent: Option<f64>,
    pub status: String,
    #[serde(default)]
    pub chance_of_playing_next_round: Option<i32>,
}

/// One entry of `GET /fixtures/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FplFixture {
    pub id: i32,
    #[serde(default)]
    pub event: Option<i32>,
    pub team_h: i32,
    pub team_a: i32,
    #[serde(default)]
    pub kickoff_time: Option<DateTime<Utc>>,
    pub team_h_difficulty: i32,
    pub team_a_difficulty: i32,
    #[serde(default)]
    pub finished: bool,
}

/// Everything one sync needs from upstream, fetched together.
#[derive(Debug, Clone)]
pub struct UpstreamState {
    pub bootstrap: BootstrapStatic,
    pub fixtures: Vec<FplFixture>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Decimal {
    Num(f64),
    Str(String),
}

impl Decimal {
    fn into_f64<E: serde::de::Error>(self) -> Result<f64, E> {
        match self {
            Self::Num(n) => Ok(n),
            Self::Str(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| E::custom(format!("invalid decimal string: {s:?}"))),
        }
    }
}

// FPL encodes most decimals as strings ("5.2").
fn de_decimal<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    Decimal::deserialize(d)?.into_f64()
}

fn de_opt_decimal<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    match Option::<Decimal>::deserialize(d)? {
        Some(Decimal::Str(s)) if s.trim().is_empty() => Ok(None),
        Some(v) => v.into_f64().map(Some),
        None => Ok(None),
    }
}

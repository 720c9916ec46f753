use crate::domain::snapshot::{PlayerRecord, Snapshot};

mod form_fixture;

pub use form_fixture::FormFixtureScorer;

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreCard {
    pub score: f64,
    pub justification: Vec<String>,
}

/// Captaincy score for one player against the snapshot's target gameweek.
///
/// Implementations must be pure: the same player and snapshot always yield the same card.
pub trait ScoringFunction: Send + Sync {
    fn name(&self) -> &str;

    fn score(&self, player: &PlayerRecord, snapshot: &Snapshot) -> ScoreCard;
}

use crate::domain::GenerationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationArtifact {
    pub id: uuid::Uuid,
    pub generation: GenerationId,
    pub generated_at: DateTime<Utc>,
    pub scorer: String,
    pub picks: Vec<RankedPick>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPick {
    /// 1-based.
    pub rank: i32,
    pub player_id: i32,
    pub name: String,
    pub team_id: i32,
    pub now_cost: i32,
    pub score: f64,
    pub justification: Vec<String>,
}

impl RecommendationArtifact {
    pub fn pick(&self, player_id: i32) -> Option<&RankedPick> {
        self.picks.iter().find(|p| p.player_id == player_id)
    }
}

/// Ranking order: higher score first, then cheaper, then name, then player id.
///
/// Two distinct players never compare `Equal`, which makes the ranking total.
pub fn rank_order(a: &RankedPick, b: &RankedPick) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.now_cost.cmp(&b.now_cost))
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.player_id.cmp(&b.player_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pick(player_id: i32, name: &str, now_cost: i32, score: f64) -> RankedPick {
        RankedPick {
            rank: 0,
            player_id,
            name: name.to_string(),
            team_id: 1,
            now_cost,
            score,
            justification: vec![],
        }
    }

    #[test]
    fn ties_break_on_price_then_name_then_id() {
        let mut picks = vec![
            pick(4, "Saka", 100, 7.0),
            pick(3, "Palmer", 105, 7.0),
            pick(2, "Bowen", 100, 7.0),
            pick(1, "Haaland", 150, 9.5),
            pick(5, "Bowen", 100, 7.0),
        ];
        picks.sort_by(rank_order);

        let ids: Vec<i32> = picks.iter().map(|p| p.player_id).collect();
        assert_eq!(ids, vec![1, 2, 5, 4, 3]);
    }

    #[test]
    fn same_player_compares_equal() {
        let a = pick(1, "Salah", 130, 8.0);
        assert_eq!(rank_order(&a, &a.clone()), Ordering::Equal);
    }
}

use crate::domain::snapshot::{PlayerRecord, Snapshot};
use crate::scoring::{ScoreCard, ScoringFunction};

/// Weighted blend of form, points per game and expected points, scaled per fixture by how easy
/// the opponent is. Double gameweeks add up; a blank gameweek scores zero.
#[derive(Debug, Clone)]
pub struct FormFixtureScorer {
    pub form_weight: f64,
    pub ppg_weight: f64,
    pub expected_weight: f64,
    /// Multiplier change per difficulty step away from 3 (FDR runs 1..=5).
    pub difficulty_step: f64,
    pub home_bonus: f64,
}

impl Default for FormFixtureScorer {
    fn default() -> Self {
        Self {
            form_weight: 0.4,
            ppg_weight: 0.3,
            expected_weight: 0.3,
            difficulty_step: 0.1,
            home_bonus: 0.1,
        }
    }
}

impl FormFixtureScorer {
    fn base(&self, player: &PlayerRecord) -> f64 {
        // Without an expected-points figure, fall back to the season average.
        let expected = player.expected_points.unwrap_or(player.points_per_game);
        player.form * self.form_weight
            + player.points_per_game * self.ppg_weight
            + expected * self.expected_weight
    }

    fn fixture_multiplier(&self, difficulty: i32, home: bool) -> f64 {
        let difficulty = difficulty.clamp(1, 5);
        let mut m = 1.0 + f64::from(3 - difficulty) * self.difficulty_step;
        if home {
            m += self.home_bonus;
        }
        m
    }
}

impl ScoringFunction for FormFixtureScorer {
    fn name(&self) -> &str {
        "form_fixture_v1"
    }

    fn score(&self, player: &PlayerRecord, snapshot: &Snapshot) -> ScoreCard {
        let mut justification = vec![format!(
            "form {:.1}, {:.1} pts/game",
            player.form, player.points_per_game
        )];
        if let Some(ep) = player.expected_points {
            justification.push(format!("expected {ep:.1} pts"));
        }

        let fixtures = snapshot.fixtures_for(player.team_id);
        if fixtures.is_empty() {
            justification.push(format!("no fixture in GW{}", snapshot.gameweek()));
            return ScoreCard {
                score: 0.0,
                justification,
            };
        }

        let base = self.base(player);
        let mut score = 0.0;
        for f in fixtures {
            let home = f.home_team_id == player.team_id;
            let (opponent_id, difficulty) = if home {
                (f.away_team_id, f.home_difficulty)
            } else {
                (f.home_team_id, f.away_difficulty)
            };
            let opponent = snapshot
                .team(opponent_id)
                .map(|t| t.short_name.clone())
                .unwrap_or_else(|| format!("team {opponent_id}"));

            score += base * self.fixture_multiplier(difficulty, home);
            justification.push(format!(
                "vs {opponent} ({}) FDR {difficulty}",
                if home { "H" } else { "A" }
            ));
        }

        ScoreCard {
            score,
            justification,
        }
    }
}

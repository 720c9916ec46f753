use crate::config::PipelineSettings;
use crate::domain::recommendation::{rank_order, RankedPick, RecommendationArtifact};
use crate::domain::snapshot::Snapshot;
use crate::domain::GenerationId;
use crate::error::PipelineError;
use crate::pipeline::bounded;
use crate::scoring::ScoringFunction;
use crate::storage::PipelineStore;
use chrono::{DateTime, Utc};

/// Loads the snapshot committed for `generation` and ranks it. Nothing is persisted here.
pub async fn run_generate(
    store: &dyn PipelineStore,
    scorer: &dyn ScoringFunction,
    settings: &PipelineSettings,
    generation: GenerationId,
) -> Result<(Snapshot, RecommendationArtifact), PipelineError> {
    let snapshot = bounded(
        settings.store_timeout,
        "load snapshot",
        store.load_snapshot(generation),
    )
    .await
    .map_err(|e| PipelineError::store_read(&e))?
    .ok_or_else(|| PipelineError::StoreReadFailure(format!("no snapshot stored for {generation}")))?;

    let published = bounded(
        settings.store_timeout,
        "read published generation",
        store.published_generation(),
    )
    .await
    .map_err(|e| PipelineError::store_read(&e))?;

    if let Some(published) = published {
        if published >= generation {
            return Err(PipelineError::StaleGeneration {
                candidate: generation,
                newest: published,
            });
        }
    }

    let artifact = generate(&snapshot, scorer, settings, Utc::now())?;

    tracing::info!(
        generation = %artifact.generation,
        scorer = %artifact.scorer,
        picks = artifact.picks.len(),
        top = artifact.picks.first().map(|p| p.name.as_str()).unwrap_or(""),
        "recommendations generated"
    );

    Ok((snapshot, artifact))
}

/// Scores every eligible player and ranks them with [`rank_order`].
///
/// Deterministic for a given snapshot and scorer; only `id` and `generated_at` vary.
pub fn generate(
    snapshot: &Snapshot,
    scorer: &dyn ScoringFunction,
    settings: &PipelineSettings,
    generated_at: DateTime<Utc>,
) -> Result<RecommendationArtifact, PipelineError> {
    let mut picks: Vec<RankedPick> = Vec::new();
    let mut ineligible: usize = 0;

    for player in &snapshot.players {
        if !player.is_eligible(settings.min_chance_of_playing) {
            ineligible += 1;
            continue;
        }

        let card = scorer.score(player, snapshot);
        if !card.score.is_finite() {
            tracing::warn!(player_id = player.id, score = card.score, "non-finite score; skipping player");
            continue;
        }

        picks.push(RankedPick {
            rank: 0,
            player_id: player.id,
            name: player.name.clone(),
            team_id: player.team_id,
            now_cost: player.now_cost,
            score: card.score,
            justification: card.justification,
        });
    }

    tracing::debug!(
        eligible = picks.len(),
        ineligible,
        "filtered players for ranking"
    );

    if picks.len() < settings.min_eligible_players {
        return Err(PipelineError::InsufficientData {
            eligible: picks.len(),
            required: settings.min_eligible_players,
        });
    }

    picks.sort_by(rank_order);
    if let Some(limit) = settings.recommendation_limit {
        picks.truncate(limit);
    }
    for (idx, pick) in picks.iter_mut().enumerate() {
        pick.rank = (idx + 1) as i32;
    }

    Ok(RecommendationArtifact {
        id: uuid::Uuid::new_v4(),
        generation: snapshot.generation,
        generated_at,
        scorer: scorer.name().to_string(),
        picks,
    })
}

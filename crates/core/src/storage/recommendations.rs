use crate::domain::recommendation::{RankedPick, RecommendationArtifact};
use crate::domain::GenerationId;
use crate::storage::PromotionOutcome;
use anyhow::Context;
use chrono::{DateTime, Utc};

/// Inserts the artifact and compare-and-swaps the published pointer in one transaction. When
/// the swap loses, the transaction rolls back and the artifact is not kept.
pub async fn promote(
    pool: &sqlx::PgPool,
    artifact: &RecommendationArtifact,
) -> anyhow::Result<PromotionOutcome> {
    let g = artifact.generation;
    let mut tx = pool.begin().await.context("begin transaction failed")?;

    sqlx::query(
        "INSERT INTO recommendation_artifacts (id, gameweek, stamped_at, generated_at, scorer, pick_count) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .persistent(false)
    .bind(artifact.id)
    .bind(g.gameweek)
    .bind(g.stamped_at)
    .bind(artifact.generated_at)
    .bind(&artifact.scorer)
    .bind(artifact.picks.len() as i32)
    .execute(&mut *tx)
    .await
    .context("insert recommendation_artifacts failed")?;

    for chunk in artifact.picks.chunks(200) {
        let mut qb = sqlx::QueryBuilder::new(
            "INSERT INTO recommendation_picks (artifact_id, rank, player_id, name, team_id, now_cost, score, justification) ",
        );
        qb.push_values(chunk, |mut b, pick| {
            b.push_bind(artifact.id)
                .push_bind(pick.rank)
                .push_bind(pick.player_id)
                .push_bind(&pick.name)
                .push_bind(pick.team_id)
                .push_bind(pick.now_cost)
                .push_bind(pick.score)
                .push_bind(pick.justification.clone());
        });
        qb.build()
            .persistent(false)
            .execute(&mut *tx)
            .await
            .context("insert recommendation_picks failed")?;
    }

    let swapped = sqlx::query(
        "INSERT INTO published_artifact (slot, artifact_id, gameweek, stamped_at, promoted_at) \
         VALUES (1, $1, $2, $3, $4) \
         ON CONFLICT (slot) DO UPDATE \
           SET artifact_id = EXCLUDED.artifact_id, gameweek = EXCLUDED.gameweek, \
               stamped_at = EXCLUDED.stamped_at, promoted_at = EXCLUDED.promoted_at \
         WHERE (published_artifact.gameweek, published_artifact.stamped_at) \
             < (EXCLUDED.gameweek, EXCLUDED.stamped_at)",
    )
    .persistent(false)
    .bind(artifact.id)
    .bind(g.gameweek)
    .bind(g.stamped_at)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await
    .context("swap published_artifact failed")?
    .rows_affected();

    if swapped == 0 {
        let current = sqlx::query_as::<_, (i32, DateTime<Utc>)>(
            "SELECT gameweek, stamped_at FROM published_artifact WHERE slot = 1",
        )
        .persistent(false)
        .fetch_one(&mut *tx)
        .await
        .context("select published_artifact after lost swap failed")?;
        tx.rollback().await.context("rollback transaction failed")?;

        return Ok(PromotionOutcome::Superseded {
            current: GenerationId::new(current.0, current.1),
        });
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(PromotionOutcome::Promoted)
}

pub async fn published_generation(pool: &sqlx::PgPool) -> anyhow::Result<Option<GenerationId>> {
    let row = sqlx::query_as::<_, (i32, DateTime<Utc>)>(
        "SELECT gameweek, stamped_at FROM published_artifact WHERE slot = 1",
    )
    .persistent(false)
    .fetch_optional(pool)
    .await
    .context("select published_artifact failed")?;

    Ok(row.map(|(gameweek, stamped_at)| GenerationId::new(gameweek, stamped_at)))
}

pub async fn current_artifact(
    pool: &sqlx::PgPool,
) -> anyhow::Result<Option<RecommendationArtifact>> {
    // Picks are keyed by artifact id and never rewritten, so once the pointer is read the
    // picks cannot belong to another generation.
    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let row = sqlx::query_as::<_, (uuid::Uuid, i32, DateTime<Utc>, DateTime<Utc>, String)>(
        "SELECT a.id, a.gameweek, a.stamped_at, a.generated_at, a.scorer \
         FROM published_artifact p \
         JOIN recommendation_artifacts a ON a.id = p.artifact_id \
         WHERE p.slot = 1",
    )
    .persistent(false)
    .fetch_optional(&mut *tx)
    .await
    .context("select current artifact failed")?;

    let Some((id, gameweek, stamped_at, generated_at, scorer)) = row else {
        return Ok(None);
    };

    let picks = sqlx::query_as::<_, (i32, i32, String, i32, i32, f64, Vec<String>)>(
        "SELECT rank, player_id, name, team_id, now_cost, score, justification \
         FROM recommendation_picks \
         WHERE artifact_id = $1 \
         ORDER BY rank ASC",
    )
    .persistent(false)
    .bind(id)
    .fetch_all(&mut *tx)
    .await
    .context("select recommendation_picks failed")?
    .into_iter()
    .map(
        |(rank, player_id, name, team_id, now_cost, score, justification)| RankedPick {
            rank,
            player_id,
            name,
            team_id,
            now_cost,
            score,
            justification,
        },
    )
    .collect();

    tx.commit().await.context("commit transaction failed")?;

    Ok(Some(RecommendationArtifact {
        id,
        generation: GenerationId::new(gameweek, stamped_at),
        generated_at,
        scorer,
        picks,
    }))
}

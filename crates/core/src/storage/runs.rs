use crate::storage::RunRecord;
use anyhow::Context;

pub async fn record_run(pool: &sqlx::PgPool, run: &RunRecord) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO pipeline_runs (id, started_at, finished_at, state, failed_stage, error, gameweek, stamped_at, artifact_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .persistent(false)
    .bind(run.id)
    .bind(run.started_at)
    .bind(run.finished_at)
    .bind(&run.state)
    .bind(run.failed_stage.as_deref())
    .bind(run.error.as_deref())
    .bind(run.generation.map(|g| g.gameweek))
    .bind(run.generation.map(|g| g.stamped_at))
    .bind(run.artifact_id)
    .execute(pool)
    .await
    .context("insert pipeline_runs failed")?;

    Ok(())
}

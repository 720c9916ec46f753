use crate::domain::recommendation::RecommendationArtifact;
use crate::domain::snapshot::Snapshot;
use crate::domain::GenerationId;
use crate::storage::lock::RunLock;
use crate::storage::{recommendations, runs, snapshots, PipelineStore, PromotionOutcome, RunRecord};
use anyhow::Context;
use std::time::Duration;

#[derive(Debug)]
pub struct PgStore {
    pool: sqlx::PgPool,
    lock: RunLock,
}

impl PgStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        let lock = RunLock::new(pool.clone());
        Self { pool, lock }
    }

    pub async fn connect(database_url: &str, acquire_timeout: Duration) -> anyhow::Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await
            .context("connect database failed")?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl PipelineStore for PgStore {
    fn store_name(&self) -> &'static str {
        "postgres"
    }

    async fn try_acquire_run_lock(&self) -> anyhow::Result<bool> {
        self.lock.try_acquire().await
    }

    async fn release_run_lock(&self) -> anyhow::Result<()> {
        self.lock.release().await
    }

    async fn commit_snapshot(&self, snapshot: &Snapshot) -> anyhow::Result<()> {
        snapshots::commit_snapshot(&self.pool, snapshot).await
    }

    async fn load_snapshot(&self, generation: GenerationId) -> anyhow::Result<Option<Snapshot>> {
        snapshots::load_snapshot(&self.pool, generation).await
    }

    async fn latest_generation(&self) -> anyhow::Result<Option<GenerationId>> {
        snapshots::latest_generation(&self.pool).await
    }

    async fn latest_snapshot(&self) -> anyhow::Result<Option<Snapshot>> {
        match snapshots::latest_generation(&self.pool).await? {
            Some(g) => snapshots::load_snapshot(&self.pool, g).await,
            None => Ok(None),
        }
    }

    async fn published_generation(&self) -> anyhow::Result<Option<GenerationId>> {
        recommendations::published_generation(&self.pool).await
    }

    async fn current_artifact(&self) -> anyhow::Result<Option<RecommendationArtifact>> {
        recommendations::current_artifact(&self.pool).await
    }

    async fn promote(
        &self,
        artifact: &RecommendationArtifact,
    ) -> anyhow::Result<PromotionOutcome> {
        recommendations::promote(&self.pool, artifact).await
    }

    async fn record_run(&self, run: &RunRecord) -> anyhow::Result<()> {
        runs::record_run(&self.pool, run).await
    }
}

use crate::domain::recommendation::RecommendationArtifact;
use crate::domain::snapshot::Snapshot;
use crate::domain::GenerationId;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub mod lock;
pub mod memory;
pub mod postgres;
pub mod recommendations;
pub mod runs;
pub mod snapshots;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromotionOutcome {
    Promoted,
    /// The published pointer already holds `current`, which is not older than the candidate.
    Superseded { current: GenerationId },
}

/// Diagnostic row written once per run, whatever the outcome.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub id: uuid::Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub state: String,
    pub failed_stage: Option<String>,
    pub error: Option<String>,
    pub generation: Option<GenerationId>,
    pub artifact_id: Option<uuid::Uuid>,
}

/// Durable state shared by all runs.
///
/// Snapshot commits and promotions are atomic per generation. Readers only ever see a
/// generation that was committed in full.
#[async_trait::async_trait]
pub trait PipelineStore: Send + Sync {
    fn store_name(&self) -> &'static str;

    /// `Ok(false)` when another run holds the lock.
    async fn try_acquire_run_lock(&self) -> anyhow::Result<bool>;

    async fn release_run_lock(&self) -> anyhow::Result<()>;

    /// Replaces any rows already stored for the snapshot's generation. Fails if that generation
    /// is the published one: a published snapshot never changes.
    async fn commit_snapshot(&self, snapshot: &Snapshot) -> anyhow::Result<()>;

    async fn load_snapshot(&self, generation: GenerationId) -> anyhow::Result<Option<Snapshot>>;

    async fn latest_generation(&self) -> anyhow::Result<Option<GenerationId>>;

    async fn latest_snapshot(&self) -> anyhow::Result<Option<Snapshot>>;

    async fn published_generation(&self) -> anyhow::Result<Option<GenerationId>>;

    async fn current_artifact(&self) -> anyhow::Result<Option<RecommendationArtifact>>;

    /// Persists the artifact and moves the published pointer to it, only if the artifact's
    /// generation is strictly newer than the published one. Nothing is written otherwise.
    async fn promote(&self, artifact: &RecommendationArtifact)
        -> anyhow::Result<PromotionOutcome>;

    async fn record_run(&self, run: &RunRecord) -> anyhow::Result<()>;
}

use crate::config::PipelineSettings;
use crate::domain::GenerationId;
use crate::error::PipelineError;
use crate::ingest::UpstreamClient;
use crate::pipeline::sync::SyncRequest;
use crate::pipeline::{bounded, generate, sync, validate};
use crate::scoring::ScoringFunction;
use crate::storage::{PipelineStore, RunRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Exit code for a run refused because another run holds the lock (`EX_TEMPFAIL`).
pub const EXIT_RUN_IN_PROGRESS: i32 = 75;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Idle,
    Syncing,
    Generating,
    Validating,
    Published,
    Failed,
}

impl PipelineState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Generating => "generating",
            Self::Validating => "validating",
            Self::Published => "published",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Published | Self::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Lock,
    Sync,
    Generate,
    Validate,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lock => "lock",
            Self::Sync => "sync",
            Self::Generate => "generate",
            Self::Validate => "validate",
        }
    }
}

#[derive(Debug)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: PipelineError,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunRequest {
    pub gameweek: Option<i32>,
    /// Pins the generation stamp; defaults to the run start.
    pub stamped_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct RunReport {
    pub run_id: uuid::Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub state: PipelineState,
    /// Every state entered, starting with `Idle`.
    pub transitions: Vec<PipelineState>,
    pub generation: Option<GenerationId>,
    pub artifact_id: Option<uuid::Uuid>,
    pub picks: usize,
    pub failure: Option<StageFailure>,
}

impl RunReport {
    fn start() -> Self {
        let now = Utc::now();
        Self {
            run_id: uuid::Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            state: PipelineState::Idle,
            transitions: vec![PipelineState::Idle],
            generation: None,
            artifact_id: None,
            picks: 0,
            failure: None,
        }
    }

    fn enter(&mut self, state: PipelineState) {
        tracing::info!(run_id = %self.run_id, from = %self.state, to = %state, "pipeline state");
        self.state = state;
        self.transitions.push(state);
    }

    fn fail(&mut self, stage: Stage, error: PipelineError) {
        tracing::error!(run_id = %self.run_id, stage = stage.as_str(), error = %error, "pipeline stage failed");
        self.failure = Some(StageFailure { stage, error });
        self.enter(PipelineState::Failed);
    }

    pub fn published(&self) -> bool {
        self.state == PipelineState::Published
    }

    pub fn error(&self) -> Option<&PipelineError> {
        self.failure.as_ref().map(|f| &f.error)
    }

    pub fn exit_code(&self) -> i32 {
        match self.error() {
            None if self.published() => 0,
            Some(PipelineError::RunInProgress) => EXIT_RUN_IN_PROGRESS,
            _ => 1,
        }
    }

    /// One-line human summary with the finish timestamp.
    pub fn summary(&self) -> String {
        let ts = self.finished_at.format("%Y-%m-%dT%H:%M:%SZ");
        let elapsed = (self.finished_at - self.started_at).num_milliseconds();
        match (&self.failure, self.generation) {
            (None, Some(g)) => format!(
                "[{ts}] pipeline {}: {g}, {} picks, artifact {} ({elapsed} ms)",
                self.state,
                self.picks,
                self.artifact_id.map(|id| id.to_string()).unwrap_or_default(),
            ),
            (Some(f), _) => format!(
                "[{ts}] pipeline {} at {}: {} ({elapsed} ms)",
                self.state,
                f.stage.as_str(),
                f.error
            ),
            (None, None) => format!("[{ts}] pipeline {} ({elapsed} ms)", self.state),
        }
    }

    pub fn to_record(&self) -> RunRecord {
        RunRecord {
            id: self.run_id,
            started_at: self.started_at,
            finished_at: self.finished_at,
            state: self.state.as_str().to_string(),
            failed_stage: self.failure.as_ref().map(|f| f.stage.as_str().to_string()),
            error: self.failure.as_ref().map(|f| f.error.to_string()),
            generation: self.generation,
            artifact_id: self.artifact_id,
        }
    }
}

/// Runs the three stages in order under the store's run lock. Cheap to clone.
#[derive(Clone)]
pub struct Pipeline {
    upstream: Arc<dyn UpstreamClient>,
    store: Arc<dyn PipelineStore>,
    scorer: Arc<dyn ScoringFunction>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        upstream: Arc<dyn UpstreamClient>,
        store: Arc<dyn PipelineStore>,
        scorer: Arc<dyn ScoringFunction>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            upstream,
            store,
            scorer,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Always returns a report in a terminal state; never retries the whole pipeline.
    pub async fn run(&self, request: RunRequest) -> RunReport {
        let mut report = RunReport::start();

        let acquired = bounded(
            self.settings.store_timeout,
            "acquire run lock",
            self.store.try_acquire_run_lock(),
        )
        .await;

        match acquired {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(run_id = %report.run_id, "run lock not acquired; another run in progress");
                report.failure = Some(StageFailure {
                    stage: Stage::Lock,
                    error: PipelineError::RunInProgress,
                });
                report.enter(PipelineState::Failed);
                report.finished_at = Utc::now();
                return report;
            }
            Err(e) => {
                report.fail(Stage::Lock, PipelineError::store_read(&e));
                report.finished_at = Utc::now();
                return report;
            }
        }

        self.run_stages(&mut report, request).await;

        if let Err(e) = bounded(
            self.settings.store_timeout,
            "release run lock",
            self.store.release_run_lock(),
        )
        .await
        {
            let detail = format!("{e:#}");
            tracing::warn!(run_id = %report.run_id, error = %detail, "failed to release run lock");
        }

        report.finished_at = Utc::now();
        if let Err(e) = bounded(
            self.settings.store_timeout,
            "record run",
            self.store.record_run(&report.to_record()),
        )
        .await
        {
            let detail = format!("{e:#}");
            tracing::warn!(run_id = %report.run_id, error = %detail, "failed to record pipeline run");
        }

        report
    }

    async fn run_stages(&self, report: &mut RunReport, request: RunRequest) {
        report.enter(PipelineState::Syncing);
        let sync_request = SyncRequest {
            gameweek: request.gameweek,
            stamped_at: request.stamped_at.unwrap_or(report.started_at),
        };
        let synced = sync::run_sync(
            self.upstream.as_ref(),
            self.store.as_ref(),
            &self.settings,
            sync_request,
        )
        .await;
        let generation = match synced {
            Ok(snapshot) => snapshot.generation,
            Err(e) => return report.fail(Stage::Sync, e),
        };
        report.generation = Some(generation);

        report.enter(PipelineState::Generating);
        let generated = generate::run_generate(
            self.store.as_ref(),
            self.scorer.as_ref(),
            &self.settings,
            generation,
        )
        .await;
        let (snapshot, artifact) = match generated {
            Ok(out) => out,
            Err(e) => return report.fail(Stage::Generate, e),
        };

        report.enter(PipelineState::Validating);
        match validate::run_validate(self.store.as_ref(), &artifact, &snapshot, &self.settings)
            .await
        {
            Ok(_) => {
                report.artifact_id = Some(artifact.id);
                report.picks = artifact.picks.len();
                report.enter(PipelineState::Published);
            }
            Err(e) => report.fail(Stage::Validate, e),
        }
    }
}

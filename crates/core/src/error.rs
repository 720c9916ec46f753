use crate::domain::validation::Violation;
use crate::domain::GenerationId;
use thiserror::Error;

/// Stage-level failures. Adapters return `anyhow::Result`; stages convert at their boundary so
/// the orchestrator can branch on the kind.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("upstream unavailable after {attempts} attempt(s): {detail}")]
    UpstreamUnavailable { attempts: u32, detail: String },

    #[error("upstream returned unusable data: {0}")]
    UpstreamInvalid(String),

    #[error("store write failed: {0}")]
    StoreWriteFailure(String),

    #[error("store read failed: {0}")]
    StoreReadFailure(String),

    #[error("insufficient data: {eligible} eligible player(s), need at least {required}")]
    InsufficientData { eligible: usize, required: usize },

    /// `newest` is the published generation or the latest committed snapshot, whichever the
    /// candidate failed to advance past.
    #[error("generation {candidate} does not advance past {newest}")]
    StaleGeneration {
        candidate: GenerationId,
        newest: GenerationId,
    },

    #[error("validation failed: {}", join_violations(.0))]
    ValidationFailed(Vec<Violation>),

    #[error("another pipeline run is in progress")]
    RunInProgress,
}

impl PipelineError {
    pub fn store_write(err: &anyhow::Error) -> Self {
        Self::StoreWriteFailure(format!("{err:#}"))
    }

    pub fn store_read(err: &anyhow::Error) -> Self {
        Self::StoreReadFailure(format!("{err:#}"))
    }

    /// Whether a later run may succeed without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable { .. }
                | Self::StoreWriteFailure(_)
                | Self::StoreReadFailure(_)
                | Self::RunInProgress
        )
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_failed_lists_every_violation() {
        let err = PipelineError::ValidationFailed(vec![
            Violation::Empty,
            Violation::DuplicatePlayer {
                player_id: 7,
                ranks: vec![1, 2],
            },
        ]);
        let msg = err.to_string();
        assert!(msg.contains("no picks"), "{msg}");
        assert!(msg.contains("player 7 appears more than once"), "{msg}");
        assert!(!err.is_transient());
    }

    #[test]
    fn store_errors_keep_context_chain() {
        let inner = anyhow::anyhow!("connection reset").context("insert snapshot_players failed");
        let err = PipelineError::store_write(&inner);
        assert_eq!(
            err.to_string(),
            "store write failed: insert snapshot_players failed: connection reset"
        );
        assert!(err.is_transient());
    }
}

//! Sync → Generate → Validate, run in-process under a store-wide run lock.

use std::future::Future;
use std::time::Duration;

pub mod generate;
pub mod orchestrator;
pub mod sync;
pub mod validate;

pub use orchestrator::{Pipeline, PipelineState, RunReport, RunRequest, Stage, StageFailure};

/// Caps one network operation. Expiry becomes an ordinary error so callers map it like any
/// other failure of that operation.
pub(crate) async fn bounded<T, F>(limit: Duration, what: &str, fut: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => anyhow::bail!("{what} timed out after {}s", limit.as_secs_f64()),
    }
}

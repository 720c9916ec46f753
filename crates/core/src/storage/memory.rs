use crate::domain::recommendation::RecommendationArtifact;
use crate::domain::snapshot::Snapshot;
use crate::domain::GenerationId;
use crate::storage::{PipelineStore, PromotionOutcome, RunRecord};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// In-process store for `--dry-run` and tests. Same atomicity as [`super::PgStore`]: every
/// mutation happens under one lock acquisition.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    run_locked: AtomicBool,
    fail_writes: AtomicBool,
    read_stall_ms: AtomicU64,
    write_stall_ms: AtomicU64,
}

#[derive(Debug, Default)]
struct MemoryState {
    snapshots: BTreeMap<GenerationId, Snapshot>,
    published: Option<RecommendationArtifact>,
    snapshot_writes: usize,
    runs: Vec<RunRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail, to exercise store-failure paths.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Delays every snapshot/artifact read, to exercise store timeouts.
    pub fn stall_reads(&self, delay: Duration) {
        self.read_stall_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Delays every write before it is applied.
    pub fn stall_writes(&self, delay: Duration) {
        self.write_stall_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of successful snapshot commits, including overwrites.
    pub async fn snapshot_writes(&self) -> usize {
        self.state.lock().await.snapshot_writes
    }

    pub async fn snapshot_count(&self) -> usize {
        self.state.lock().await.snapshots.len()
    }

    pub async fn runs(&self) -> Vec<RunRecord> {
        self.state.lock().await.runs.clone()
    }

    async fn stall(&self, ms: &AtomicU64) {
        let ms = ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    fn check_writable(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.fail_writes.load(Ordering::SeqCst),
            "memory store is rejecting writes"
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl PipelineStore for MemoryStore {
    fn store_name(&self) -> &'static str {
        "memory"
    }

    async fn try_acquire_run_lock(&self) -> anyhow::Result<bool> {
        Ok(self
            .run_locked
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok())
    }

    async fn release_run_lock(&self) -> anyhow::Result<()> {
        self.run_locked.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn commit_snapshot(&self, snapshot: &Snapshot) -> anyhow::Result<()> {
        self.stall(&self.write_stall_ms).await;
        self.check_writable()?;
        let mut state = self.state.lock().await;
        if let Some(published) = state.published.as_ref().map(|a| a.generation) {
            anyhow::ensure!(
                published != snapshot.generation,
                "snapshot {published} is published and cannot be overwritten"
            );
        }
        state
            .snapshots
            .insert(snapshot.generation, snapshot.clone());
        state.snapshot_writes += 1;
        Ok(())
    }

    async fn load_snapshot(&self, generation: GenerationId) -> anyhow::Result<Option<Snapshot>> {
        self.stall(&self.read_stall_ms).await;
        Ok(self.state.lock().await.snapshots.get(&generation).cloned())
    }

    async fn latest_generation(&self) -> anyhow::Result<Option<GenerationId>> {
        self.stall(&self.read_stall_ms).await;
        Ok(self.state.lock().await.snapshots.keys().next_back().copied())
    }

    async fn latest_snapshot(&self) -> anyhow::Result<Option<Snapshot>> {
        self.stall(&self.read_stall_ms).await;
        Ok(self
            .state
            .lock()
            .await
            .snapshots
            .values()
            .next_back()
            .cloned())
    }

    async fn published_generation(&self) -> anyhow::Result<Option<GenerationId>> {
        self.stall(&self.read_stall_ms).await;
        Ok(self
            .state
            .lock()
            .await
            .published
            .as_ref()
            .map(|a| a.generation))
    }

    async fn current_artifact(&self) -> anyhow::Result<Option<RecommendationArtifact>> {
        self.stall(&self.read_stall_ms).await;
        Ok(self.state.lock().await.published.clone())
    }

    async fn promote(
        &self,
        artifact: &RecommendationArtifact,
    ) -> anyhow::Result<PromotionOutcome> {
        self.stall(&self.write_stall_ms).await;
        self.check_writable()?;
        let mut state = self.state.lock().await;
        anyhow::ensure!(
            state.snapshots.contains_key(&artifact.generation),
            "no snapshot stored for generation {}",
            artifact.generation
        );

        if let Some(current) = state.published.as_ref().map(|a| a.generation) {
            if current >= artifact.generation {
                return Ok(PromotionOutcome::Superseded { current });
            }
        }

        state.published = Some(artifact.clone());
        Ok(PromotionOutcome::Promoted)
    }

    async fn record_run(&self, run: &RunRecord) -> anyhow::Result<()> {
        self.check_writable()?;
        self.state.lock().await.runs.push(run.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn generation(gameweek: i32) -> GenerationId {
        GenerationId::new(gameweek, Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap())
    }

    fn artifact(gameweek: i32) -> RecommendationArtifact {
        RecommendationArtifact {
            id: uuid::Uuid::new_v4(),
            generation: generation(gameweek),
            generated_at: Utc::now(),
            scorer: "test".to_string(),
            picks: vec![],
        }
    }

    async fn store_with_snapshots(gameweeks: &[i32]) -> MemoryStore {
        let store = MemoryStore::new();
        for gw in gameweeks {
            store
                .commit_snapshot(&Snapshot::new(generation(*gw), vec![], vec![], vec![]))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn run_lock_is_exclusive_until_released() {
        let store = MemoryStore::new();
        assert!(store.try_acquire_run_lock().await.unwrap());
        assert!(!store.try_acquire_run_lock().await.unwrap());
        store.release_run_lock().await.unwrap();
        assert!(store.try_acquire_run_lock().await.unwrap());
    }

    #[tokio::test]
    async fn older_promotion_never_replaces_newer() {
        let store = store_with_snapshots(&[1, 2]).await;

        let newer = artifact(2);
        assert_eq!(store.promote(&newer).await.unwrap(), PromotionOutcome::Promoted);

        let older = artifact(1);
        assert_eq!(
            store.promote(&older).await.unwrap(),
            PromotionOutcome::Superseded {
                current: generation(2)
            }
        );
        assert_eq!(store.current_artifact().await.unwrap().unwrap().id, newer.id);
    }

    #[tokio::test]
    async fn recommit_same_generation_overwrites() {
        let store = store_with_snapshots(&[3, 3]).await;
        assert_eq!(store.snapshot_count().await, 1);
        assert_eq!(store.snapshot_writes().await, 2);
    }

    #[tokio::test]
    async fn published_snapshot_cannot_be_recommitted() {
        let store = store_with_snapshots(&[4]).await;
        let published = artifact(4);
        store.promote(&published).await.unwrap();

        let replacement = Snapshot::new(generation(4), vec![], vec![], vec![]);
        assert!(store.commit_snapshot(&replacement).await.is_err());
        assert_eq!(store.snapshot_writes().await, 1);

        store
            .commit_snapshot(&Snapshot::new(generation(5), vec![], vec![], vec![]))
            .await
            .unwrap();
        assert_eq!(store.latest_generation().await.unwrap(), Some(generation(5)));
    }

    #[tokio::test]
    async fn rejected_writes_leave_state_untouched() {
        let store = MemoryStore::new();
        store.fail_writes(true);
        let snap = Snapshot::new(generation(1), vec![], vec![], vec![]);
        assert!(store.commit_snapshot(&snap).await.is_err());
        assert!(store.latest_snapshot().await.unwrap().is_none());
    }
}

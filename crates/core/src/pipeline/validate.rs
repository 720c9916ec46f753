use crate::config::PipelineSettings;
use crate::domain::recommendation::{rank_order, RecommendationArtifact};
use crate::domain::snapshot::Snapshot;
use crate::domain::validation::{ValidationReport, Violation};
use crate::domain::GenerationId;
use crate::error::PipelineError;
use crate::pipeline::bounded;
use crate::storage::{PipelineStore, PromotionOutcome};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Checks the candidate and, only if every check passes, promotes it. On any failure the store
/// is left exactly as it was.
pub async fn run_validate(
    store: &dyn PipelineStore,
    artifact: &RecommendationArtifact,
    snapshot: &Snapshot,
    settings: &PipelineSettings,
) -> Result<ValidationReport, PipelineError> {
    let published = bounded(
        settings.store_timeout,
        "read published generation",
        store.published_generation(),
    )
    .await
    .map_err(|e| PipelineError::store_read(&e))?;

    let report = check(artifact, snapshot, published);
    if !report.passed() {
        for v in &report.violations {
            tracing::warn!(generation = %artifact.generation, violation = %v, "validation check failed");
        }
        return Err(PipelineError::ValidationFailed(report.violations));
    }

    let outcome = bounded(settings.store_timeout, "promote artifact", store.promote(artifact))
        .await
        .map_err(|e| PipelineError::store_write(&e))?;

    match outcome {
        PromotionOutcome::Promoted => {
            tracing::info!(
                generation = %artifact.generation,
                artifact_id = %artifact.id,
                picks = artifact.picks.len(),
                "artifact promoted to current"
            );
            Ok(report)
        }
        PromotionOutcome::Superseded { current } => {
            Err(PipelineError::ValidationFailed(vec![Violation::Superseded {
                candidate: artifact.generation,
                current,
            }]))
        }
    }
}

/// Pure invariant check of a candidate against its source snapshot.
pub fn check(
    artifact: &RecommendationArtifact,
    snapshot: &Snapshot,
    published: Option<GenerationId>,
) -> ValidationReport {
    let mut violations = Vec::new();

    if artifact.picks.is_empty() {
        violations.push(Violation::Empty);
    }

    if artifact.generation != snapshot.generation {
        violations.push(Violation::GenerationMismatch {
            artifact: artifact.generation,
            snapshot: snapshot.generation,
        });
    }

    if let Some(published) = published {
        if artifact.generation <= published {
            violations.push(Violation::NotNewerThanPublished {
                candidate: artifact.generation,
                published,
            });
        }
    }

    let mut seen: BTreeMap<i32, Vec<i32>> = BTreeMap::new();
    for (idx, pick) in artifact.picks.iter().enumerate() {
        let expected = (idx + 1) as i32;
        if pick.rank != expected {
            violations.push(Violation::RankGap {
                position: idx,
                expected,
                found: pick.rank,
            });
        }

        if snapshot.player(pick.player_id).is_none() {
            violations.push(Violation::UnknownPlayer {
                rank: pick.rank,
                player_id: pick.player_id,
            });
        }

        if !pick.score.is_finite() {
            violations.push(Violation::NonFiniteScore { rank: pick.rank });
        }

        seen.entry(pick.player_id).or_default().push(pick.rank);
    }

    for pair in artifact.picks.windows(2) {
        if rank_order(&pair[0], &pair[1]) != Ordering::Less {
            violations.push(Violation::OutOfOrder { rank: pair[1].rank });
        }
    }

    for (player_id, ranks) in seen {
        if ranks.len() > 1 {
            violations.push(Violation::DuplicatePlayer { player_id, ranks });
        }
    }

    ValidationReport {
        generation: artifact.generation,
        violations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::recommendation::RankedPick;
    use crate::domain::snapshot::fixtures::{player, team};
    use crate::storage::MemoryStore;
    use chrono::{TimeZone, Utc};

    fn generation(gameweek: i32) -> GenerationId {
        GenerationId::new(gameweek, Utc.with_ymd_and_hms(2025, 12, 1, 9, 0, 0).unwrap())
    }

    fn snapshot(gameweek: i32) -> Snapshot {
        Snapshot::new(
            generation(gameweek),
            vec![team(1, "ARS")],
            (1..=5).map(|i| player(i, &format!("P{i}"), 1, 50)),
            vec![],
        )
    }

    fn pick(rank: i32, player_id: i32, score: f64) -> RankedPick {
        RankedPick {
            rank,
            player_id,
            name: format!("P{player_id}"),
            team_id: 1,
            now_cost: 50,
            score,
            justification: vec![],
        }
    }

    fn artifact(gameweek: i32, picks: Vec<RankedPick>) -> RecommendationArtifact {
        RecommendationArtifact {
            id: uuid::Uuid::new_v4(),
            generation: generation(gameweek),
            generated_at: Utc::now(),
            scorer: "test".to_string(),
            picks,
        }
    }

    fn good(gameweek: i32) -> RecommendationArtifact {
        artifact(
            gameweek,
            vec![pick(1, 3, 9.0), pick(2, 1, 7.0), pick(3, 2, 7.0)],
        )
    }

    #[test]
    fn well_formed_artifact_passes() {
        let report = check(&good(2), &snapshot(2), Some(generation(1)));
        assert!(report.passed(), "{:?}", report.violations);
    }

    #[test]
    fn flags_unknown_player() {
        let a = artifact(2, vec![pick(1, 3, 9.0), pick(2, 99, 7.0)]);
        let report = check(&a, &snapshot(2), None);
        assert_eq!(
            report.violations,
            vec![Violation::UnknownPlayer {
                rank: 2,
                player_id: 99
            }]
        );
    }

    #[test]
    fn flags_duplicate_player_with_ranks() {
        let a = artifact(2, vec![pick(1, 3, 9.0), pick(2, 4, 8.0), pick(3, 3, 7.0)]);
        let report = check(&a, &snapshot(2), None);
        assert_eq!(
            report.violations,
            vec![Violation::DuplicatePlayer {
                player_id: 3,
                ranks: vec![1, 3]
            }]
        );
    }

    #[test]
    fn flags_ordering_and_rank_gaps() {
        // Equal score and price: P2 must come before P1 by name, not after.
        let a = artifact(2, vec![pick(1, 2, 7.0), pick(3, 1, 7.0)]);
        let report = check(&a, &snapshot(2), None);
        assert!(report.violations.contains(&Violation::RankGap {
            position: 1,
            expected: 2,
            found: 3
        }));
        assert!(report.violations.contains(&Violation::OutOfOrder { rank: 3 }));
    }

    #[test]
    fn flags_stale_and_mismatched_generation() {
        let report = check(&good(2), &snapshot(3), Some(generation(2)));
        assert!(report.violations.contains(&Violation::GenerationMismatch {
            artifact: generation(2),
            snapshot: generation(3)
        }));
        assert!(report.violations.contains(&Violation::NotNewerThanPublished {
            candidate: generation(2),
            published: generation(2)
        }));
    }

    #[test]
    fn flags_empty_and_non_finite() {
        let report = check(&artifact(2, vec![]), &snapshot(2), None);
        assert_eq!(report.violations, vec![Violation::Empty]);

        let report = check(&artifact(2, vec![pick(1, 1, f64::NAN)]), &snapshot(2), None);
        assert!(report.violations.contains(&Violation::NonFiniteScore { rank: 1 }));
    }

    #[tokio::test]
    async fn duplicate_is_not_promoted_and_previous_stays_current() {
        let store = MemoryStore::new();
        let settings = PipelineSettings::default();

        store.commit_snapshot(&snapshot(1)).await.unwrap();
        let previous = good(1);
        run_validate(&store, &previous, &snapshot(1), &settings)
            .await
            .unwrap();

        store.commit_snapshot(&snapshot(2)).await.unwrap();
        let glitched = artifact(2, vec![pick(1, 3, 9.0), pick(2, 3, 9.0)]);
        let err = run_validate(&store, &glitched, &snapshot(2), &settings)
            .await
            .unwrap_err();

        match err {
            PipelineError::ValidationFailed(v) => assert!(v.contains(&Violation::DuplicatePlayer {
                player_id: 3,
                ranks: vec![1, 2]
            })),
            other => panic!("unexpected error: {other}"),
        }
        let current = store.current_artifact().await.unwrap().unwrap();
        assert_eq!(current.id, previous.id);
    }

    /// Reports no published artifact, as a reader would just before a concurrent publisher
    /// commits. Everything else goes to the inner store.
    struct StaleReadStore {
        inner: MemoryStore,
    }

    #[async_trait::async_trait]
    impl PipelineStore for StaleReadStore {
        fn store_name(&self) -> &'static str {
            "stale-read"
        }

        async fn try_acquire_run_lock(&self) -> anyhow::Result<bool> {
            self.inner.try_acquire_run_lock().await
        }

        async fn release_run_lock(&self) -> anyhow::Result<()> {
            self.inner.release_run_lock().await
        }

        async fn commit_snapshot(&self, snapshot: &Snapshot) -> anyhow::Result<()> {
            self.inner.commit_snapshot(snapshot).await
        }

        async fn load_snapshot(&self, generation: GenerationId) -> anyhow::Result<Option<Snapshot>> {
            self.inner.load_snapshot(generation).await
        }

        async fn latest_generation(&self) -> anyhow::Result<Option<GenerationId>> {
            self.inner.latest_generation().await
        }

        async fn latest_snapshot(&self) -> anyhow::Result<Option<Snapshot>> {
            self.inner.latest_snapshot().await
        }

        async fn published_generation(&self) -> anyhow::Result<Option<GenerationId>> {
            Ok(None)
        }

        async fn current_artifact(&self) -> anyhow::Result<Option<RecommendationArtifact>> {
            self.inner.current_artifact().await
        }

        async fn promote(
            &self,
            artifact: &RecommendationArtifact,
        ) -> anyhow::Result<PromotionOutcome> {
            self.inner.promote(artifact).await
        }

        async fn record_run(&self, run: &crate::storage::RunRecord) -> anyhow::Result<()> {
            self.inner.record_run(run).await
        }
    }

    #[tokio::test]
    async fn losing_the_swap_is_reported_as_superseded() {
        let store = StaleReadStore {
            inner: MemoryStore::new(),
        };
        let settings = PipelineSettings::default();
        store.commit_snapshot(&snapshot(1)).await.unwrap();
        store.commit_snapshot(&snapshot(2)).await.unwrap();

        let winner = good(2);
        store.inner.promote(&winner).await.unwrap();

        let loser = good(1);
        let err = run_validate(&store, &loser, &snapshot(1), &settings)
            .await
            .unwrap_err();

        match err {
            PipelineError::ValidationFailed(v) => assert_eq!(
                v,
                vec![Violation::Superseded {
                    candidate: generation(1),
                    current: generation(2)
                }]
            ),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.current_artifact().await.unwrap().unwrap().id, winner.id);
    }
}

use crate::config::PipelineSettings;
use crate::domain::snapshot::{
    Availability, FixtureRecord, PlayerRecord, Position, Snapshot, TeamRecord,
};
use crate::domain::GenerationId;
use crate::error::PipelineError;
use crate::ingest::types::{FplEvent, UpstreamState};
use crate::ingest::UpstreamClient;
use crate::pipeline::bounded;
use crate::storage::PipelineStore;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy)]
pub struct SyncRequest {
    /// Overrides the upstream's next/current gameweek.
    pub gameweek: Option<i32>,
    pub stamped_at: DateTime<Utc>,
}

/// Fetches upstream state, reconciles it and commits it as one snapshot.
///
/// Nothing is written unless the whole snapshot was built; the commit itself is a single
/// transaction.
pub async fn run_sync(
    upstream: &dyn UpstreamClient,
    store: &dyn PipelineStore,
    settings: &PipelineSettings,
    request: SyncRequest,
) -> Result<Snapshot, PipelineError> {
    let state = fetch_with_retry(upstream, settings).await?;

    let gameweek = resolve_gameweek(request.gameweek, &state.bootstrap.events)?;
    let generation = GenerationId::new(gameweek, request.stamped_at);

    ensure_advances(store, settings, generation).await?;

    let snapshot = reconcile(generation, state)?;

    bounded(
        settings.store_timeout,
        "commit snapshot",
        store.commit_snapshot(&snapshot),
    )
    .await
    .map_err(|e| PipelineError::store_write(&e))?;

    tracing::info!(
        generation = %generation,
        teams = snapshot.teams.len(),
        players = snapshot.players.len(),
        fixtures = snapshot.fixtures.len(),
        store = store.store_name(),
        "snapshot committed"
    );

    Ok(snapshot)
}

/// A published generation is frozen, so the candidate must be strictly newer than it. An
/// unpublished latest snapshot may be rewritten under the same generation, never an older one.
async fn ensure_advances(
    store: &dyn PipelineStore,
    settings: &PipelineSettings,
    generation: GenerationId,
) -> Result<(), PipelineError> {
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

    let latest = bounded(
        settings.store_timeout,
        "read latest snapshot generation",
        store.latest_generation(),
    )
    .await
    .map_err(|e| PipelineError::store_read(&e))?;

    if let Some(latest) = latest {
        if latest > generation {
            return Err(PipelineError::StaleGeneration {
                candidate: generation,
                newest: latest,
            });
        }
    }

    Ok(())
}

/// Exponential backoff: `base`, `2 * base`, `4 * base`, ... between attempts.
pub async fn fetch_with_retry(
    upstream: &dyn UpstreamClient,
    settings: &PipelineSettings,
) -> Result<UpstreamState, PipelineError> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match upstream.fetch_state().await {
            Ok(state) => {
                tracing::info!(
                    attempt,
                    provider = upstream.provider_name(),
                    players = state.bootstrap.elements.len(),
                    fixtures = state.fixtures.len(),
                    "fetched upstream state"
                );
                return Ok(state);
            }
            Err(err) => {
                if attempt >= settings.sync_retries {
                    return Err(PipelineError::UpstreamUnavailable {
                        attempts: attempt,
                        detail: format!("{err:#}"),
                    });
                }
                let backoff = backoff_delay(settings, attempt);
                tracing::warn!(attempt, ?backoff, error = %err, "upstream fetch failed; retrying");
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

fn backoff_delay(settings: &PipelineSettings, attempt: u32) -> std::time::Duration {
    settings
        .sync_backoff_base
        .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}

pub fn resolve_gameweek(
    override_gameweek: Option<i32>,
    events: &[FplEvent],
) -> Result<i32, PipelineError> {
    if let Some(gw) = override_gameweek {
        if gw < 1 {
            return Err(PipelineError::UpstreamInvalid(format!(
                "gameweek override must be >= 1 (got {gw})"
            )));
        }
        return Ok(gw);
    }

    events
        .iter()
        .find(|e| e.is_next)
        .or_else(|| events.iter().find(|e| e.is_current))
        .map(|e| e.id)
        .ok_or_else(|| {
            PipelineError::UpstreamInvalid(
                "no event flagged as next or current gameweek".to_string(),
            )
        })
}

/// Maps upstream records into a snapshot. Duplicate ids keep the last occurrence; records
/// pointing at unknown teams are dropped.
pub fn reconcile(
    generation: GenerationId,
    state: UpstreamState,
) -> Result<Snapshot, PipelineError> {
    let UpstreamState {
        bootstrap,
        fixtures,
    } = state;

    let teams: Vec<TeamRecord> = bootstrap
        .teams
        .into_iter()
        .map(|t| TeamRecord {
            id: t.id,
            name: t.name,
            short_name: t.short_name,
            strength: t.strength,
        })
        .collect();
    let team_ids: BTreeSet<i32> = teams.iter().map(|t| t.id).collect();
    if team_ids.is_empty() {
        return Err(PipelineError::UpstreamInvalid("no teams".to_string()));
    }
    warn_duplicates("teams", teams.len(), team_ids.len());

    let mut players = Vec::with_capacity(bootstrap.elements.len());
    let mut dropped_players: usize = 0;
    for e in bootstrap.elements {
        let Some(position) = Position::from_element_type(e.element_type) else {
            tracing::warn!(player_id = e.id, element_type = e.element_type, "unknown position; dropping player");
            dropped_players += 1;
            continue;
        };
        if !team_ids.contains(&e.team) {
            tracing::warn!(player_id = e.id, team_id = e.team, "player on unknown team; dropping");
            dropped_players += 1;
            continue;
        }
        let status = Availability::from_code(&e.status).unwrap_or_else(|| {
            tracing::warn!(player_id = e.id, status = %e.status, "unknown status; treating as unavailable");
            Availability::Unavailable
        });

        players.push(PlayerRecord {
            id: e.id,
            name: e.web_name.trim().to_string(),
            team_id: e.team,
            position,
            form: e.form,
            total_points: e.total_points,
            points_per_game: e.points_per_game,
            expected_points: e.ep_next,
            now_cost: e.now_cost,
            selected_by_percent: e.selected_by_percent.unwrap_or(0.0),
            status,
            chance_of_playing: e.chance_of_playing_next_round,
        });
    }
    if players.is_empty() {
        return Err(PipelineError::UpstreamInvalid("no players".to_string()));
    }

    let fixture_input = fixtures.len();
    let fixtures: Vec<FixtureRecord> = fixtures
        .into_iter()
        .filter(|f| team_ids.contains(&f.team_h) && team_ids.contains(&f.team_a))
        .map(|f| FixtureRecord {
            id: f.id,
            gameweek: f.event,
            home_team_id: f.team_h,
            away_team_id: f.team_a,
            kickoff_time: f.kickoff_time,
            home_difficulty: f.team_h_difficulty,
            away_difficulty: f.team_a_difficulty,
            finished: f.finished,
        })
        .collect();
    if fixtures.len() < fixture_input {
        tracing::warn!(
            dropped = fixture_input - fixtures.len(),
            "fixtures referencing unknown teams dropped"
        );
    }

    let player_input = players.len();
    let snapshot = Snapshot::new(generation, teams, players, fixtures);
    warn_duplicates("players", player_input, snapshot.players.len());
    if dropped_players > 0 {
        tracing::warn!(dropped = dropped_players, "players dropped during reconcile");
    }

    Ok(snapshot)
}

fn warn_duplicates(what: &'static str, input: usize, unique: usize) {
    if unique < input {
        tracing::warn!(what, duplicates = input - unique, "upstream sent duplicate ids; keeping last");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::{BootstrapStatic, FplElement, FplFixture, FplTeam};
    use crate::storage::MemoryStore;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn event(id: i32, is_current: bool, is_next: bool) -> FplEvent {
        FplEvent {
            id,
            deadline_time: None,
            is_current,
            is_next,
            finished: false,
        }
    }

    fn element(id: i32, team: i32, status: &str) -> FplElement {
        FplElement {
            id,
            web_name: format!(" Player{id} "),
            team,
            element_type: 3,
            form: 4.0,
            total_points: 40,
            points_per_game: 4.0,
            ep_next: Some(4.5),
            now_cost: 60,
            selected_by_percent: Some(3.2),
            status: status.to_string(),
            chance_of_playing_next_round: None,
        }
    }

    fn state() -> UpstreamState {
        UpstreamState {
            bootstrap: BootstrapStatic {
                events: vec![event(4, true, false), event(5, false, true)],
                teams: vec![
                    FplTeam {
                        id: 1,
                        name: "Arsenal".to_string(),
                        short_name: "ARS".to_string(),
                        strength: 5,
                    },
                    FplTeam {
                        id: 2,
                        name: "Chelsea".to_string(),
                        short_name: "CHE".to_string(),
                        strength: 4,
                    },
                ],
                elements: vec![element(1, 1, "a"), element(2, 2, "i"), element(3, 99, "a")],
            },
            fixtures: vec![
                FplFixture {
                    id: 50,
                    event: Some(5),
                    team_h: 1,
                    team_a: 2,
                    kickoff_time: None,
                    team_h_difficulty: 3,
                    team_a_difficulty: 4,
                    finished: false,
                },
                FplFixture {
                    id: 51,
                    event: Some(5),
                    team_h: 1,
                    team_a: 42,
                    kickoff_time: None,
                    team_h_difficulty: 3,
                    team_a_difficulty: 3,
                    finished: false,
                },
            ],
        }
    }

    fn stamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 13, 8, 0, 0).unwrap()
    }

    struct FlakyUpstream {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl UpstreamClient for FlakyUpstream {
        fn provider_name(&self) -> &'static str {
            "flaky"
        }

        async fn fetch_state(&self) -> anyhow::Result<UpstreamState> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                anyhow::bail!("HTTP 503 (call {n})");
            }
            Ok(state())
        }
    }

    fn fast_settings() -> PipelineSettings {
        PipelineSettings {
            sync_backoff_base: Duration::ZERO,
            ..PipelineSettings::default()
        }
    }

    #[test]
    fn resolves_next_then_current_then_override() {
        assert_eq!(resolve_gameweek(None, &[event(4, true, false), event(5, false, true)]).unwrap(), 5);
        assert_eq!(resolve_gameweek(None, &[event(38, true, false)]).unwrap(), 38);
        assert_eq!(resolve_gameweek(Some(9), &[]).unwrap(), 9);
        assert!(matches!(
            resolve_gameweek(None, &[event(38, false, false)]),
            Err(PipelineError::UpstreamInvalid(_))
        ));
        assert!(resolve_gameweek(Some(0), &[]).is_err());
    }

    #[test]
    fn backoff_doubles_from_base() {
        let settings = PipelineSettings::default();
        assert_eq!(backoff_delay(&settings, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(&settings, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(&settings, 3), Duration::from_secs(4));
    }

    #[test]
    fn reconcile_drops_orphans_and_trims_names() {
        let snap = reconcile(GenerationId::new(5, stamp()), state()).unwrap();

        let ids: Vec<i32> = snap.players.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(snap.player(1).unwrap().name, "Player1");
        assert_eq!(snap.player(2).unwrap().status, Availability::Injured);
        assert_eq!(snap.fixtures.len(), 1);
        assert_eq!(snap.fixtures[0].id, 50);
    }

    #[test]
    fn reconcile_rejects_empty_player_list() {
        let mut s = state();
        s.bootstrap.elements.clear();
        assert!(matches!(
            reconcile(GenerationId::new(5, stamp()), s),
            Err(PipelineError::UpstreamInvalid(_))
        ));
    }

    #[tokio::test]
    async fn retries_until_success_within_bound() {
        let upstream = FlakyUpstream {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        fetch_with_retry(&upstream, &fast_settings()).await.unwrap();
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_configured_attempts_without_writing() {
        let upstream = FlakyUpstream {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        };
        let store = MemoryStore::new();
        let req = SyncRequest {
            gameweek: None,
            stamped_at: stamp(),
        };

        let err = run_sync(&upstream, &store, &fast_settings(), req)
            .await
            .unwrap_err();

        assert!(
            matches!(err, PipelineError::UpstreamUnavailable { attempts: 3, .. }),
            "{err}"
        );
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.snapshot_writes().await, 0);
    }

    #[tokio::test]
    async fn sync_is_idempotent_per_generation() {
        let upstream = FlakyUpstream {
            failures: 0,
            calls: AtomicU32::new(0),
        };
        let store = MemoryStore::new();
        let req = SyncRequest {
            gameweek: None,
            stamped_at: stamp(),
        };

        let first = run_sync(&upstream, &store, &fast_settings(), req).await.unwrap();
        let second = run_sync(&upstream, &store, &fast_settings(), req).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.snapshot_count().await, 1);
        assert_eq!(store.latest_snapshot().await.unwrap().unwrap(), first);
    }

    #[tokio::test]
    async fn store_failure_maps_to_store_write_failure() {
        let upstream = FlakyUpstream {
            failures: 0,
            calls: AtomicU32::new(0),
        };
        let store = MemoryStore::new();
        store.fail_writes(true);
        let req = SyncRequest {
            gameweek: None,
            stamped_at: stamp(),
        };

        let err = run_sync(&upstream, &store, &fast_settings(), req)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::StoreWriteFailure(_)), "{err}");
    }

    fn healthy() -> FlakyUpstream {
        FlakyUpstream {
            failures: 0,
            calls: AtomicU32::new(0),
        }
    }

    #[tokio::test]
    async fn published_generation_is_never_rewritten() {
        let store = MemoryStore::new();
        let req = SyncRequest {
            gameweek: None,
            stamped_at: stamp(),
        };
        let snap = run_sync(&healthy(), &store, &fast_settings(), req).await.unwrap();
        store
            .promote(&crate::domain::recommendation::RecommendationArtifact {
                id: uuid::Uuid::new_v4(),
                generation: snap.generation,
                generated_at: Utc::now(),
                scorer: "test".to_string(),
                picks: vec![],
            })
            .await
            .unwrap();

        let err = run_sync(&healthy(), &store, &fast_settings(), req)
            .await
            .unwrap_err();

        match err {
            PipelineError::StaleGeneration { candidate, newest } => {
                assert_eq!(candidate, snap.generation);
                assert_eq!(newest, snap.generation);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.snapshot_writes().await, 1);
        assert_eq!(store.load_snapshot(snap.generation).await.unwrap(), Some(snap));
    }

    #[tokio::test]
    async fn generation_older_than_latest_snapshot_is_refused() {
        let store = MemoryStore::new();
        let gw5 = run_sync(
            &healthy(),
            &store,
            &fast_settings(),
            SyncRequest {
                gameweek: None,
                stamped_at: stamp(),
            },
        )
        .await
        .unwrap();

        let err = run_sync(
            &healthy(),
            &store,
            &fast_settings(),
            SyncRequest {
                gameweek: Some(3),
                stamped_at: stamp() + chrono::Duration::hours(1),
            },
        )
        .await
        .unwrap_err();

        assert!(
            matches!(err, PipelineError::StaleGeneration { newest, .. } if newest == gw5.generation),
            "{err}"
        );
        assert_eq!(store.snapshot_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_commit_times_out_as_write_failure() {
        let store = MemoryStore::new();
        store.stall_writes(Duration::from_secs(120));
        let req = SyncRequest {
            gameweek: None,
            stamped_at: stamp(),
        };

        let err = run_sync(&healthy(), &store, &fast_settings(), req)
            .await
            .unwrap_err();

        match err {
            PipelineError::StoreWriteFailure(detail) => {
                assert!(detail.contains("commit snapshot timed out"), "{detail}")
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.snapshot_count().await, 0);
    }
}

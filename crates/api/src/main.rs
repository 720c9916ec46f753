use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use fpl_core::domain::recommendation::{RankedPick, RecommendationArtifact};
use fpl_core::domain::GenerationId;
use fpl_core::storage::{PgStore, PipelineStore};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = fpl_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    // Read-only connection; the API never writes.
    let store: Option<Arc<dyn PipelineStore>> = match settings.require_database_read_url() {
        Ok(db_url) => match PgStore::connect(db_url, Duration::from_secs(30)).await {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                sentry_anyhow::capture_anyhow(&e);
                tracing::error!(error = %e, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_READ_URL missing; starting API in degraded mode");
            None
        }
    };

    let app = router(AppState { store });

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/recommendations/current", get(get_current_artifact))
        .route(
            "/recommendations/current/:player_id",
            get(get_current_pick),
        )
        .route("/snapshots/current", get(get_current_snapshot))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    store: Option<Arc<dyn PipelineStore>>,
}

impl AppState {
    fn store(&self) -> Result<&dyn PipelineStore, StatusCode> {
        self.store.as_deref().ok_or(StatusCode::SERVICE_UNAVAILABLE)
    }
}

#[derive(Debug, Serialize)]
struct SnapshotSummary {
    generation: GenerationId,
    teams: usize,
    players: usize,
    fixtures: usize,
}

fn internal(e: anyhow::Error) -> StatusCode {
    sentry_anyhow::capture_anyhow(&e);
    tracing::error!(error = %e, "store read failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn get_current_artifact(
    State(state): State<AppState>,
) -> Result<Json<RecommendationArtifact>, StatusCode> {
    let artifact = state
        .store()?
        .current_artifact()
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(artifact))
}

async fn get_current_pick(
    State(state): State<AppState>,
    Path(player_id): Path<i32>,
) -> Result<Json<RankedPick>, StatusCode> {
    let artifact = state
        .store()?
        .current_artifact()
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let pick = artifact
        .pick(player_id)
        .cloned()
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(pick))
}

// Only the snapshot paired with the published artifact is exposed, never a newer unpublished one.
async fn get_current_snapshot(
    State(state): State<AppState>,
) -> Result<Json<SnapshotSummary>, StatusCode> {
    let store = state.store()?;
    let generation = store
        .published_generation()
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let snapshot = store
        .load_snapshot(generation)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(SnapshotSummary {
        generation: snapshot.generation,
        teams: snapshot.teams.len(),
        players: snapshot.players.len(),
        fixtures: snapshot.fixtures.len(),
    }))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &fpl_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fpl_core::domain::snapshot::Snapshot;
    use fpl_core::storage::MemoryStore;

    async fn published_state() -> AppState {
        let store = MemoryStore::new();
        let generation = GenerationId::new(8, Utc::now());
        store
            .commit_snapshot(&Snapshot::new(generation, vec![], vec![], vec![]))
            .await
            .unwrap();
        store
            .promote(&RecommendationArtifact {
                id: uuid::Uuid::new_v4(),
                generation,
                generated_at: Utc::now(),
                scorer: "test".to_string(),
                picks: vec![RankedPick {
                    rank: 1,
                    player_id: 7,
                    name: "Saka".to_string(),
                    team_id: 1,
                    now_cost: 100,
                    score: 8.5,
                    justification: vec![],
                }],
            })
            .await
            .unwrap();
        AppState {
            store: Some(Arc::new(store)),
        }
    }

    #[tokio::test]
    async fn serves_ranked_pick_and_404s_unranked() {
        let state = published_state().await;

        let Json(pick) = get_current_pick(State(state.clone()), Path(7)).await.unwrap();
        assert_eq!(pick.name, "Saka");

        let missing = get_current_pick(State(state), Path(8)).await.unwrap_err();
        assert_eq!(missing, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn snapshot_summary_follows_published_generation() {
        let Json(summary) = get_current_snapshot(State(published_state().await))
            .await
            .unwrap();
        assert_eq!(summary.generation.gameweek, 8);
    }

    #[tokio::test]
    async fn degraded_mode_is_unavailable() {
        let err = get_current_artifact(State(AppState { store: None }))
            .await
            .unwrap_err();
        assert_eq!(err, StatusCode::SERVICE_UNAVAILABLE);
    }
}

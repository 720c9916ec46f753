use anyhow::Context;
use clap::Parser;
use fpl_core::pipeline::{Pipeline, RunRequest};
use fpl_core::storage::PipelineStore;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "fpl_worker", about = "Sync FPL data, rank captain picks, publish if valid")]
struct Args {
    /// Target gameweek. Defaults to the upstream's next (or current) gameweek.
    #[arg(long)]
    gameweek: Option<i32>,

    /// Generation stamp (RFC 3339). Pin it to re-run a generation; defaults to now.
    #[arg(long)]
    stamp: Option<String>,

    /// Run every stage against an in-memory store; nothing is persisted.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    let settings = fpl_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    let pipeline_settings = fpl_core::config::PipelineSettings::from_env()?;
    let stamped_at = parse_stamp(args.stamp.as_deref())?;

    let store: Arc<dyn PipelineStore> = if args.dry_run {
        tracing::info!(dry_run = true, "using in-memory store; nothing will be persisted");
        Arc::new(fpl_core::storage::MemoryStore::new())
    } else {
        let db_url = settings.require_database_url()?;
        let store =
            fpl_core::storage::PgStore::connect(db_url, pipeline_settings.store_timeout).await?;
        if let Err(e) = fpl_core::storage::migrate(store.pool()).await {
            sentry_anyhow::capture_anyhow(&e);
            return Err(e);
        }
        Arc::new(store)
    };

    let upstream = fpl_core::ingest::FplHttpClient::from_settings(&settings, &pipeline_settings)?;
    let pipeline = Pipeline::new(
        Arc::new(upstream),
        store,
        Arc::new(fpl_core::scoring::FormFixtureScorer::default()),
        pipeline_settings,
    );

    let report = pipeline
        .run(RunRequest {
            gameweek: args.gameweek,
            stamped_at,
        })
        .await;

    if let Some(failure) = &report.failure {
        if !matches!(failure.error, fpl_core::error::PipelineError::RunInProgress) {
            sentry::capture_error(&failure.error);
        }
    }

    println!("{}", report.summary());
    Ok(ExitCode::from(report.exit_code() as u8))
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

fn parse_stamp(stamp: Option<&str>) -> anyhow::Result<Option<chrono::DateTime<chrono::Utc>>> {
    let Some(s) = stamp else {
        return Ok(None);
    };
    let parsed = chrono::DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("--stamp must be RFC 3339 (got {s:?})"))?;
    Ok(Some(parsed.with_timezone(&chrono::Utc)))
}

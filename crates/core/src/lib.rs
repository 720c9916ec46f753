pub mod domain;
pub mod error;
pub mod ingest;
pub mod pipeline;
pub mod scoring;
pub mod storage;

pub mod config {
    use anyhow::Context;
    use std::time::Duration;

    pub const DEFAULT_FPL_BASE_URL: &str = "https://fantasy.premierleague.com/api";

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub database_read_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub fpl_base_url: String,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                database_read_url: std::env::var("DATABASE_READ_URL").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                fpl_base_url: std::env::var("FPL_BASE_URL")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_FPL_BASE_URL.to_string()),
            })
        }

        /// Elevated connection, used by the worker for snapshot writes and promotion.
        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        /// Read-only connection for consumers. Falls back to the elevated URL.
        pub fn require_database_read_url(&self) -> anyhow::Result<&str> {
            self.database_read_url
                .as_deref()
                .or(self.database_url.as_deref())
                .context("DATABASE_READ_URL or DATABASE_URL is required")
        }
    }

    /// Tunables for a single pipeline run.
    #[derive(Debug, Clone)]
    pub struct PipelineSettings {
        /// Upstream fetch attempts before giving up with `UpstreamUnavailable`.
        pub sync_retries: u32,
        /// First backoff delay; doubles after each failed attempt.
        pub sync_backoff_base: Duration,
        pub http_timeout: Duration,
        pub store_timeout: Duration,
        pub min_eligible_players: usize,
        /// Doubtful players are eligible at or above this chance of playing.
        pub min_chance_of_playing: i32,
        pub recommendation_limit: Option<usize>,
    }

    impl Default for PipelineSettings {
        fn default() -> Self {
            Self {
                sync_retries: 3,
                sync_backoff_base: Duration::from_millis(1000),
                http_timeout: Duration::from_secs(30),
                store_timeout: Duration::from_secs(30),
                min_eligible_players: 11,
                min_chance_of_playing: 75,
                recommendation_limit: None,
            }
        }
    }

    impl PipelineSettings {
        pub fn from_env() -> anyhow::Result<Self> {
            let mut out = Self::default();

            if let Some(n) = env_parse::<u32>("SYNC_RETRIES")? {
                out.sync_retries = n;
            }
            if let Some(ms) = env_parse::<u64>("SYNC_BACKOFF_BASE_MS")? {
                out.sync_backoff_base = Duration::from_millis(ms);
            }
            if let Some(secs) = env_parse::<u64>("HTTP_TIMEOUT_SECS")? {
                out.http_timeout = Duration::from_secs(secs);
            }
            if let Some(secs) = env_parse::<u64>("STORE_TIMEOUT_SECS")? {
                out.store_timeout = Duration::from_secs(secs);
            }
            if let Some(n) = env_parse::<usize>("MIN_ELIGIBLE_PLAYERS")? {
                out.min_eligible_players = n;
            }
            if let Some(n) = env_parse::<i32>("MIN_CHANCE_OF_PLAYING")? {
                out.min_chance_of_playing = n;
            }
            if let Some(n) = env_parse::<usize>("RECOMMENDATION_LIMIT")? {
                out.recommendation_limit = Some(n);
            }

            out.check()?;
            Ok(out)
        }

        pub fn check(&self) -> anyhow::Result<()> {
            anyhow::ensure!(self.sync_retries >= 1, "SYNC_RETRIES must be >= 1");
            anyhow::ensure!(
                self.min_eligible_players >= 1,
                "MIN_ELIGIBLE_PLAYERS must be >= 1"
            );
            anyhow::ensure!(
                (0..=100).contains(&self.min_chance_of_playing),
                "MIN_CHANCE_OF_PLAYING must be 0..=100 (got {})",
                self.min_chance_of_playing
            );
            if let Some(limit) = self.recommendation_limit {
                anyhow::ensure!(limit >= 1, "RECOMMENDATION_LIMIT must be >= 1");
            }
            Ok(())
        }
    }

    fn env_parse<T>(key: &str) -> anyhow::Result<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match std::env::var(key) {
            Ok(s) if !s.trim().is_empty() => s
                .trim()
                .parse::<T>()
                .map(Some)
                .with_context(|| format!("{key} is not valid: {s:?}")),
            _ => Ok(None),
        }
    }

}

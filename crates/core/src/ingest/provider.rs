use crate::config::{PipelineSettings, Settings};
use crate::ingest::types::{BootstrapStatic, FplFixture, UpstreamState};
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use serde::de::DeserializeOwned;

const BOOTSTRAP_PATH: &str = "/bootstrap-static/";
const FIXTURES_PATH: &str = "/fixtures/";

/// Read-only source of league state. One call fetches everything a sync needs; retries live
/// in the sync stage, not here.
#[async_trait::async_trait]
pub trait UpstreamClient: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn fetch_state(&self) -> Result<UpstreamState>;
}

#[derive(Debug, Clone)]
pub struct FplHttpClient {
    http: reqwest::Client,
    base_url: String,
}

impl FplHttpClient {
    pub fn from_settings(settings: &Settings, pipeline: &PipelineSettings) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("fpl_core/", env!("CARGO_PKG_VERSION"))),
        );

        let http = reqwest::Client::builder()
            .timeout(pipeline.http_timeout)
            .default_headers(headers)
            .build()
            .context("failed to build FPL http client")?;

        Ok(Self {
            http,
            base_url: settings.fpl_base_url.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let res = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .with_context(|| format!("failed to read response body from {url}"))?;

        if !status.is_success() {
            let snippet: String = text.chars().take(200).collect();
            anyhow::bail!("FPL HTTP {status} from {url}: {snippet}");
        }

        serde_json::from_str::<T>(&text)
            .with_context(|| format!("failed to parse response from {url}"))
    }
}

#[async_trait::async_trait]
impl UpstreamClient for FplHttpClient {
    fn provider_name(&self) -> &'static str {
        "fpl_public_api"
    }

    async fn fetch_state(&self) -> Result<UpstreamState> {
        let t0 = std::time::Instant::now();
        let bootstrap: BootstrapStatic = self.get_json(BOOTSTRAP_PATH).await?;
        let fixtures: Vec<FplFixture> = self.get_json(FIXTURES_PATH).await?;

        tracing::debug!(
            elements = bootstrap.elements.len(),
            teams = bootstrap.teams.len(),
            events = bootstrap.events.len(),
            fixtures = fixtures.len(),
            elapsed_ms = t0.elapsed().as_millis(),
            "fetched FPL state"
        );

        Ok(UpstreamState {
            bootstrap,
            fixtures,
        })
    }
}

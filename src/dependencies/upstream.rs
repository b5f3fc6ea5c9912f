use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use url::Url;

use super::{DependencyProvider, DependencySpec, GemNameBatch};
use crate::config::UpstreamConfig;

const UA: &str = concat!("gemgate/", env!("CARGO_PKG_VERSION"));
const DEPENDENCIES_JSON: &str = "api/v1/dependencies.json";

/// Hands out a dependency provider for a given upstream registry.
pub trait UpstreamResolver: Send + Sync {
    fn resolve(&self, upstream: &Url) -> Arc<dyn DependencyProvider>;
}

/// Shared HTTP client for upstream dependency lookups.
#[derive(Clone)]
pub struct HttpUpstreams {
    client: reqwest::Client,
}

impl HttpUpstreams {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(UA)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("building upstream http client")?;

        tracing::info!(
            timeout_secs = config.timeout_secs,
            default_upstream = %config.url,
            "upstream client initialized"
        );

        Ok(Self { client })
    }
}

impl UpstreamResolver for HttpUpstreams {
    fn resolve(&self, upstream: &Url) -> Arc<dyn DependencyProvider> {
        Arc::new(UpstreamDependencies {
            client: self.client.clone(),
            base: upstream.clone(),
        })
    }
}

/// Fetches dependency records from one upstream's JSON dependency API.
pub struct UpstreamDependencies {
    client: reqwest::Client,
    base: Url,
}

impl UpstreamDependencies {
    pub fn endpoint(&self, gems: &GemNameBatch) -> Result<Url> {
        let mut base = self.base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let mut url = base
            .join(DEPENDENCIES_JSON)
            .with_context(|| format!("joining dependency endpoint onto {}", self.base))?;
        url.query_pairs_mut()
            .append_pair("gems", &gems.to_query_value());
        Ok(url)
    }
}

#[async_trait]
impl DependencyProvider for UpstreamDependencies {
    async fn fetch(&self, gems: &GemNameBatch) -> Result<Vec<DependencySpec>> {
        let url = self.endpoint(gems)?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("requesting {url}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("{url} returned {status}"));
        }

        response
            .json::<Vec<DependencySpec>>()
            .await
            .with_context(|| format!("decoding dependency list from {url}"))
    }
}

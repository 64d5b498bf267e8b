//! Remote adapter manifests.
//!
//! Each protocol publishes `{adapters_host}/{protocol}.json` listing the
//! contract kinds it supports and the actions available for each.

use crate::AdapterError;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use tokio_retry::{strategy::ExponentialBackoff, Retry};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AdapterManifest {
    /// Contract kind to the actions it exposes
    #[serde(default)]
    pub contracts: BTreeMap<String, Vec<String>>,
}

impl AdapterManifest {
    pub fn supports(&self, contract_kind: &str, action: &str) -> bool {
        self.contracts
            .get(contract_kind)
            .is_some_and(|actions| actions.iter().any(|a| a == action))
    }
}

#[async_trait]
pub trait ManifestSource: Send + Sync {
    async fn fetch(&self, protocol: &str) -> Result<AdapterManifest, AdapterError>;
}

/// Fetches manifests over HTTP with bounded exponential retry.
#[derive(Debug, Clone)]
pub struct HttpManifestSource {
    client: reqwest::Client,
    host: String,
    attempts: usize,
}

impl HttpManifestSource {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: host.into().trim_end_matches('/').to_string(),
            attempts: 3,
        }
    }

    pub const fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn url(&self, protocol: &str) -> String {
        format!("{}/{protocol}.json", self.host)
    }

    async fn fetch_once(&self, url: &str) -> eyre::Result<AdapterManifest> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ManifestSource for HttpManifestSource {
    async fn fetch(&self, protocol: &str) -> Result<AdapterManifest, AdapterError> {
        let url = self.url(protocol);
        debug!(%url, "Fetching adapter manifest");

        // Exponential backoff: 100ms, 200ms, ...
        let retry_strategy = ExponentialBackoff::from_millis(100).take(self.attempts.saturating_sub(1));

        Retry::spawn(retry_strategy, || async {
            self.fetch_once(&url).await.map_err(|e| {
                warn!(%url, error = %e, "Adapter manifest fetch failed, will retry");
                e
            })
        })
        .await
        .map_err(|e| AdapterError::LoadError(format!("{protocol}: {e}")))
    }
}

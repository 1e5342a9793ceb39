//! Rendering of the abstract configuration into Kubernetes manifests.
//!
//! The renderer is an external service. The operator posts the (transformed)
//! configuration and receives one [`ServiceConfig`](crate::bundle::ServiceConfig)
//! per subcomponent.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, instrument};

#[cfg(test)]
use mockall::automock;

use crate::bundle::GeneratedManifestBundle;
use crate::config::SpinnakerConfig;
use crate::{Error, Result};

const MANIFESTS_PATH: &str = "/v1/manifests";

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ManifestGenerator: Send + Sync {
    /// Must be deterministic for identical input.
    async fn generate(&self, name: &str, config: &SpinnakerConfig) -> Result<GeneratedManifestBundle>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    name: &'a str,
    config: &'a SpinnakerConfig,
}

/// Halyard-compatible HTTP renderer.
pub struct HalyardGenerator {
    http: Client,
    base_url: String,
}

impl HalyardGenerator {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self) -> String {
        format!("{}{MANIFESTS_PATH}", self.base_url)
    }
}

#[async_trait]
impl ManifestGenerator for HalyardGenerator {
    #[instrument(skip(self, config))]
    async fn generate(&self, name: &str, config: &SpinnakerConfig) -> Result<GeneratedManifestBundle> {
        let response = self
            .http
            .post(self.url())
            .json(&GenerateRequest { name, config })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Generator(format!(
                "{status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let bundle: GeneratedManifestBundle = response.json().await?;
        debug!(components = bundle.len(), "manifests generated");
        Ok(bundle)
    }
}

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{ElevenConfig, RetellConfig};

/// Provider REST calls made on behalf of the interview client
#[async_trait]
pub trait VendorApi: Send + Sync {
    /// Retell `create-web-call`; returns the vendor JSON (call_id, access_token, ...)
    async fn create_web_call(&self, agent_id: &str) -> Result<Value>;

    /// ElevenLabs signed conversation url
    async fn get_signed_url(&self, agent_id: &str) -> Result<String>;

    /// Retell call record
    async fn get_call(&self, call_id: &str) -> Result<Value>;

    async fn fetch_recording(&self, url: &str) -> Result<Vec<u8>>;
}

/// `VendorApi` over the real Retell and ElevenLabs endpoints
pub struct HttpVendorApi {
    client: reqwest::Client,
    retell: RetellConfig,
    eleven: ElevenConfig,
}

impl HttpVendorApi {
    pub fn new(retell: RetellConfig, eleven: ElevenConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            retell,
            eleven,
        })
    }

    fn retell_url(&self, path: &str) -> String {
        format!("{}{}", self.retell.api_base.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl VendorApi for HttpVendorApi {
    async fn create_web_call(&self, agent_id: &str) -> Result<Value> {
        info!("Creating Retell web call for agent {}", agent_id);

        let response = self
            .client
            .post(self.retell_url("/v2/create-web-call"))
            .bearer_auth(&self.retell.api_key)
            .json(&serde_json::json!({ "agent_id": agent_id }))
            .send()
            .await?
            .error_for_status()
            .context("Retell rejected create-web-call")?;

        Ok(response.json().await?)
    }

    async fn get_signed_url(&self, agent_id: &str) -> Result<String> {
        info!("Requesting ElevenLabs signed url for agent {}", agent_id);

        let url = format!(
            "{}/v1/convai/conversation/get-signed-url",
            self.eleven.api_base.trim_end_matches('/')
        );
        let body: Value = self
            .client
            .get(url)
            .query(&[("agent_id", agent_id)])
            .header("xi-api-key", &self.eleven.api_key)
            .send()
            .await?
            .error_for_status()
            .context("ElevenLabs rejected get-signed-url")?
            .json()
            .await?;

        body.get("signed_url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("ElevenLabs response had no signed_url"))
    }

    async fn get_call(&self, call_id: &str) -> Result<Value> {
        debug!("Retrieving Retell call {}", call_id);

        let response = self
            .client
            .get(get_call_url(&self.retell.api_base, call_id)?)
            .bearer_auth(&self.retell.api_key)
            .send()
            .await?
            .error_for_status()
            .with_context(|| format!("Retell rejected get-call for {}", call_id))?;

        Ok(response.json().await?)
    }

    async fn fetch_recording(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()
            .context("Recording download failed")?
            .bytes()
            .await?;

        Ok(bytes.to_vec())
    }
}

/// `<api_base>/v2/get-call/<call_id>` with the id as a single escaped path segment
fn get_call_url(api_base: &str, call_id: &str) -> Result<reqwest::Url> {
    let mut url = reqwest::Url::parse(api_base)
        .with_context(|| format!("Invalid Retell api base {}", api_base))?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("Retell api base {} cannot take a path", api_base))?
        .pop_if_empty()
        .extend(["v2", "get-call", call_id]);
    Ok(url)
}

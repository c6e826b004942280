use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::CallError;

/// Response of the create-call route
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateCallResponse {
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Response of the signed-url route
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignedUrlResponse {
    #[serde(default)]
    pub signed_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Post-call metadata; every field is optional because providers fill them lazily
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallRecord {
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub call_status: Option<String>,
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub recording_url: Option<String>,
    #[serde(default)]
    pub start_timestamp: Option<i64>,
    #[serde(default)]
    pub end_timestamp: Option<i64>,
    #[serde(default)]
    pub disconnection_reason: Option<String>,
}

/// Backend that issues per-call credentials
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn create_call(&self, llm: &str) -> Result<CreateCallResponse, CallError>;

    async fn get_signed_voice_url(&self, llm: &str) -> Result<SignedUrlResponse, CallError>;

    async fn get_call_record(&self, call_id: &str) -> Result<CallRecord, CallError>;
}

/// Talks to the credential routes served by `http::create_router`
pub struct HttpCredentialClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpCredentialClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, CallError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        route: &str,
    ) -> Result<T, CallError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::Transport(format!(
                "{} returned {}: {}",
                route, status, body
            )));
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl CredentialSource for HttpCredentialClient {
    async fn create_call(&self, llm: &str) -> Result<CreateCallResponse, CallError> {
        let url = format!("{}/api/create-retell-call", self.base_url);
        info!("Requesting Retell call for llm {}", llm);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "llm": llm }))
            .send()
            .await?;

        let body: CreateCallResponse = Self::read_json(response, "create-retell-call").await?;
        debug!("create-retell-call answered call_id={:?}", body.call_id);
        Ok(body)
    }

    async fn get_signed_voice_url(&self, llm: &str) -> Result<SignedUrlResponse, CallError> {
        let url = format!("{}/api/get-elevenlabs-signed-url", self.base_url);
        info!("Requesting ElevenLabs signed url for llm {}", llm);

        let response = self.client.get(&url).query(&[("llm", llm)]).send().await?;
        Self::read_json(response, "get-elevenlabs-signed-url").await
    }

    async fn get_call_record(&self, call_id: &str) -> Result<CallRecord, CallError> {
        let url = format!("{}/api/get-call-data", self.base_url);
        debug!("Fetching call record for {}", call_id);

        let response = self
            .client
            .get(&url)
            .query(&[("callId", call_id)])
            .send()
            .await?;
        Self::read_json(response, "get-call-data").await
    }
}

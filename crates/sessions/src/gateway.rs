//! Client for the external chat-protocol gateway.
//!
//! The gateway's handshake cryptography is a black box: we create an
//! instance, ask it to connect, and receive pairing/connection events back
//! over the webhook. This trait is all the session manager knows about it.

use {async_trait::async_trait, serde::Deserialize, tracing::debug};

use crate::{Error, Result};

/// The black-box session surface of the external gateway.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Register an instance for a channel. Idempotent upstream.
    async fn create_instance(&self, instance: &str) -> Result<()>;
    /// Begin the pairing handshake; artifacts arrive via webhook.
    async fn connect(&self, instance: &str) -> Result<()>;
    /// Log the instance out (graceful close).
    async fn logout(&self, instance: &str) -> Result<()>;
    /// Remove the instance entirely (channel deletion).
    async fn delete_instance(&self, instance: &str) -> Result<()>;
    /// Send a text message; returns the gateway's external message id.
    async fn send_text(&self, instance: &str, to: &str, text: &str) -> Result<String>;
    /// Send an audio file by URL; returns the external message id.
    async fn send_audio(&self, instance: &str, to: &str, media_url: &str) -> Result<String>;
}

/// HTTP implementation speaking the gateway's REST API.
pub struct HttpGatewayClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct SendResponse {
    #[serde(rename = "messageId")]
    message_id: String,
}

impl HttpGatewayClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.url(path))
            .header("apikey", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::session(format!("{path} returned {status}: {body}")));
        }
        Ok(response)
    }
}

#[async_trait]
impl GatewayClient for HttpGatewayClient {
    async fn create_instance(&self, instance: &str) -> Result<()> {
        debug!(instance, "creating gateway instance");
        self.post(
            "/instance/create",
            serde_json::json!({ "instanceName": instance }),
        )
        .await?;
        Ok(())
    }

    async fn connect(&self, instance: &str) -> Result<()> {
        debug!(instance, "starting gateway connect");
        self.post(
            &format!("/instance/{instance}/connect"),
            serde_json::json!({}),
        )
        .await?;
        Ok(())
    }

    async fn logout(&self, instance: &str) -> Result<()> {
        self.post(
            &format!("/instance/{instance}/logout"),
            serde_json::json!({}),
        )
        .await?;
        Ok(())
    }

    async fn delete_instance(&self, instance: &str) -> Result<()> {
        self.post(
            &format!("/instance/{instance}/delete"),
            serde_json::json!({}),
        )
        .await?;
        Ok(())
    }

    async fn send_text(&self, instance: &str, to: &str, text: &str) -> Result<String> {
        let response = self
            .post(
                &format!("/message/{instance}/text"),
                serde_json::json!({ "to": to, "text": text }),
            )
            .await?;
        let parsed: SendResponse = response.json().await?;
        Ok(parsed.message_id)
    }

    async fn send_audio(&self, instance: &str, to: &str, media_url: &str) -> Result<String> {
        let response = self
            .post(
                &format!("/message/{instance}/audio"),
                serde_json::json!({ "to": to, "audioUrl": media_url }),
            )
            .await?;
        let parsed: SendResponse = response.json().await?;
        Ok(parsed.message_id)
    }
}

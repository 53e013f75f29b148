//! HTTP session provider backed by a WhatsApp Web sidecar
//!
//! The sidecar runs the browser-automation client and exposes a small
//! control API; its events come back through `POST /bridge/events`.

use async_trait::async_trait;
use bridge_core::BridgeConfig;
use reqwest::{Client, Method, RequestBuilder};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Result, WhatsAppError};
use crate::provider::{ProviderStatus, SessionProvider};

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplyPayload<'a> {
    chat_id: &'a str,
    message_id: &'a str,
    text: &'a str,
}

/// Sidecar control client
#[derive(Debug, Clone)]
pub struct BridgeProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl BridgeProvider {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.client.request(method, url);
        match &self.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }

    async fn check(response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        Err(WhatsAppError::Api(format!(
            "Failed to {}: {} - {}",
            action, status, text
        )))
    }

    async fn post_command(&self, path: &str, action: &str) -> Result<()> {
        debug!("Sidecar command {}", path);
        let response = self.request(Method::POST, path).send().await?;
        Self::check(response, action).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionProvider for BridgeProvider {
    async fn initialize(&self) -> Result<()> {
        self.post_command("/session/start", "start session").await?;
        info!("WhatsApp client initialized");
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.post_command("/session/destroy", "destroy session").await?;
        info!("WhatsApp client destroyed");
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.post_command("/session/logout", "log out").await
    }

    async fn reply(&self, chat_id: &str, message_id: &str, text: &str) -> Result<()> {
        info!("Replying to {} in {}", message_id, chat_id);
        let payload = ReplyPayload {
            chat_id,
            message_id,
            text,
        };
        let response = self
            .request(Method::POST, "/messages/reply")
            .json(&payload)
            .send()
            .await?;
        Self::check(response, "send reply").await?;
        Ok(())
    }

    async fn status(&self) -> Result<ProviderStatus> {
        let response = self.request(Method::GET, "/session/status").send().await?;
        let response = Self::check(response, "query status").await?;
        Ok(response.json().await?)
    }
}

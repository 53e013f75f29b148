//! n8n webhook dispatcher

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::message::{ForwardPayload, InboundMessage};
use crate::settings::SettingsStore;

/// Error text returned when no webhook URL is configured
pub const NOT_CONFIGURED: &str = "No webhook URL configured";

/// Response returned by the workflow engine
///
/// Only `reply` carries meaning; every other field is kept as-is.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct WebhookResponse(pub Value);

impl WebhookResponse {
    /// `{success:false, error:"No webhook URL configured"}`
    pub fn not_configured() -> Self {
        Self(json!({ "success": false, "error": NOT_CONFIGURED }))
    }

    /// Non-empty `reply` text, if the workflow returned one
    pub fn reply(&self) -> Option<&str> {
        self.0
            .get("reply")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn into_inner(self) -> Value {
        self.0
    }
}

/// Anything that can forward a message payload to a workflow
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn trigger(&self, payload: &ForwardPayload) -> Result<WebhookResponse>;
}

/// Dispatcher that POSTs payloads to the configured n8n webhook
#[derive(Debug, Clone)]
pub struct N8nWebhook {
    client: Client,
    settings: Arc<SettingsStore>,
}

impl N8nWebhook {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        Self {
            client: Client::new(),
            settings,
        }
    }

    /// Map a message into the sparse forward payload
    pub fn format_message_data(message: &InboundMessage) -> ForwardPayload {
        ForwardPayload::from(message)
    }
}

#[async_trait]
impl Forwarder for N8nWebhook {
    async fn trigger(&self, payload: &ForwardPayload) -> Result<WebhookResponse> {
        // Looked up per call so settings changes apply to the next message
        let Some(url) = self.settings.webhook_url() else {
            warn!("Skipping n8n webhook: {}", NOT_CONFIGURED);
            return Ok(WebhookResponse::not_configured());
        };

        debug!("Triggering n8n webhook {} with {:?}", url, payload);

        let response = self.client.post(&url).json(payload).send().await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            error!("n8n webhook error: {} - {}", status, text);
            return Err(Error::Webhook {
                status: status.as_u16(),
                body: text,
            });
        }

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        info!("n8n webhook responded with {}", status);
        debug!("n8n webhook response: {}", body);

        Ok(WebhookResponse(body))
    }
}

//! Session provider capability
//!
//! The provider drives the actual WhatsApp Web client. It is opaque to the
//! bridge: it can be started, destroyed, logged out and asked for its
//! status, and it emits [`ProviderEvent`]s into the lifecycle event queue.

use async_trait::async_trait;
use bridge_core::InboundMessage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, WhatsAppError};

/// Operations exposed by a WhatsApp Web session provider
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Start the client; QR or ready events follow asynchronously
    async fn initialize(&self) -> Result<()>;

    /// Tear down the client without logging the account out
    async fn destroy(&self) -> Result<()>;

    /// Log the linked device out of the account
    async fn logout(&self) -> Result<()>;

    /// Quote-reply to `message_id` in `chat_id`
    async fn reply(&self, chat_id: &str, message_id: &str, text: &str) -> Result<()>;

    /// Current client internals
    async fn status(&self) -> Result<ProviderStatus>;
}

/// Linked account details
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    #[serde(default)]
    pub wid: Option<String>,
    #[serde(default)]
    pub pushname: Option<String>,
}

/// Snapshot of the provider internals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStatus {
    /// Browser context is running
    #[serde(default)]
    pub browser: bool,
    /// WhatsApp Web page is open
    #[serde(default)]
    pub page: bool,
    /// Account info has been resolved
    #[serde(default)]
    pub account: Option<AccountInfo>,
}

impl ProviderStatus {
    pub fn is_authenticated(&self) -> bool {
        self.browser && self.page && self.account.is_some()
    }

    /// Browser and page are up, so a logout call can reach the account
    pub fn can_logout(&self) -> bool {
        self.browser && self.page
    }
}

/// One input to the lifecycle state machine
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    Qr(String),
    Ready,
    Disconnected(Option<String>),
    Message(InboundMessage),
}

/// Event as pushed by the sidecar: `{"event": "...", "data": ...}`
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeEvent {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Message as emitted by whatsapp-web.js
#[derive(Debug, Deserialize)]
struct WebMessage {
    id: WebMessageId,
    from: String,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    body: String,
    #[serde(default)]
    timestamp: Value,
    #[serde(rename = "type", default)]
    message_type: String,
}

#[derive(Debug, Deserialize)]
struct WebMessageId {
    #[serde(rename = "_serialized")]
    serialized: String,
}

impl From<WebMessage> for InboundMessage {
    fn from(msg: WebMessage) -> Self {
        let mut message = InboundMessage::text(msg.id.serialized, msg.from, msg.body)
            .with_timestamp(msg.timestamp);
        message.to = msg.to;
        message.message_type = msg.message_type;
        message
    }
}

impl TryFrom<BridgeEvent> for ProviderEvent {
    type Error = WhatsAppError;

    fn try_from(event: BridgeEvent) -> Result<Self> {
        match event.event.as_str() {
            "qr" => {
                let raw = event
                    .data
                    .as_str()
                    .or_else(|| event.data.get("qr").and_then(Value::as_str))
                    .ok_or_else(|| WhatsAppError::InvalidPayload("qr event without code".into()))?;
                Ok(ProviderEvent::Qr(raw.to_string()))
            }
            "ready" => Ok(ProviderEvent::Ready),
            "disconnected" => {
                let reason = event
                    .data
                    .as_str()
                    .or_else(|| event.data.get("reason").and_then(Value::as_str))
                    .map(str::to_string);
                Ok(ProviderEvent::Disconnected(reason))
            }
            "message" => {
                let message = match serde_json::from_value::<WebMessage>(event.data.clone()) {
                    Ok(web) => InboundMessage::from(web),
                    Err(_) => serde_json::from_value::<InboundMessage>(event.data)?,
                };
                Ok(ProviderEvent::Message(message))
            }
            other => Err(WhatsAppError::InvalidPayload(format!(
                "unknown event: {}",
                other
            ))),
        }
    }
}

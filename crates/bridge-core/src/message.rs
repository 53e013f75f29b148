//! Normalized inbound message shape
//!
//! Both ingress paths (live WhatsApp Web session and Cloud API webhook)
//! produce an [`InboundMessage`]; [`ForwardPayload`] is what n8n receives.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound message event, immutable once constructed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub message_id: String,
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default)]
    pub body: String,
    /// Kept verbatim from the source (number for WhatsApp Web, string for Cloud API)
    #[serde(default)]
    pub timestamp: Value,
    #[serde(rename = "type", default)]
    pub message_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Value>,
}

impl InboundMessage {
    /// Create a plain text message
    pub fn text(
        message_id: impl Into<String>,
        from: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            from: from.into(),
            to: None,
            body: body.into(),
            timestamp: Value::Null,
            message_type: "text".to_string(),
            media_id: None,
            media_url: None,
            location: None,
        }
    }

    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<Value>) -> Self {
        self.timestamp = timestamp.into();
        self
    }
}

/// Payload POSTed to the n8n webhook
///
/// Media and location keys are omitted entirely when absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardPayload {
    pub message_id: String,
    pub from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub body: String,
    pub timestamp: Value,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Value>,
}

impl From<&InboundMessage> for ForwardPayload {
    fn from(message: &InboundMessage) -> Self {
        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());

        Self {
            message_id: message.message_id.clone(),
            from: message.from.clone(),
            to: non_empty(&message.to),
            body: message.body.clone(),
            timestamp: message.timestamp.clone(),
            message_type: message.message_type.clone(),
            media_id: non_empty(&message.media_id),
            media_url: non_empty(&message.media_url),
            location: message.location.clone().filter(|l| !l.is_null()),
        }
    }
}

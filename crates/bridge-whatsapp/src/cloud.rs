//! WhatsApp Cloud API adapter
//!
//! Webhook handshake verification, extraction of normalized messages from
//! webhook payloads, and the send-message client used for replies.

use std::sync::Arc;

use async_trait::async_trait;
use bridge_core::{InboundMessage, ReplySink, SettingsStore};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Result, WhatsAppError};

const BUSINESS_ACCOUNT_OBJECT: &str = "whatsapp_business_account";

/// Query parameters of the subscription handshake
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HandshakeQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// Verify a subscription handshake, returning the challenge to echo
pub fn verify_handshake(query: &HandshakeQuery, verify_token: &str) -> Option<String> {
    if verify_token.is_empty() {
        warn!("Webhook verification attempted but no verify token is configured");
        return None;
    }

    if query.mode.as_deref() == Some("subscribe")
        && query.verify_token.as_deref() == Some(verify_token)
    {
        info!("Webhook verified");
        Some(query.challenge.clone().unwrap_or_default())
    } else {
        warn!("Webhook verification failed");
        None
    }
}

/// Extract normalized messages from a webhook payload
///
/// Malformed nesting yields an empty result; malformed messages are skipped.
pub fn extract_messages(payload: &Value) -> Vec<InboundMessage> {
    if payload.get("object").and_then(Value::as_str) != Some(BUSINESS_ACCOUNT_OBJECT) {
        debug!("Ignoring webhook payload for another object");
        return Vec::new();
    }

    let entries = payload
        .get("entry")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    entries
        .iter()
        .filter_map(|entry| entry.get("changes").and_then(Value::as_array))
        .flatten()
        .filter_map(|change| {
            change
                .get("value")
                .and_then(|v| v.get("messages"))
                .and_then(Value::as_array)
        })
        .flatten()
        .filter_map(parse_message)
        .collect()
}

fn parse_message(msg: &Value) -> Option<InboundMessage> {
    let field = |key: &str| msg.get(key).and_then(Value::as_str);

    let (Some(id), Some(from)) = (field("id"), field("from")) else {
        warn!("Skipping cloud message without id or sender");
        return None;
    };

    let message_type = field("type").unwrap_or_default().to_string();
    let mut message = InboundMessage::text(id, from, "")
        .with_timestamp(msg.get("timestamp").cloned().unwrap_or(Value::Null));
    message.message_type = message_type.clone();

    let Some(content) = msg.get(&message_type).filter(|c| c.is_object()) else {
        return Some(message);
    };
    let content_str = |key: &str| content.get(key).and_then(Value::as_str).map(str::to_string);

    match message_type.as_str() {
        "text" => {
            message.body = content_str("body").unwrap_or_default();
        }
        "image" | "document" | "video" => {
            message.body = placeholder(&message_type).to_string();
            message.media_id = content_str("id");
            message.media_url = content_str("url");
        }
        "audio" => {
            message.body = placeholder(&message_type).to_string();
            message.media_id = content_str("id");
        }
        "location" => {
            message.body = placeholder(&message_type).to_string();
            message.location = Some(content.clone());
        }
        other => debug!("Unsupported cloud message type: {}", other),
    }

    Some(message)
}

fn placeholder(message_type: &str) -> &'static str {
    match message_type {
        "image" => "[Image]",
        "document" => "[Document]",
        "audio" => "[Audio]",
        "video" => "[Video]",
        "location" => "[Location]",
        _ => "",
    }
}

#[derive(Debug, Serialize)]
struct TextBody<'a> {
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct SendMessagePayload<'a> {
    messaging_product: &'static str,
    recipient_type: &'static str,
    to: &'a str,
    #[serde(rename = "type")]
    message_type: &'static str,
    text: TextBody<'a>,
}

/// Cloud API send-message client
///
/// Credentials are read from the settings store on every call.
#[derive(Debug, Clone)]
pub struct CloudApiClient {
    client: Client,
    api_url: String,
    settings: Arc<SettingsStore>,
}

impl CloudApiClient {
    pub fn new(api_url: impl Into<String>, settings: Arc<SettingsStore>) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            settings,
        }
    }

    /// Send a text message to a WhatsApp user
    pub async fn send_text_message(&self, to: &str, text: &str) -> Result<Value> {
        let settings = self.settings.get();
        if settings.api_token.is_empty() || settings.phone_number_id.is_empty() {
            warn!("Cannot send cloud message: API token or phone number id missing");
            return Err(WhatsAppError::CredentialsNotSet);
        }

        info!("Sending WhatsApp Cloud message to {}", to);

        let url = format!("{}/{}/messages", self.api_url, settings.phone_number_id);
        let payload = SendMessagePayload {
            messaging_product: "whatsapp",
            recipient_type: "individual",
            to,
            message_type: "text",
            text: TextBody { body: text },
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&settings.api_token)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(WhatsAppError::Api(format!(
                "Failed to send message: {} - {}",
                status, text
            )));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl ReplySink for CloudApiClient {
    async fn send_reply(&self, message: &InboundMessage, text: &str) -> bridge_core::Result<()> {
        self.send_text_message(&message.from, text).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::HeaderMap, routing::post, Json, Router};
    use bridge_core::Settings;
    use serde_json::json;
    use std::sync::Mutex;

    fn query(mode: &str, token: &str, challenge: &str) -> HandshakeQuery {
        HandshakeQuery {
            mode: Some(mode.to_string()),
            verify_token: Some(token.to_string()),
            challenge: Some(challenge.to_string()),
        }
    }

    fn envelope(messages: Value) -> Value {
        json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "WABA_ID",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messaging_product": "whatsapp",
                        "metadata": {"phone_number_id": "PNID"},
                        "messages": messages
                    }
                }]
            }]
        })
    }

    #[test]
    fn test_verify_handshake() {
        assert_eq!(
            verify_handshake(&query("subscribe", "tok", "xyz123"), "tok"),
            Some("xyz123".to_string())
        );
        assert_eq!(
            verify_handshake(&query("subscribe", "wrong", "xyz123"), "tok"),
            None
        );
        assert_eq!(
            verify_handshake(&query("unsubscribe", "tok", "xyz123"), "tok"),
            None
        );
        assert_eq!(verify_handshake(&HandshakeQuery::default(), "tok"), None);
    }

    #[test]
    fn test_verify_handshake_without_configured_token() {
        assert_eq!(verify_handshake(&query("subscribe", "", "xyz"), ""), None);
    }

    #[test]
    fn test_handshake_query_from_url_params() {
        let q: HandshakeQuery = serde_json::from_value(json!({
            "hub.mode": "subscribe",
            "hub.verify_token": "tok",
            "hub.challenge": "42"
        }))
        .unwrap();
        assert_eq!(q.mode.as_deref(), Some("subscribe"));
        assert_eq!(q.challenge.as_deref(), Some("42"));
    }

    #[test]
    fn test_extract_text_message() {
        let payload = envelope(json!([{
            "from": "111",
            "id": "wamid.1",
            "timestamp": "1700000000",
            "type": "text",
            "text": {"body": "hi"}
        }]));

        let messages = extract_messages(&payload);
        assert_eq!(messages.len(), 1);
        let msg = &messages[0];
        assert_eq!(msg.message_id, "wamid.1");
        assert_eq!(msg.from, "111");
        assert_eq!(msg.body, "hi");
        assert_eq!(msg.timestamp, json!("1700000000"));
        assert!(msg.media_id.is_none());
    }

    #[test]
    fn test_extract_media_and_location() {
        let payload = envelope(json!([
            {"from": "1", "id": "a", "type": "image", "image": {"id": "img-1", "url": "https://cdn/img"}},
            {"from": "1", "id": "b", "type": "audio", "audio": {"id": "aud-1", "url": "https://cdn/aud"}},
            {"from": "1", "id": "c", "type": "location", "location": {"latitude": 1.5, "longitude": 2.5}},
            {"from": "1", "id": "d", "type": "document", "document": {"id": "doc-1"}},
            {"from": "1", "id": "e", "type": "sticker", "sticker": {"id": "st-1"}}
        ]));

        let messages = extract_messages(&payload);
        assert_eq!(messages.len(), 5);

        assert_eq!(messages[0].body, "[Image]");
        assert_eq!(messages[0].media_id.as_deref(), Some("img-1"));
        assert_eq!(messages[0].media_url.as_deref(), Some("https://cdn/img"));

        assert_eq!(messages[1].body, "[Audio]");
        assert_eq!(messages[1].media_id.as_deref(), Some("aud-1"));
        assert!(messages[1].media_url.is_none());

        assert_eq!(messages[2].body, "[Location]");
        assert_eq!(messages[2].location.as_ref().unwrap()["latitude"], json!(1.5));

        assert_eq!(messages[3].body, "[Document]");
        assert!(messages[3].media_url.is_none());

        assert_eq!(messages[4].body, "");
        assert!(messages[4].media_id.is_none());
    }

    #[test]
    fn test_extract_tolerates_malformed_payloads() {
        assert!(extract_messages(&json!(null)).is_empty());
        assert!(extract_messages(&json!({"object": "page", "entry": []})).is_empty());
        assert!(extract_messages(&json!({"object": "whatsapp_business_account"})).is_empty());
        assert!(extract_messages(&json!({
            "object": "whatsapp_business_account",
            "entry": [{"changes": "oops"}, {"changes": [{"value": null}]}, 7]
        }))
        .is_empty());

        // Status updates carry no messages
        let statuses = json!({
            "object": "whatsapp_business_account",
            "entry": [{"changes": [{"value": {"statuses": [{"id": "wamid.1"}]}}]}]
        });
        assert!(extract_messages(&statuses).is_empty());

        // Messages without id or sender are skipped
        let payload = envelope(json!([{"type": "text"}, {"from": "1", "id": "ok", "type": "text"}]));
        let messages = extract_messages(&payload);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_id, "ok");
        assert_eq!(messages[0].body, "");
    }

    fn store(dir: &tempfile::TempDir, token: &str, phone: &str) -> Arc<SettingsStore> {
        let mut settings = Settings::defaults_from(|_| None);
        settings.api_token = token.to_string();
        settings.phone_number_id = phone.to_string();
        Arc::new(SettingsStore::open_with_defaults(
            dir.path().join("settings.json"),
            move || settings,
        ))
    }

    #[tokio::test]
    async fn test_send_requires_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let client = CloudApiClient::new("http://127.0.0.1:9", store(&dir, "", "PNID"));
        let err = client.send_text_message("111", "hi").await.unwrap_err();
        assert!(matches!(err, WhatsAppError::CredentialsNotSet));
    }

    #[tokio::test]
    async fn test_send_text_message() {
        let seen: Arc<Mutex<Vec<(Option<String>, Value)>>> = Arc::default();
        let captured = seen.clone();
        let router = Router::new().route(
            "/PNID/messages",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let captured = captured.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    captured.lock().unwrap().push((auth, body));
                    Json(json!({"messages": [{"id": "wamid.out"}]}))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let client = CloudApiClient::new(format!("http://{}", addr), store(&dir, "TOKEN", "PNID"));

        let message = InboundMessage::text("wamid.1", "111", "hi");
        client.send_reply(&message, "hello back").await.unwrap();

        let calls = seen.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.as_deref(), Some("Bearer TOKEN"));
        assert_eq!(
            calls[0].1,
            json!({
                "messaging_product": "whatsapp",
                "recipient_type": "individual",
                "to": "111",
                "type": "text",
                "text": {"body": "hello back"}
            })
        );
    }
}

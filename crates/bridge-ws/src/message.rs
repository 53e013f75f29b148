//! Realtime event types
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`;
//! events without a payload omit `data`.

use serde::{Deserialize, Serialize};

/// Event pushed from the bridge to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Renderable QR image (data URL)
    Qr(String),

    /// Session authenticated
    Ready { redirect: bool },

    /// Session lost
    Disconnected,

    /// QR attempts exhausted
    AuthFailed { message: String },

    /// Observer should navigate to `redirect`
    AuthRedirect { message: String, redirect: String },

    /// Pong response
    Pong,
}

impl ServerEvent {
    pub fn ready() -> Self {
        Self::Ready { redirect: true }
    }

    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::AuthFailed {
            message: message.into(),
        }
    }

    /// Redirect to the login page
    pub fn auth_redirect(message: impl Into<String>) -> Self {
        Self::AuthRedirect {
            message: message.into(),
            redirect: "/".to_string(),
        }
    }
}

/// Event sent by an observer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ClientEvent {
    /// Resend the current QR code, or start a session if there is none
    #[serde(rename = "requestQR")]
    RequestQr,

    /// Ping for keepalive
    #[serde(rename = "ping")]
    Ping,
}

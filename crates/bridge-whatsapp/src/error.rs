//! Error types for bridge-whatsapp

use thiserror::Error;

/// bridge-whatsapp error type
#[derive(Error, Debug)]
pub enum WhatsAppError {
    #[error("Cloud API credentials not set")]
    CredentialsNotSet,

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("QR code error: {0}")]
    Qr(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for WhatsAppError {
    fn from(err: reqwest::Error) -> Self {
        WhatsAppError::Http(err.to_string())
    }
}

impl From<WhatsAppError> for bridge_core::Error {
    fn from(err: WhatsAppError) -> Self {
        bridge_core::Error::Reply(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, WhatsAppError>;

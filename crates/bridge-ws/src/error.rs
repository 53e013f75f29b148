//! Error types for bridge-ws

use thiserror::Error;

/// WebSocket error type
#[derive(Error, Debug)]
pub enum WsError {
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Channel send error: {0}")]
    ChannelSend(String),
}

/// Result type alias for bridge-ws
pub type Result<T> = std::result::Result<T, WsError>;

//! Authentication middleware
//!
//! Guards the sidecar event intake with a shared `x-api-key`.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::error::ApiError;
use crate::server::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Reject sidecar requests whose key does not match the configured one
pub async fn require_bridge_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    if !validate_api_key(provided, state.bridge_api_key.as_deref()) {
        warn!("Rejected bridge event with missing or invalid API key");
        return Err(ApiError::AuthFailed);
    }

    Ok(next.run(request).await)
}

/// No key configured allows every request
pub fn validate_api_key(provided: Option<&str>, expected: Option<&str>) -> bool {
    match expected {
        None => true,
        Some(key) => provided == Some(key),
    }
}

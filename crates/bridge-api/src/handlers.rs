//! HTTP API handlers

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use bridge_core::{Settings, SettingsStore};
use bridge_whatsapp::lifecycle::RESET_MESSAGE;
use bridge_whatsapp::{
    extract_messages, verify_handshake, BridgeEvent, HandshakeQuery, LifecycleStatus,
    ProviderEvent,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{ApiError, Result};
use crate::server::AppState;

// ============================================================================
// Response types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
    pub redirect: bool,
    /// Present when cleanup had to be forced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Settings page view of the record
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedSettings {
    pub n8n_webhook_url: String,
    pub service_enabled: bool,
    pub blacklist_enabled: bool,
    pub blacklist: Vec<String>,
    pub welcome_message: String,
    pub unavailable_message: String,
    pub blacklist_message: String,
}

impl From<Settings> for UnifiedSettings {
    fn from(settings: Settings) -> Self {
        Self {
            n8n_webhook_url: settings.webhook_url,
            service_enabled: settings.service_enabled,
            blacklist_enabled: settings.blacklist_enabled,
            blacklist: settings.blacklist.into_iter().collect(),
            welcome_message: settings.welcome_message,
            unavailable_message: settings.unavailable_message,
            blacklist_message: settings.blacklist_message,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlacklistResponse {
    pub blacklist: Vec<String>,
    pub blacklist_enabled: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleResponse {
    pub success: bool,
    pub blacklist_enabled: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMessagesResponse {
    pub welcome_message: String,
    pub unavailable_message: String,
    pub blacklist_message: String,
    pub blacklist_enabled: bool,
}

// ============================================================================
// Handler functions
// ============================================================================

/// Health check endpoint
pub async fn health() -> &'static str {
    "OK"
}

pub async fn reset_session(State(state): State<AppState>) -> Json<ResetResponse> {
    info!("Session reset requested");
    let report = state.lifecycle.reset_session().await;
    if !report.is_clean() {
        warn!("Session reset finished with errors: {:?}", report.errors);
    }
    Json(ResetResponse {
        success: true,
        message: RESET_MESSAGE.to_string(),
    })
}

pub async fn logout(State(state): State<AppState>) -> Json<LogoutResponse> {
    let outcome = state.lifecycle.logout().await;
    Json(LogoutResponse {
        success: true,
        redirect: true,
        message: outcome
            .is_forced()
            .then(|| outcome.message().to_string()),
    })
}

pub async fn session_status(State(state): State<AppState>) -> Json<LifecycleStatus> {
    Json(state.lifecycle.status().await)
}

pub async fn get_settings(State(state): State<AppState>) -> Json<Settings> {
    Json(state.settings.get())
}

/// Run a settings write on the blocking pool
async fn write_settings<T, F>(state: &AppState, write: F) -> Result<T>
where
    F: FnOnce(&SettingsStore) -> bridge_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let store = state.settings.clone();
    tokio::task::spawn_blocking(move || write(&store))
        .await
        .map_err(|e| ApiError::Unavailable(format!("settings writer failed: {}", e)))?
        .map_err(ApiError::from)
}

/// Replace the whole settings record
pub async fn save_settings(
    State(state): State<AppState>,
    payload: std::result::Result<Json<Settings>, JsonRejection>,
) -> Result<Json<SuccessResponse>> {
    let Json(settings) = payload?;
    write_settings(&state, move |store| store.save(settings)).await?;
    info!("Settings updated, webhook URL changes will be applied to next messages");
    Ok(Json(SuccessResponse { success: true }))
}

pub async fn get_unified_settings(State(state): State<AppState>) -> Json<UnifiedSettings> {
    Json(state.settings.get().into())
}

pub async fn get_blacklist(State(state): State<AppState>) -> Json<BlacklistResponse> {
    let settings = state.settings.get();
    Json(BlacklistResponse {
        blacklist: settings.blacklist.into_iter().collect(),
        blacklist_enabled: settings.blacklist_enabled,
    })
}

pub async fn toggle_blacklist(State(state): State<AppState>) -> Result<Json<ToggleResponse>> {
    let enabled = write_settings(&state, SettingsStore::toggle_blacklist).await?;
    let word = if enabled { "enabled" } else { "disabled" };
    info!("Blacklist {}", word);
    Ok(Json(ToggleResponse {
        success: true,
        blacklist_enabled: enabled,
        message: format!("Blacklist {} successfully", word),
    }))
}

pub async fn system_messages(State(state): State<AppState>) -> Json<SystemMessagesResponse> {
    let settings = state.settings.get();
    Json(SystemMessagesResponse {
        welcome_message: settings.welcome_message,
        unavailable_message: settings.unavailable_message,
        blacklist_message: settings.blacklist_message,
        blacklist_enabled: settings.blacklist_enabled,
    })
}

/// Cloud API subscription handshake
pub async fn verify_webhook(
    State(state): State<AppState>,
    Query(query): Query<HandshakeQuery>,
) -> impl IntoResponse {
    debug!("Received webhook verification request");
    let verify_token = state.settings.get().verify_token;
    match verify_handshake(&query, &verify_token) {
        Some(challenge) => (StatusCode::OK, challenge),
        None => (StatusCode::FORBIDDEN, "Forbidden".to_string()),
    }
}

/// Cloud API message ingest; acknowledged before any forwarding happens
pub async fn receive_webhook(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> &'static str {
    let messages = extract_messages(&payload);

    if !messages.is_empty() {
        info!("Processed {} messages from webhook", messages.len());
    }

    for message in messages {
        let router = state.router.clone();
        let cloud = state.cloud.clone();
        tokio::spawn(async move {
            router.route(&message, cloud.as_ref()).await;
        });
    }

    "EVENT_RECEIVED"
}

/// Sidecar event intake
pub async fn bridge_events(
    State(state): State<AppState>,
    payload: std::result::Result<Json<BridgeEvent>, JsonRejection>,
) -> Result<Json<SuccessResponse>> {
    let Json(event) = payload?;
    debug!("Bridge event: {}", event.event);
    let event = ProviderEvent::try_from(event)?;

    state
        .provider_events
        .send(event)
        .map_err(|_| ApiError::Unavailable("session event loop has stopped".to_string()))?;

    Ok(Json(SuccessResponse { success: true }))
}

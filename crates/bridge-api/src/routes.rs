//! Route definitions

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};

use crate::handlers::{
    bridge_events, get_blacklist, get_settings, get_unified_settings, health, logout,
    receive_webhook, reset_session, save_settings, session_status, system_messages,
    toggle_blacklist, verify_webhook,
};
use crate::middleware::auth::require_bridge_key;
use crate::server::AppState;

/// Create the API router
pub fn routes(state: AppState) -> Router {
    let sidecar = Router::new()
        .route("/bridge/events", post(bridge_events))
        .route_layer(from_fn_with_state(state.clone(), require_bridge_key));

    Router::new()
        // Health check
        .route("/health", get(health))
        // Session control
        .route("/api/reset-session", post(reset_session))
        .route("/api/logout", post(logout))
        .route("/api/session/status", get(session_status))
        // Settings
        .route("/api/settings", get(get_settings).post(save_settings))
        .route(
            "/api/unified-settings",
            get(get_unified_settings).post(save_settings),
        )
        .route("/api/blacklist", get(get_blacklist))
        .route("/api/blacklist/toggle", post(toggle_blacklist))
        .route("/api/system-messages", get(system_messages))
        // Cloud API webhook
        .route("/webhook", get(verify_webhook).post(receive_webhook))
        .merge(sidecar)
        .with_state(state)
}

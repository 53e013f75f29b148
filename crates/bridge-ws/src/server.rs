//! WebSocket route wiring

use axum::{routing::get, Router};
use std::sync::Arc;

use crate::handler::{websocket_handler, ObserverHooks};
use crate::notifier::Notifier;

/// Shared WebSocket state
#[derive(Clone)]
pub struct WsState {
    /// Broadcast hub for lifecycle events
    pub notifier: Notifier,
    /// Connect and requestQR policy
    pub hooks: Arc<dyn ObserverHooks>,
}

impl WsState {
    pub fn new(notifier: Notifier, hooks: Arc<dyn ObserverHooks>) -> Self {
        Self { notifier, hooks }
    }
}

/// Router serving the realtime channel at `/ws`
pub fn ws_router(state: WsState) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .with_state(Arc::new(state))
}

//! HTTP API Server
//!
//! Starts and manages the axum-based HTTP server.

use std::path::Path;
use std::sync::Arc;

use axum::{http::HeaderValue, Router};
use bridge_core::{Config, MessageRouter, ServerConfig, SettingsStore};
use bridge_whatsapp::{CloudApiClient, ProviderEvent, SessionLifecycle};
use bridge_ws::{ws_router, WsState};
use tokio::sync::mpsc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::routes::routes;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<SettingsStore>,
    pub lifecycle: Arc<SessionLifecycle>,
    pub router: Arc<MessageRouter>,
    pub cloud: Arc<CloudApiClient>,
    /// Queue feeding the lifecycle event loop
    pub provider_events: mpsc::UnboundedSender<ProviderEvent>,
    /// Key the sidecar must present on `/bridge/events`
    pub bridge_api_key: Option<String>,
}

fn cors_layer(allowed_origins: Option<&[String]>) -> CorsLayer {
    let Some(origins) = allowed_origins else {
        return CorsLayer::permissive();
    };

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Assemble API, realtime channel and static pages
pub fn build_router(state: AppState, ws: WsState, server: &ServerConfig) -> Router {
    let mut router = routes(state).merge(ws_router(ws));

    if let Some(dir) = &server.static_dir {
        info!("Serving static files from: {}", dir);
        let dir = Path::new(dir);
        router = router
            .route_service("/", ServeFile::new(dir.join("qr.html")))
            .route_service("/settings", ServeFile::new(dir.join("settings.html")))
            .fallback_service(ServeDir::new(dir));
    }

    router
        .layer(cors_layer(server.allowed_origins.as_deref()))
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn start_server(config: &Config, state: AppState, ws: WsState) -> anyhow::Result<()> {
    let app = build_router(state, ws, &config.server);

    let addr = config.server.socket_addr()?;
    info!("HTTP server listening on {}", addr);
    info!("Realtime endpoint: ws://{}/ws", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

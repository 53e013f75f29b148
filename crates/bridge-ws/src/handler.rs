//! WebSocket observer connection handler

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::message::{ClientEvent, ServerEvent};
use crate::notifier::Observer;
use crate::server::WsState;
use crate::Result;

/// Callbacks invoked for observer activity
#[async_trait]
pub trait ObserverHooks: Send + Sync {
    /// A new observer connected and can be sent the current state
    async fn on_connect(&self, observer: &Observer);

    /// The observer asked for a QR code
    async fn on_request_qr(&self, observer: &Observer);
}

/// Handle WebSocket upgrade request
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<WsState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle established WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<WsState>) {
    let observer_id = uuid::Uuid::new_v4().to_string();
    info!("New observer connected: {}", observer_id);

    let (ws_tx, mut ws_rx) = socket.split();
    let ws_tx = Arc::new(Mutex::new(ws_tx));

    // Direct events for this observer only
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let observer = Observer::new(observer_id.clone(), tx);

    // Subscribe before the connect hook runs so no broadcast is missed
    let mut events = state.notifier.subscribe();

    let ws_tx_send = ws_tx.clone();
    let id_send = observer_id.clone();
    let send_task = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                Some(event) = rx.recv() => event,
                result = events.recv() => match result {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Observer {} lagged, skipped {} events", id_send, skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                else => break,
            };

            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to serialize {:?}: {}", event, e);
                    continue;
                }
            };

            let mut sink = ws_tx_send.lock().await;
            if sink.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
        debug!("Send task ended for observer: {}", id_send);
    });

    spawn_hook(&state, &observer, HookKind::Connect);

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => {
                if let Err(e) = handle_client_event(text.as_str(), &observer, &state) {
                    warn!("Ignoring message from observer {}: {}", observer_id, e);
                }
            }
            Ok(WsMessage::Ping(data)) => {
                let mut sink = ws_tx.lock().await;
                let _ = sink.send(WsMessage::Pong(data)).await;
            }
            Ok(WsMessage::Close(_)) => {
                info!("Observer closed connection: {}", observer_id);
                break;
            }
            Err(e) => {
                warn!("WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    send_task.abort();
    info!("Observer disconnected: {}", observer_id);
}

enum HookKind {
    Connect,
    RequestQr,
}

/// Hooks may wait on session initialization; run them off the read loop
fn spawn_hook(state: &Arc<WsState>, observer: &Observer, kind: HookKind) {
    let hooks = state.hooks.clone();
    let observer = observer.clone();
    tokio::spawn(async move {
        match kind {
            HookKind::Connect => hooks.on_connect(&observer).await,
            HookKind::RequestQr => hooks.on_request_qr(&observer).await,
        }
    });
}

/// Handle incoming observer message
fn handle_client_event(text: &str, observer: &Observer, state: &Arc<WsState>) -> Result<()> {
    let event: ClientEvent = serde_json::from_str(text)?;

    debug!("Received from observer {}: {:?}", observer.id, event);

    match event {
        ClientEvent::RequestQr => {
            info!("Manual QR code request from observer {}", observer.id);
            spawn_hook(state, observer, HookKind::RequestQr);
        }
        ClientEvent::Ping => observer.send(ServerEvent::Pong)?,
    }

    Ok(())
}

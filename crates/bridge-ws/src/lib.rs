//! bridge-ws: Realtime notifier for the WhatsApp ⇄ n8n bridge
//!
//! Pushes session lifecycle changes (QR image, ready, disconnected,
//! redirects) to every connected browser over WebSocket and lets a
//! freshly connected observer pull the current state.

pub mod error;
pub mod handler;
pub mod message;
pub mod notifier;
pub mod server;

pub use error::{Result, WsError};
pub use handler::{websocket_handler, ObserverHooks};
pub use message::{ClientEvent, ServerEvent};
pub use notifier::{Notifier, Observer};
pub use server::{ws_router, WsState};

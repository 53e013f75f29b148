//! bridge-api: HTTP surface for the WhatsApp ⇄ n8n bridge
//!
//! Session control, the settings API, the Cloud API webhook, the sidecar
//! event intake and the static login/settings pages. Built with axum.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;

pub use error::{ApiError, Result};
pub use server::{build_router, start_server, AppState};

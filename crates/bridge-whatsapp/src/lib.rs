//! bridge-whatsapp: WhatsApp session lifecycle and Cloud API adapter
//!
//! Owns the WhatsApp Web authentication state machine (QR codes,
//! reconnection, reset and logout) on top of an opaque session provider,
//! and the Cloud API webhook ingress path.

pub mod auth_flag;
pub mod bridge;
pub mod cloud;
pub mod error;
pub mod lifecycle;
pub mod provider;
pub mod qr;
pub mod single_flight;

pub use auth_flag::AuthFlag;
pub use bridge::BridgeProvider;
pub use cloud::{extract_messages, verify_handshake, CloudApiClient, HandshakeQuery};
pub use error::{Result, WhatsAppError};
pub use lifecycle::{
    CleanupReport, InitOutcome, LifecycleConfig, LifecycleStatus, LogoutOutcome, SessionLifecycle,
    SessionState,
};
pub use provider::{AccountInfo, BridgeEvent, ProviderEvent, ProviderStatus, SessionProvider};
pub use single_flight::SingleFlight;

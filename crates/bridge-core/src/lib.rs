//! bridge-core: WhatsApp ⇄ n8n bridge core library
//!
//! Process configuration, the operator-editable settings record,
//! the normalized inbound message shape, the n8n webhook dispatcher
//! and the message routing policy shared by every ingress path.

pub mod config;
pub mod error;
pub mod message;
pub mod n8n;
pub mod router;
pub mod settings;

pub use config::{BridgeConfig, CloudConfig, Config, ServerConfig, SessionConfig};
pub use error::{Error, Result};
pub use message::{ForwardPayload, InboundMessage};
pub use n8n::{Forwarder, N8nWebhook, WebhookResponse};
pub use router::{Disposition, MessageRouter, ReplySink};
pub use settings::{Settings, SettingsStore};

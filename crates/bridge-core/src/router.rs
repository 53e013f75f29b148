//! Inbound message router
//!
//! Applies the service switch and blacklist to every inbound message,
//! forwards the rest to n8n and sends back any reply the workflow returns.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::message::{ForwardPayload, InboundMessage};
use crate::n8n::Forwarder;
use crate::settings::SettingsStore;

/// Channel that can answer the sender of a message
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn send_reply(&self, message: &InboundMessage, text: &str) -> Result<()>;
}

/// What happened to a routed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Service switch is off; nothing was done
    ServiceDisabled,
    /// Sender is blacklisted; never forwarded
    Blacklisted { replied: bool },
    /// Forwarded to n8n
    Forwarded { replied: bool },
    /// Forwarding or replying failed
    Failed,
}

pub struct MessageRouter {
    settings: Arc<SettingsStore>,
    forwarder: Arc<dyn Forwarder>,
}

impl MessageRouter {
    pub fn new(settings: Arc<SettingsStore>, forwarder: Arc<dyn Forwarder>) -> Self {
        Self {
            settings,
            forwarder,
        }
    }

    /// Route one message; failures are logged and never propagated
    pub async fn route(&self, message: &InboundMessage, sink: &dyn ReplySink) -> Disposition {
        info!("Received message {} from {}", message.message_id, message.from);
        debug!(
            "Message {} body: {}",
            message.message_id,
            message.body.chars().take(80).collect::<String>()
        );

        if !self.settings.is_service_enabled() {
            debug!("Service disabled, ignoring message {}", message.message_id);
            return Disposition::ServiceDisabled;
        }

        if self.settings.is_blacklisted(&message.from) {
            info!("Blacklisted sender: {}", message.from);
            let reply = self.settings.get().blacklist_reply().map(str::to_string);
            let replied = match reply {
                Some(text) => match sink.send_reply(message, &text).await {
                    Ok(()) => true,
                    Err(e) => {
                        error!("Failed to reply to blacklisted sender {}: {}", message.from, e);
                        false
                    }
                },
                None => false,
            };
            return Disposition::Blacklisted { replied };
        }

        let payload = ForwardPayload::from(message);
        let response = match self.forwarder.trigger(&payload).await {
            Ok(response) => response,
            Err(e) => {
                error!("Error processing message {}: {}", message.message_id, e);
                return Disposition::Failed;
            }
        };

        let Some(reply) = response.reply() else {
            return Disposition::Forwarded { replied: false };
        };

        match sink.send_reply(message, reply).await {
            Ok(()) => {
                debug!("Sent reply to {}", message.from);
                Disposition::Forwarded { replied: true }
            }
            Err(e) => {
                error!("Failed to send reply to {}: {}", message.from, e);
                Disposition::Failed
            }
        }
    }
}

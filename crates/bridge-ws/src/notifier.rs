//! Publish/subscribe hub for lifecycle events

use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::error::{Result, WsError};
use crate::message::ServerEvent;

const CHANNEL_CAPACITY: usize = 64;

/// Fan-out channel shared by every connected observer
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<ServerEvent>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Push an event to all observers, returning how many received it
    pub fn broadcast(&self, event: ServerEvent) -> usize {
        match self.tx.send(event) {
            Ok(count) => count,
            Err(broadcast::error::SendError(event)) => {
                debug!("No observers connected, dropping {:?}", event);
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle addressing a single connected observer
#[derive(Debug, Clone)]
pub struct Observer {
    pub id: String,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl Observer {
    pub fn new(id: impl Into<String>, tx: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self { id: id.into(), tx }
    }

    /// Send an event to this observer only
    pub fn send(&self, event: ServerEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|e| WsError::ChannelSend(format!("observer {} is gone: {}", self.id, e)))
    }
}

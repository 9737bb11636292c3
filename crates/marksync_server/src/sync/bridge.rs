//! Cross-instance bridge boundary. Every appended event is published here
//! so hub instances that don't own the originating session can push it to
//! their own connections. Delivery across instances is eventual and
//! unordered; the resolver's determinism makes convergence
//! order-independent.

use async_trait::async_trait;
use marksync_core::SyncEvent;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge publish failed: {0}")]
    Publish(String),
}

/// A message on the bus carries its origin instance so subscribers can skip
/// events they published themselves.
#[derive(Debug, Clone)]
pub struct BridgeMessage {
    pub origin: String,
    pub event: SyncEvent,
}

/// Boundary trait for the cross-instance message bus
#[async_trait]
pub trait EventBridge: Send + Sync {
    /// Identity of this service instance on the bus
    fn instance_id(&self) -> &str;

    /// Fan a newly appended event out to other instances
    async fn publish(&self, event: &SyncEvent) -> Result<(), BridgeError>;

    /// Subscribe to events published by any instance, own included
    fn subscribe(&self) -> broadcast::Receiver<BridgeMessage>;
}

/// In-process bridge used by single-instance deployments and tests. A real
/// deployment substitutes an external bus behind the same trait.
pub struct LocalBridge {
    instance_id: String,
    tx: broadcast::Sender<BridgeMessage>,
}

impl LocalBridge {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self {
            instance_id: Uuid::new_v4().to_string(),
            tx,
        }
    }

    /// Another bridge on the same channel, with its own instance identity.
    /// Lets tests exercise the multi-instance fan-out path in one process.
    pub fn attached(&self) -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
            tx: self.tx.clone(),
        }
    }
}

impl Default for LocalBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBridge for LocalBridge {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    async fn publish(&self, event: &SyncEvent) -> Result<(), BridgeError> {
        // No subscribers is fine: single-instance deployments run exactly
        // this way.
        let _ = self.tx.send(BridgeMessage {
            origin: self.instance_id.clone(),
            event: event.clone(),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BridgeMessage> {
        self.tx.subscribe()
    }
}

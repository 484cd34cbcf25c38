//! Broadcast bus for conversation change notifications.

use super::{ChangeKind, ConversationChange};
use tokio::sync::broadcast;

/// Receiver half of the change bus.
pub struct ChangeReceiver {
    rx: broadcast::Receiver<ConversationChange>,
}

impl ChangeReceiver {
    /// Receive the next change.
    pub async fn recv(&mut self) -> Result<ConversationChange, BusError> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => BusError::Closed,
            broadcast::error::RecvError::Lagged(n) => BusError::Lagged(n),
        })
    }

    /// Try to receive a change without waiting.
    pub fn try_recv(&mut self) -> Result<Option<ConversationChange>, BusError> {
        match self.rx.try_recv() {
            Ok(change) => Ok(Some(change)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(BusError::Closed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => Err(BusError::Lagged(n)),
        }
    }

    /// Stop listening.
    pub fn unsubscribe(self) {}
}

/// Change bus shared by the store and its observers.
#[derive(Clone)]
pub struct ChangeBus {
    tx: broadcast::Sender<ConversationChange>,
}

impl ChangeBus {
    /// Create a new change bus.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    /// Subscribe to changes.
    pub fn subscribe(&self) -> ChangeReceiver {
        ChangeReceiver {
            rx: self.tx.subscribe(),
        }
    }

    /// Publish a change. Having no subscribers is not an error.
    pub fn notify(&self, conv_id: &str, kind: ChangeKind) {
        let change = ConversationChange::new(conv_id, kind);
        if self.tx.send(change).is_err() {
            tracing::trace!(conv_id, "No change subscribers");
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Bus errors.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Channel closed")]
    Closed,
    #[error("Lagged behind by {0} changes")]
    Lagged(u64),
}

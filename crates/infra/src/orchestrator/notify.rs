//! Outbound notification fan-out.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use wareflow_events::{EventHandler, HandlerError};

use crate::events::{WarehouseEvent, WarehouseSystemEvent};

/// What socket clients receive for each committed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub event_id: Uuid,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub action: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: WarehouseEvent,
}

impl From<&WarehouseSystemEvent> for Notification {
    fn from(event: &WarehouseSystemEvent) -> Self {
        Self {
            event_id: event.event_id(),
            event_type: event.event_type().to_string(),
            entity_type: event.entity_type().to_string(),
            entity_id: event.entity_id(),
            action: event.action().to_string(),
            occurred_at: event.occurred_at(),
            payload: event.payload().clone(),
        }
    }
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, notification: Notification) -> Result<(), HandlerError>;
}

/// Lossy in-process broadcast; slow receivers miss messages.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl NotificationDispatcher for BroadcastNotifier {
    async fn dispatch(&self, notification: Notification) -> Result<(), HandlerError> {
        // No receivers is not an error.
        let _ = self.tx.send(notification);
        Ok(())
    }
}

/// Wildcard handler forwarding events to a [`NotificationDispatcher`].
pub struct NotificationRelay {
    dispatcher: Arc<dyn NotificationDispatcher>,
}

impl NotificationRelay {
    pub fn new(dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl EventHandler<WarehouseEvent> for NotificationRelay {
    fn name(&self) -> &str {
        "notification_relay"
    }

    async fn handle(&self, event: &WarehouseSystemEvent) -> Result<(), HandlerError> {
        self.dispatcher.dispatch(Notification::from(event)).await
    }
}

#[cfg(test)]
mod tests {
    use wareflow_core::{ItemId, LotId, WarehouseId};
    use wareflow_inventory::LedgerEvent;

    use super::*;
    use crate::events::ledger_event;

    #[tokio::test]
    async fn relay_broadcasts_to_subscribers() {
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();
        let relay = NotificationRelay::new(Arc::new(notifier));

        let event = ledger_event(
            LedgerEvent::LotReceived {
                lot_id: LotId::new(),
                item_id: ItemId::new(),
                warehouse_id: WarehouseId::new(),
                lot_number: "LOT-1".into(),
                quantity: 5,
                unit_cost: 10,
                source_document_id: None,
            },
            None,
        );
        relay.handle(&event).await.unwrap();

        let got = rx.recv().await.unwrap();
        assert_eq!(got.event_id, event.event_id());
        assert_eq!(got.event_type, "lot.received");
        assert_eq!(got.entity_type, "inventory_lot");
    }

    #[tokio::test]
    async fn dispatch_without_receivers_is_ok() {
        let notifier = BroadcastNotifier::new(1);
        let event = ledger_event(LedgerEvent::LotBlocked { lot_id: LotId::new() }, None);
        assert!(notifier.dispatch(Notification::from(&event)).await.is_ok());
    }
}

//! The event type carried by the warehouse bus.

use serde::{Deserialize, Serialize};

use wareflow_core::UserId;
use wareflow_documents::DocumentEvent;
use wareflow_events::{Event, EventBus, SystemEvent};
use wareflow_inventory::LedgerEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarehouseEvent {
    Document(DocumentEvent),
    Ledger(LedgerEvent),
}

impl Event for WarehouseEvent {
    fn event_type(&self) -> &'static str {
        match self {
            WarehouseEvent::Document(e) => e.event_type(),
            WarehouseEvent::Ledger(e) => e.event_type(),
        }
    }
}

impl From<DocumentEvent> for WarehouseEvent {
    fn from(value: DocumentEvent) -> Self {
        WarehouseEvent::Document(value)
    }
}

impl From<LedgerEvent> for WarehouseEvent {
    fn from(value: LedgerEvent) -> Self {
        WarehouseEvent::Ledger(value)
    }
}

pub type WarehouseSystemEvent = SystemEvent<WarehouseEvent>;
pub type WarehouseBus = EventBus<WarehouseEvent>;

pub fn document_event(event: DocumentEvent, performed_by: Option<UserId>) -> WarehouseSystemEvent {
    let entity_id = event.document_id().into();
    let action = event.action();
    SystemEvent::new("document", entity_id, action, event.into(), performed_by)
}

pub fn ledger_event(event: LedgerEvent, performed_by: Option<UserId>) -> WarehouseSystemEvent {
    let entity_type = event.entity_type();
    let entity_id = event.entity_id();
    let action = event.action();
    SystemEvent::new(entity_type, entity_id, action, event.into(), performed_by)
}

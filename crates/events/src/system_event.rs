use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use wareflow_core::UserId;

use crate::Event;

/// Immutable notice of a committed change.
///
/// This is the unit the bus delivers to handlers and the unit stores enqueue in
/// their outbox inside the same transaction as the change it describes.
///
/// Notes:
/// - `entity_type` / `entity_id` name the record that changed (e.g. `"document"`).
/// - `action` is the verb that produced it (e.g. `"approve"`, `"receive"`).
/// - `payload` is a typed event; its `event_type()` is what subscriptions match on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemEvent<E> {
    event_id: Uuid,
    entity_type: String,
    entity_id: Uuid,
    action: String,
    payload: E,
    performed_by: Option<UserId>,
    occurred_at: DateTime<Utc>,
}

impl<E> SystemEvent<E> {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: Uuid,
        action: impl Into<String>,
        payload: E,
        performed_by: Option<UserId>,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            entity_type: entity_type.into(),
            entity_id,
            action: action.into(),
            payload,
            performed_by,
            occurred_at: Utc::now(),
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn entity_id(&self) -> Uuid {
        self.entity_id
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }

    pub fn performed_by(&self) -> Option<UserId> {
        self.performed_by
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

impl<E: Event> SystemEvent<E> {
    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }
}

//! Audit trail adapter.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use wareflow_core::UserId;
use wareflow_events::{EventHandler, HandlerError};

use crate::events::{WarehouseEvent, WarehouseSystemEvent};

/// One row of the external audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub table_name: String,
    pub record_id: Uuid,
    pub action: String,
    pub old_values: Option<JsonValue>,
    pub new_values: Option<JsonValue>,
    pub performed_by: Option<UserId>,
    pub ip_address: Option<String>,
}

impl AuditEntry {
    pub fn from_event(event: &WarehouseSystemEvent) -> Self {
        let (table_name, old_values) = match event.payload() {
            WarehouseEvent::Document(doc) => {
                let old = match doc {
                    wareflow_documents::DocumentEvent::Transitioned { from, .. } => {
                        Some(serde_json::json!({ "status": from }))
                    }
                    _ => None,
                };
                ("documents", old)
            }
            WarehouseEvent::Ledger(ledger) => match ledger.entity_type() {
                "inventory_lot" => ("inventory_lots", None),
                _ => ("stock_reservations", None),
            },
        };
        Self {
            table_name: table_name.to_string(),
            record_id: event.entity_id(),
            action: event.action().to_string(),
            old_values,
            new_values: serde_json::to_value(event.payload()).ok(),
            performed_by: event.performed_by(),
            ip_address: None,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("audit sink error: {0}")]
pub struct AuditError(pub String);

/// Fire-and-forget destination for audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError>;
}

/// Writes entries to the `audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        tracing::info!(
            target: "audit",
            table = %entry.table_name,
            record_id = %entry.record_id,
            action = %entry.action,
            performed_by = ?entry.performed_by,
            "audit"
        );
        Ok(())
    }
}

/// Keeps entries in memory. Intended for tests/dev.
#[derive(Debug, Default, Clone)]
pub struct InMemoryAuditSink {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(entry);
        Ok(())
    }
}

/// Wildcard handler feeding every event to an [`AuditSink`].
///
/// Sink failures are logged and swallowed; audit is never retried.
pub struct AuditTrail {
    sink: Arc<dyn AuditSink>,
}

impl AuditTrail {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl EventHandler<WarehouseEvent> for AuditTrail {
    fn name(&self) -> &str {
        "audit_trail"
    }

    async fn handle(&self, event: &WarehouseSystemEvent) -> Result<(), HandlerError> {
        if let Err(err) = self.sink.record(AuditEntry::from_event(event)).await {
            tracing::warn!(event_id = %event.event_id(), error = %err, "audit sink rejected entry");
        }
        Ok(())
    }
}

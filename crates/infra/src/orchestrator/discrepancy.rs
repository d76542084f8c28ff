use std::sync::{Arc, Weak};

use async_trait::async_trait;

use wareflow_auth::Actor;
use wareflow_documents::{DocumentEvent, DocumentStatus, DocumentType, InspectionResult, NewDocument};
use wareflow_events::{EventHandler, HandlerError};

use crate::engine::DocumentEngine;
use crate::events::{WarehouseEvent, WarehouseSystemEvent};

pub(crate) const TRIGGER: &str = "document.transitioned";

/// Raises a draft discrepancy report when a quality inspection completes
/// with a failing result.
///
/// Idempotent: a report already referencing the inspection is left alone,
/// so re-driven deliveries are harmless.
pub struct DiscrepancyOnFailedInspection {
    engine: Weak<DocumentEngine>,
    actor: Actor,
}

impl DiscrepancyOnFailedInspection {
    /// Holds the engine weakly; the engine's bus owns this handler.
    pub fn new(engine: &Arc<DocumentEngine>, actor: Actor) -> Self {
        Self {
            engine: Arc::downgrade(engine),
            actor,
        }
    }
}

#[async_trait]
impl EventHandler<WarehouseEvent> for DiscrepancyOnFailedInspection {
    fn name(&self) -> &str {
        "discrepancy_on_failed_inspection"
    }

    async fn handle(&self, event: &WarehouseSystemEvent) -> Result<(), HandlerError> {
        let WarehouseEvent::Document(DocumentEvent::Transitioned {
            document_id,
            document_type: DocumentType::QualityInspection,
            document_number,
            to: DocumentStatus::Completed,
            inspection_result: Some(InspectionResult::Fail),
            warehouse_id,
            project_id,
            ..
        }) = event.payload()
        else {
            return Ok(());
        };

        let engine = self
            .engine
            .upgrade()
            .ok_or_else(|| HandlerError::new("document engine is gone"))?;

        let input = NewDocument {
            warehouse_id: *warehouse_id,
            project_id: *project_id,
            reference_document_id: Some(*document_id),
            notes: Some(format!("Quality inspection {document_number} failed")),
            ..NewDocument::default()
        };

        let (report, created) = engine
            .create_once_for_reference(DocumentType::DiscrepancyReport, input, &self.actor)
            .await
            .map_err(|e| HandlerError::new(e.to_string()))?;

        if created {
            tracing::info!(
                inspection_id = %document_id,
                report_id = %report.id,
                report_number = %report.document_number,
                "discrepancy report raised for failed inspection"
            );
        } else {
            tracing::debug!(inspection_id = %document_id, "discrepancy report already exists");
        }
        Ok(())
    }
}

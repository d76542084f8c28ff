use serde::{Deserialize, Serialize};

use wareflow_core::{DocumentId, ItemId, LineId, ProjectId, WarehouseId};
use wareflow_events::Event;

use crate::{Action, Document, DocumentLine, DocumentStatus, DocumentType, InspectionResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocumentEvent {
    Created {
        document_id: DocumentId,
        document_type: DocumentType,
        document_number: String,
        status: DocumentStatus,
        warehouse_id: Option<WarehouseId>,
        project_id: Option<ProjectId>,
        reference_document_id: Option<DocumentId>,
        total_value: u64,
    },
    Transitioned {
        document_id: DocumentId,
        document_type: DocumentType,
        document_number: String,
        from: DocumentStatus,
        to: DocumentStatus,
        action: Action,
        version: u64,
        total_value: u64,
        warehouse_id: Option<WarehouseId>,
        project_id: Option<ProjectId>,
        inspection_result: Option<InspectionResult>,
        reference_document_id: Option<DocumentId>,
        reason: Option<String>,
    },
    LineAdded {
        document_id: DocumentId,
        document_type: DocumentType,
        line_id: LineId,
        item_id: ItemId,
        quantity: i64,
        unit_cost: u64,
        version: u64,
    },
}

impl DocumentEvent {
    pub fn created(doc: &Document) -> Self {
        DocumentEvent::Created {
            document_id: doc.id,
            document_type: doc.document_type,
            document_number: doc.document_number.clone(),
            status: doc.status,
            warehouse_id: doc.warehouse_id,
            project_id: doc.project_id,
            reference_document_id: doc.reference_document_id,
            total_value: doc.total_value,
        }
    }

    /// Built from the document *after* the transition was applied.
    pub fn transitioned(doc: &Document, from: DocumentStatus, action: Action, reason: Option<String>) -> Self {
        DocumentEvent::Transitioned {
            document_id: doc.id,
            document_type: doc.document_type,
            document_number: doc.document_number.clone(),
            from,
            to: doc.status,
            action,
            version: doc.version,
            total_value: doc.total_value,
            warehouse_id: doc.warehouse_id,
            project_id: doc.project_id,
            inspection_result: doc.inspection_result,
            reference_document_id: doc.reference_document_id,
            reason,
        }
    }

    pub fn line_added(doc: &Document, line: &DocumentLine) -> Self {
        DocumentEvent::LineAdded {
            document_id: doc.id,
            document_type: doc.document_type,
            line_id: line.id,
            item_id: line.item_id,
            quantity: line.quantity,
            unit_cost: line.unit_cost,
            version: doc.version,
        }
    }

    pub fn document_id(&self) -> DocumentId {
        match self {
            DocumentEvent::Created { document_id, .. }
            | DocumentEvent::Transitioned { document_id, .. }
            | DocumentEvent::LineAdded { document_id, .. } => *document_id,
        }
    }

    pub fn document_type(&self) -> DocumentType {
        match self {
            DocumentEvent::Created { document_type, .. }
            | DocumentEvent::Transitioned { document_type, .. }
            | DocumentEvent::LineAdded { document_type, .. } => *document_type,
        }
    }

    /// Verb recorded on the system event.
    pub fn action(&self) -> &'static str {
        match self {
            DocumentEvent::Created { .. } => "create",
            DocumentEvent::Transitioned { action, .. } => action.as_str(),
            DocumentEvent::LineAdded { .. } => "add_line",
        }
    }
}

impl Event for DocumentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DocumentEvent::Created { .. } => "document.created",
            DocumentEvent::Transitioned { .. } => "document.transitioned",
            DocumentEvent::LineAdded { .. } => "document.line_added",
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use wareflow_core::UserId;

    use super::*;
    use crate::NewDocument;

    #[test]
    fn transitioned_carries_before_and_after() {
        let mut doc = Document::draft(
            DocumentType::QualityInspection,
            "QCI-2026-0001".into(),
            NewDocument::default(),
            UserId::new(),
            Utc::now(),
        )
        .unwrap();
        doc.advance(DocumentStatus::InProgress, Utc::now());

        let e = DocumentEvent::transitioned(&doc, DocumentStatus::Draft, Action::Start, None);
        assert_eq!(e.event_type(), "document.transitioned");
        assert_eq!(e.action(), "start");
        match e {
            DocumentEvent::Transitioned { from, to, version, .. } => {
                assert_eq!(from, DocumentStatus::Draft);
                assert_eq!(to, DocumentStatus::InProgress);
                assert_eq!(version, 2);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn json_shape_is_tagged() {
        let doc = Document::draft(
            DocumentType::GoodsReceipt,
            "GRN-2026-0001".into(),
            NewDocument::default(),
            UserId::new(),
            Utc::now(),
        )
        .unwrap();
        let json = serde_json::to_value(DocumentEvent::created(&doc)).unwrap();
        assert_eq!(json["type"], "created");
        assert_eq!(json["document_type"], "goods_receipt");
        assert_eq!(json["status"], "draft");
    }
}

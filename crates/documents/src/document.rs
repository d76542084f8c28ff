use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wareflow_core::{DocumentId, DomainError, DomainResult, ItemId, LineId, ProjectId, UserId, WarehouseId};

use crate::{Action, DocumentStatus, DocumentType, InspectionResult, LineStatus};

/// One item line on a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLine {
    pub id: LineId,
    pub document_id: DocumentId,
    pub item_id: ItemId,
    pub quantity: i64,
    /// Minor currency units per unit.
    pub unit_cost: u64,
    pub line_status: LineStatus,
}

/// Largest line value or document total; amounts are persisted as `BIGINT`.
pub const MAX_AMOUNT: u64 = i64::MAX as u64;

fn checked_amount(value: Option<u64>, what: &str) -> DomainResult<u64> {
    value
        .filter(|v| *v <= MAX_AMOUNT)
        .ok_or_else(|| DomainError::validation(format!("{what} exceeds {MAX_AMOUNT}")))
}

impl DocumentLine {
    /// `quantity × unit_cost`, failing above [`MAX_AMOUNT`].
    pub fn value(&self) -> DomainResult<u64> {
        let value = u64::try_from(self.quantity)
            .ok()
            .and_then(|q| q.checked_mul(self.unit_cost));
        checked_amount(value, "line value")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLine {
    pub item_id: ItemId,
    pub quantity: i64,
    #[serde(default)]
    pub unit_cost: u64,
}

impl NewLine {
    fn validate(&self) -> DomainResult<()> {
        if self.quantity <= 0 {
            return Err(DomainError::validation("line quantity must be positive"));
        }
        Ok(())
    }
}

/// Fields a caller supplies when creating a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDocument {
    #[serde(default)]
    pub warehouse_id: Option<WarehouseId>,
    #[serde(default)]
    pub destination_warehouse_id: Option<WarehouseId>,
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    #[serde(default)]
    pub reference_document_id: Option<DocumentId>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub lines: Vec<NewLine>,
}

/// A request to move a document along its workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionInput {
    pub action: Action,
    /// Required when completing a quality inspection.
    #[serde(default)]
    pub inspection_result: Option<InspectionResult>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl TransitionInput {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            inspection_result: None,
            reason: None,
        }
    }

    pub fn with_inspection_result(mut self, result: InspectionResult) -> Self {
        self.inspection_result = Some(result);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// A warehouse document.
///
/// `version` is the optimistic-concurrency token: it starts at 1 and is bumped
/// by every persisted mutation. A document in a terminal status never changes
/// again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub document_type: DocumentType,
    pub document_number: String,
    pub status: DocumentStatus,
    pub version: u64,
    pub total_value: u64,
    pub warehouse_id: Option<WarehouseId>,
    pub destination_warehouse_id: Option<WarehouseId>,
    pub project_id: Option<ProjectId>,
    pub reference_document_id: Option<DocumentId>,
    pub inspection_result: Option<InspectionResult>,
    /// Approval tier resolved at submit time. Informational only; enforcement
    /// re-resolves on approve.
    pub approval_level: Option<u32>,
    pub notes: Option<String>,
    pub lines: Vec<DocumentLine>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn draft(
        document_type: DocumentType,
        document_number: String,
        input: NewDocument,
        created_by: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let id = DocumentId::new();
        let mut doc = Self {
            id,
            document_type,
            document_number,
            status: DocumentStatus::Draft,
            version: 1,
            total_value: 0,
            warehouse_id: input.warehouse_id,
            destination_warehouse_id: input.destination_warehouse_id,
            project_id: input.project_id,
            reference_document_id: input.reference_document_id,
            inspection_result: None,
            approval_level: None,
            notes: input.notes,
            lines: Vec::with_capacity(input.lines.len()),
            created_by,
            created_at: now,
            updated_at: now,
        };
        for line in input.lines {
            doc.push_line(line)?;
        }
        Ok(doc)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Append a line and recompute the total. Editability is the workflow's call.
    pub fn push_line(&mut self, line: NewLine) -> DomainResult<&DocumentLine> {
        line.validate()?;
        let line = DocumentLine {
            id: LineId::new(),
            document_id: self.id,
            item_id: line.item_id,
            quantity: line.quantity,
            unit_cost: line.unit_cost,
            line_status: LineStatus::Open,
        };
        let value = line.value()?;
        self.total_value = checked_amount(self.total_value.checked_add(value), "document total")?;
        self.lines.push(line);
        self.lines
            .last()
            .ok_or_else(|| DomainError::invariant("line was not appended"))
    }

    pub fn recompute_total(&mut self) -> DomainResult<u64> {
        let mut total: u64 = 0;
        for line in &self.lines {
            total = checked_amount(total.checked_add(line.value()?), "document total")?;
        }
        self.total_value = total;
        Ok(total)
    }

    pub fn set_line_status(&mut self, status: LineStatus) {
        for line in &mut self.lines {
            if line.line_status != LineStatus::Cancelled {
                line.line_status = status;
            }
        }
    }

    /// Whether the document sits at, or moves stock to, `warehouse_id`.
    pub fn touches_warehouse(&self, warehouse_id: WarehouseId) -> bool {
        self.warehouse_id == Some(warehouse_id) || self.destination_warehouse_id == Some(warehouse_id)
    }

    /// Record the new status and bump the version.
    pub fn advance(&mut self, to: DocumentStatus, now: DateTime<Utc>) {
        self.status = to;
        self.touch(now);
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = now;
    }
}

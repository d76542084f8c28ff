//! Document state machine engine.
//!
//! Every document mutation runs through the same pipeline:
//!
//! ```text
//! request (document, action, actor)
//!   ↓
//! 1. Begin a store transaction; load and lock the current document
//!   ↓
//! 2. Compare versions (stale caller → Conflict, nothing written)
//!   ↓
//! 3. Look up (status, action) in the type's workflow (→ InvalidTransition)
//!   ↓
//! 4. Role, permission, scope and approval-tier checks (→ Forbidden)
//!   ↓
//! 5. Validators, then the side effect (lot/reservation writes)
//!   ↓
//! 6. Persist status + version (compare-and-swap), enqueue the event
//!   ↓
//! 7. Commit, then publish the enqueued events on the bus
//! ```
//!
//! Any error before the commit drops the transaction, so a failed transition
//! leaves no partial state behind. Publication happens strictly after the
//! transaction is released: handlers may re-enter the engine.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::instrument;

use wareflow_auth::{Actor, PermissionService};
use wareflow_core::{DocumentId, DomainError, DomainResult, WarehouseId};
use wareflow_documents::{
    Action, Document, DocumentEvent, DocumentLine, DocumentType, LineStatus, NewDocument, NewLine,
    SideEffect, TransitionInput, Workflow, WorkflowRegistry,
};
use wareflow_inventory::{NewLot, ReservationStatus};

use crate::approvals::ApprovalResolver;
use crate::config::EngineConfig;
use crate::counter::DocumentCounter;
use crate::error::EngineResult;
use crate::events::{WarehouseBus, WarehouseSystemEvent, document_event};
use crate::ledger::{self, LotLedger};
use crate::outbox::{drain_outbox, publish_committed};
use crate::store::{DocumentStore, StoreTx};

/// Permission action checked for line edits.
const UPDATE: &str = "update";
const CREATE: &str = "create";

pub struct DocumentEngine {
    store: Arc<dyn DocumentStore>,
    bus: Arc<WarehouseBus>,
    registry: WorkflowRegistry,
    permissions: Arc<dyn PermissionService>,
    approvals: ApprovalResolver,
    counter: DocumentCounter,
    outbox_batch: usize,
}

impl DocumentEngine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        bus: Arc<WarehouseBus>,
        permissions: Arc<dyn PermissionService>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            approvals: ApprovalResolver::new(store.clone(), config.role_hierarchy()),
            counter: DocumentCounter::new(store.clone(), config.numbering.clone()),
            registry: WorkflowRegistry::standard(),
            outbox_batch: config.outbox_batch,
            store,
            bus,
            permissions,
        }
    }

    pub fn with_registry(mut self, registry: WorkflowRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<WarehouseBus> {
        &self.bus
    }

    pub fn approvals(&self) -> &ApprovalResolver {
        &self.approvals
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    pub fn permissions(&self) -> &Arc<dyn PermissionService> {
        &self.permissions
    }

    /// A ledger sharing this engine's store and bus.
    pub fn ledger(&self) -> LotLedger {
        LotLedger::new(self.store.clone(), self.bus.clone())
    }

    /// Create a draft document.
    ///
    /// The number is drawn only after role, permission and scope checks pass.
    #[instrument(skip_all, fields(document_type = %document_type, actor_id = %actor.id), err)]
    pub async fn create(
        &self,
        document_type: DocumentType,
        input: NewDocument,
        actor: &Actor,
    ) -> EngineResult<Document> {
        let (doc, _) = self.create_inner(document_type, input, actor, false).await?;
        Ok(doc)
    }

    /// Create a draft that references another document, unless a document of
    /// this type already references it.
    ///
    /// Returns the document and whether it was created by this call. The
    /// existence check and the insert share one transaction.
    #[instrument(skip_all, fields(document_type = %document_type, actor_id = %actor.id), err)]
    pub async fn create_once_for_reference(
        &self,
        document_type: DocumentType,
        input: NewDocument,
        actor: &Actor,
    ) -> EngineResult<(Document, bool)> {
        if input.reference_document_id.is_none() {
            return Err(DomainError::validation("a reference document is required").into());
        }
        self.create_inner(document_type, input, actor, true).await
    }

    async fn create_inner(
        &self,
        document_type: DocumentType,
        input: NewDocument,
        actor: &Actor,
        once: bool,
    ) -> EngineResult<(Document, bool)> {
        let workflow = self.registry.workflow(document_type)?;
        if !workflow.can_create(&actor.role) {
            return Err(DomainError::forbidden(format!(
                "role {} cannot create {document_type}",
                actor.role
            ))
            .into());
        }
        self.authorize(actor, document_type, CREATE)?;

        let now = Utc::now();
        let mut doc = Document::draft(document_type, String::new(), input, actor.id, now)?;
        workflow.scope.check(actor, &doc)?;

        let mut tx = self.store.begin().await?;
        if let Some(reference_id) = doc.reference_document_id {
            if tx.document(reference_id).await?.is_none() {
                return Err(DomainError::not_found(format!("reference document {reference_id}")).into());
            }
            if once {
                if let Some(existing) = tx.find_by_reference(reference_id, document_type).await? {
                    tracing::debug!(document_id = %existing.id, "referencing document already exists");
                    return Ok((existing, false));
                }
            }
        }

        doc.document_number = self.counter.next_at(document_type, now).await?;
        tx.insert_document(&doc).await?;
        tx.enqueue(document_event(DocumentEvent::created(&doc), Some(actor.id)))
            .await?;
        let events = tx.commit().await?;

        tracing::info!(document_id = %doc.id, document_number = %doc.document_number, "document created");
        self.publish(events).await;
        Ok((doc, true))
    }

    /// Append a line to an editable document.
    #[instrument(skip_all, fields(document_id = %doc.id, version = doc.version, actor_id = %actor.id), err)]
    pub async fn add_line(&self, doc: &Document, line: NewLine, actor: &Actor) -> EngineResult<Document> {
        let workflow = self.registry.workflow(doc.document_type)?;
        let mut tx = self.store.begin().await?;
        let mut current = load_current(tx.as_mut(), doc).await?;

        if !workflow.is_editable(current.status) {
            return Err(DomainError::invariant(format!(
                "{} is {} and no longer editable",
                current.document_number, current.status
            ))
            .into());
        }
        if !workflow.can_create(&actor.role) {
            return Err(DomainError::forbidden(format!(
                "role {} cannot edit {}",
                actor.role, current.document_type
            ))
            .into());
        }
        self.authorize(actor, current.document_type, UPDATE)?;
        workflow.scope.check(actor, &current)?;

        let expected = current.version;
        let added = current.push_line(line)?.clone();
        current.touch(Utc::now());
        tx.update_document(&current, expected).await?;
        tx.enqueue(document_event(DocumentEvent::line_added(&current, &added), Some(actor.id)))
            .await?;
        let events = tx.commit().await?;

        self.publish(events).await;
        Ok(current)
    }

    /// Apply `input.action` to the document.
    ///
    /// `doc` is the caller's view; its `version` must still be current.
    #[instrument(
        skip_all,
        fields(document_id = %doc.id, action = %input.action, version = doc.version, actor_id = %actor.id),
        err
    )]
    pub async fn transition(
        &self,
        doc: &Document,
        input: TransitionInput,
        actor: &Actor,
    ) -> EngineResult<Document> {
        let workflow = self.registry.workflow(doc.document_type)?;
        let mut tx = self.store.begin().await?;
        let mut current = load_current(tx.as_mut(), doc).await?;

        let from = current.status;
        let spec = workflow.transition(from, input.action)?;

        if !spec.permits(&actor.role) {
            return Err(DomainError::forbidden(format!(
                "role {} cannot {} a {}",
                actor.role, input.action, current.document_type
            ))
            .into());
        }
        self.authorize(actor, current.document_type, input.action.as_str())?;
        workflow.scope.check(actor, &current)?;

        for validator in &spec.validators {
            validator.check(&current, &input)?;
        }

        if spec.approval_gated {
            let requirement = self
                .approvals
                .requirement_in(tx.as_mut(), current.document_type, current.total_value)
                .await?;
            self.approvals.authorize(&requirement, actor)?;
            current.approval_level = Some(requirement.chain_level);
        } else if input.action == Action::Submit {
            current.approval_level = self
                .approvals
                .level_in(tx.as_mut(), current.document_type, current.total_value)
                .await?;
        }

        let now = Utc::now();
        self.apply_effect(tx.as_mut(), spec.effect, &mut current, &input, actor, now)
            .await?;

        let expected = current.version;
        current.advance(spec.to, now);
        tx.update_document(&current, expected).await?;
        tx.enqueue(document_event(
            DocumentEvent::transitioned(&current, from, input.action, input.reason.clone()),
            Some(actor.id),
        ))
        .await?;
        let events = tx.commit().await?;

        tracing::info!(
            document_number = %current.document_number,
            %from,
            to = %current.status,
            "document transitioned"
        );
        self.publish(events).await;
        Ok(current)
    }

    pub async fn get(&self, id: DocumentId) -> EngineResult<Document> {
        self.store
            .document(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("document {id}")).into())
    }

    pub async fn find_by_reference(
        &self,
        reference_id: DocumentId,
        document_type: DocumentType,
    ) -> EngineResult<Option<Document>> {
        Ok(self.store.find_by_reference(reference_id, document_type).await?)
    }

    /// The workflow row for the document's current status.
    pub fn allowed_actions(&self, doc: &Document) -> DomainResult<Vec<Action>> {
        Ok(self.registry.workflow(doc.document_type)?.allowed_actions(doc.status))
    }

    /// Allowed actions narrowed to those `actor` may attempt.
    ///
    /// Approval tiers are not evaluated here.
    pub fn available_actions(&self, doc: &Document, actor: &Actor) -> DomainResult<Vec<Action>> {
        let workflow = self.registry.workflow(doc.document_type)?;
        if workflow.scope.check(actor, doc).is_err() {
            return Ok(Vec::new());
        }
        Ok(workflow
            .allowed_actions(doc.status)
            .into_iter()
            .filter(|action| {
                workflow
                    .transition(doc.status, *action)
                    .is_ok_and(|spec| spec.permits(&actor.role))
                    && self
                        .permissions
                        .authorize(&actor.role, doc.document_type.resource(), action.as_str())
            })
            .collect())
    }

    pub fn workflow(&self, document_type: DocumentType) -> DomainResult<&Workflow> {
        self.registry.workflow(document_type)
    }

    /// Re-publish outbox entries left unpublished by an earlier crash.
    pub async fn publish_pending(&self) -> EngineResult<usize> {
        drain_outbox(self.store.as_ref(), &self.bus, self.outbox_batch).await
    }

    fn authorize(&self, actor: &Actor, document_type: DocumentType, action: &str) -> DomainResult<()> {
        if self
            .permissions
            .authorize(&actor.role, document_type.resource(), action)
        {
            return Ok(());
        }
        Err(DomainError::forbidden(format!(
            "role {} lacks permission {}.{}",
            actor.role,
            document_type.resource(),
            action
        )))
    }

    async fn apply_effect(
        &self,
        tx: &mut dyn StoreTx,
        effect: SideEffect,
        doc: &mut Document,
        input: &TransitionInput,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let performed_by = Some(actor.id);
        match effect {
            SideEffect::None => {}
            SideEffect::AllocateStock => {
                let warehouse_id = source_warehouse(doc)?;
                for line in allocation_order(doc) {
                    ledger::allocate_in(
                        tx,
                        line.item_id,
                        warehouse_id,
                        line.quantity,
                        Some(doc.id),
                        performed_by,
                        now,
                    )
                    .await?;
                }
                doc.set_line_status(LineStatus::Reserved);
            }
            SideEffect::ConsumeReservations => {
                let active = active_reservations(tx, doc).await?;
                if active.is_empty() {
                    return Err(DomainError::invariant(format!(
                        "{} holds no active reservations",
                        doc.document_number
                    ))
                    .into());
                }
                for id in active {
                    ledger::consume_in(tx, id, performed_by, now).await?;
                }
                doc.set_line_status(LineStatus::Fulfilled);
            }
            SideEffect::ReleaseReservations => {
                for id in active_reservations(tx, doc).await? {
                    ledger::release_in(tx, id, performed_by, now).await?;
                }
                doc.set_line_status(LineStatus::Open);
            }
            SideEffect::ReceiveLots => {
                let warehouse_id = source_warehouse(doc)?;
                for (index, line) in doc.lines.iter().enumerate() {
                    if line.line_status == LineStatus::Cancelled {
                        continue;
                    }
                    let input = NewLot {
                        item_id: line.item_id,
                        warehouse_id,
                        quantity: line.quantity,
                        unit_cost: line.unit_cost,
                        source_document_id: Some(doc.id),
                        lot_number: Some(lot_number(doc, index)),
                    };
                    ledger::receive_in(tx, input, performed_by, now).await?;
                }
                doc.set_line_status(LineStatus::Fulfilled);
            }
            SideEffect::ReceiveTransferredLots => {
                let destination = doc.destination_warehouse_id.ok_or_else(|| {
                    DomainError::validation(format!("{} has no destination warehouse", doc.document_number))
                })?;
                let consumed: Vec<_> = tx
                    .reservations_for_document(doc.id)
                    .await?
                    .into_iter()
                    .filter(|r| r.status == ReservationStatus::Consumed)
                    .collect();
                let mut index = 0;
                for reservation in consumed {
                    for alloc in &reservation.lot_allocations {
                        let source = tx
                            .lot(alloc.lot_id)
                            .await?
                            .ok_or_else(|| DomainError::not_found(format!("lot {}", alloc.lot_id)))?;
                        let input = NewLot {
                            item_id: reservation.item_id,
                            warehouse_id: destination,
                            quantity: alloc.qty,
                            unit_cost: source.unit_cost,
                            source_document_id: Some(doc.id),
                            lot_number: Some(lot_number(doc, index)),
                        };
                        ledger::receive_in(tx, input, performed_by, now).await?;
                        index += 1;
                    }
                }
                if index == 0 {
                    return Err(DomainError::invariant(format!(
                        "{} has no dispatched stock to receive",
                        doc.document_number
                    ))
                    .into());
                }
            }
            SideEffect::RecordInspectionResult => {
                doc.inspection_result = input.inspection_result;
            }
        }
        Ok(())
    }

    async fn publish(&self, events: Vec<WarehouseSystemEvent>) {
        publish_committed(self.store.as_ref(), &self.bus, events).await;
    }
}

/// Load the locked current row and check the caller is not stale.
async fn load_current(tx: &mut dyn StoreTx, doc: &Document) -> EngineResult<Document> {
    let current = tx
        .document(doc.id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("document {}", doc.id)))?;
    if current.version != doc.version {
        tracing::debug!(
            document_id = %doc.id,
            stored = current.version,
            caller = doc.version,
            "stale document version"
        );
        return Err(DomainError::conflict(format!(
            "{} is at version {}, caller had {}",
            current.document_number, current.version, doc.version
        ))
        .into());
    }
    Ok(current)
}

async fn active_reservations(
    tx: &mut dyn StoreTx,
    doc: &Document,
) -> EngineResult<Vec<wareflow_core::ReservationId>> {
    let mut active: Vec<_> = tx
        .reservations_for_document(doc.id)
        .await?
        .into_iter()
        .filter(|r| r.is_active())
        .collect();
    // Same lock order as allocation.
    active.sort_by_key(|r| (r.item_id, r.created_at));
    Ok(active.into_iter().map(|r| r.id).collect())
}

/// Open lines in ascending `item_id` order.
///
/// Every transaction locks lots item by item in this order, so two documents
/// sharing items cannot wait on each other's lots.
fn allocation_order(doc: &Document) -> Vec<&DocumentLine> {
    let mut lines: Vec<&DocumentLine> = doc
        .lines
        .iter()
        .filter(|l| l.line_status != LineStatus::Cancelled)
        .collect();
    lines.sort_by_key(|l| l.item_id);
    lines
}

fn source_warehouse(doc: &Document) -> DomainResult<WarehouseId> {
    doc.warehouse_id
        .ok_or_else(|| DomainError::validation(format!("{} has no warehouse", doc.document_number)))
}

/// `<document number>-L<NNN>`, 1-based.
fn lot_number(doc: &Document, index: usize) -> String {
    format!("{}-L{:03}", doc.document_number, index + 1)
}

#[cfg(test)]
mod tests {
    use wareflow_core::{ItemId, UserId};

    use super::*;

    #[test]
    fn lines_allocate_in_item_order_without_cancelled_ones() {
        let mut items = [ItemId::new(), ItemId::new(), ItemId::new()];
        let lines = [items[2], items[0], items[1]]
            .into_iter()
            .map(|item_id| NewLine { item_id, quantity: 1, unit_cost: 1 })
            .collect();
        let mut doc = Document::draft(
            DocumentType::MaterialIssue,
            "MIS-2026-0001".to_string(),
            NewDocument { lines, ..NewDocument::default() },
            UserId::new(),
            Utc::now(),
        )
        .unwrap();
        doc.lines[1].line_status = LineStatus::Cancelled;

        items.sort();
        let cancelled = doc.lines[1].item_id;
        let expected: Vec<ItemId> = items.into_iter().filter(|i| *i != cancelled).collect();
        let ordered: Vec<ItemId> = allocation_order(&doc).iter().map(|l| l.item_id).collect();
        assert_eq!(ordered, expected);
    }
}

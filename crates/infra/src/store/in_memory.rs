use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use wareflow_approvals::ApprovalTier;
use wareflow_core::{DocumentId, ExpectedVersion, ItemId, LotId, ReservationId, WarehouseId};
use wareflow_documents::{Document, DocumentType};
use wareflow_inventory::{InventoryLot, StockReservation};

use super::{DocumentStore, OUTBOX_LEASE, StoreResult, StoreTx};
use crate::error::StoreError;
use crate::events::WarehouseSystemEvent;

#[derive(Debug, Clone, Default)]
struct MemState {
    documents: HashMap<DocumentId, Document>,
    lots: HashMap<LotId, InventoryLot>,
    reservations: HashMap<ReservationId, StockReservation>,
    tiers: Vec<ApprovalTier>,
}

impl MemState {
    fn find_by_reference(&self, reference_id: DocumentId, document_type: DocumentType) -> Option<Document> {
        self.documents
            .values()
            .filter(|d| d.reference_document_id == Some(reference_id) && d.document_type == document_type)
            .min_by_key(|d| (d.created_at, d.id))
            .cloned()
    }

    fn lots_fifo(&self, item_id: ItemId, warehouse_id: WarehouseId) -> Vec<InventoryLot> {
        let mut lots: Vec<InventoryLot> = self
            .lots
            .values()
            .filter(|l| l.item_id == item_id && l.warehouse_id == warehouse_id)
            .cloned()
            .collect();
        lots.sort_by(|a, b| a.received_at.cmp(&b.received_at).then(a.id.cmp(&b.id)));
        lots
    }
}

#[derive(Debug, Clone)]
struct OutboxEntry {
    event: WarehouseSystemEvent,
    published: bool,
    claimed_until: DateTime<Utc>,
}

fn lease_end(lease: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lease)
        .ok()
        .and_then(|lease| Utc::now().checked_add_signed(lease))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// In-memory store.
///
/// Intended for tests/dev. A transaction holds a store-wide lock from `begin`
/// until commit or drop, so transactions are fully serialized; writes go to
/// a working copy that replaces the shared state on commit.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    state: Arc<AsyncMutex<MemState>>,
    counters: Arc<Mutex<HashMap<(DocumentType, i32), u64>>>,
    outbox: Arc<Mutex<Vec<OutboxEntry>>>,
    outbox_lease: Duration,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            counters: Arc::default(),
            outbox: Arc::default(),
            outbox_lease: OUTBOX_LEASE,
        }
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tiers(tiers: impl IntoIterator<Item = ApprovalTier>) -> Self {
        let state = MemState {
            tiers: tiers.into_iter().collect(),
            ..MemState::default()
        };
        Self {
            state: Arc::new(AsyncMutex::new(state)),
            ..Self::default()
        }
    }

    /// Override how long committed or claimed outbox entries stay claimed.
    pub fn with_outbox_lease(mut self, lease: Duration) -> Self {
        self.outbox_lease = lease;
        self
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

pub struct InMemoryTx {
    guard: OwnedMutexGuard<MemState>,
    working: MemState,
    enqueued: Vec<WarehouseSystemEvent>,
    outbox: Arc<Mutex<Vec<OutboxEntry>>>,
    outbox_lease: Duration,
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn document(&mut self, id: DocumentId) -> StoreResult<Option<Document>> {
        Ok(self.working.documents.get(&id).cloned())
    }

    async fn insert_document(&mut self, doc: &Document) -> StoreResult<()> {
        let existing = self.working.documents.get(&doc.id).map(|d| d.version);
        if !ExpectedVersion::New.matches(existing) {
            return Err(StoreError::Conflict(format!("document {} already exists", doc.id)));
        }
        if self
            .working
            .documents
            .values()
            .any(|d| d.document_number == doc.document_number)
        {
            return Err(StoreError::Conflict(format!(
                "document number {} already taken",
                doc.document_number
            )));
        }
        self.working.documents.insert(doc.id, doc.clone());
        Ok(())
    }

    async fn update_document(&mut self, doc: &Document, expected_version: u64) -> StoreResult<()> {
        let current = self
            .working
            .documents
            .get(&doc.id)
            .map(|d| d.version)
            .ok_or_else(|| StoreError::NotFound(format!("document {}", doc.id)))?;
        if !ExpectedVersion::Exact(expected_version).matches(Some(current)) {
            return Err(StoreError::Conflict(format!(
                "document {} is at version {current}, expected {expected_version}",
                doc.id
            )));
        }
        self.working.documents.insert(doc.id, doc.clone());
        Ok(())
    }

    async fn find_by_reference(
        &mut self,
        reference_id: DocumentId,
        document_type: DocumentType,
    ) -> StoreResult<Option<Document>> {
        Ok(self.working.find_by_reference(reference_id, document_type))
    }

    async fn lots_for_allocation(
        &mut self,
        item_id: ItemId,
        warehouse_id: WarehouseId,
    ) -> StoreResult<Vec<InventoryLot>> {
        Ok(self.working.lots_fifo(item_id, warehouse_id))
    }

    async fn lot(&mut self, id: LotId) -> StoreResult<Option<InventoryLot>> {
        Ok(self.working.lots.get(&id).cloned())
    }

    async fn insert_lot(&mut self, lot: &InventoryLot) -> StoreResult<()> {
        if self.working.lots.contains_key(&lot.id) {
            return Err(StoreError::Conflict(format!("lot {} already exists", lot.id)));
        }
        self.working.lots.insert(lot.id, lot.clone());
        Ok(())
    }

    async fn update_lot(&mut self, lot: &InventoryLot) -> StoreResult<()> {
        match self.working.lots.get_mut(&lot.id) {
            Some(slot) => {
                *slot = lot.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("lot {}", lot.id))),
        }
    }

    async fn reservation(&mut self, id: ReservationId) -> StoreResult<Option<StockReservation>> {
        Ok(self.working.reservations.get(&id).cloned())
    }

    async fn reservations_for_document(
        &mut self,
        document_id: DocumentId,
    ) -> StoreResult<Vec<StockReservation>> {
        let mut found: Vec<StockReservation> = self
            .working
            .reservations
            .values()
            .filter(|r| r.consuming_document_id == Some(document_id))
            .cloned()
            .collect();
        found.sort_by_key(|r| (r.created_at, r.id));
        Ok(found)
    }

    async fn insert_reservation(&mut self, reservation: &StockReservation) -> StoreResult<()> {
        if self.working.reservations.contains_key(&reservation.id) {
            return Err(StoreError::Conflict(format!(
                "reservation {} already exists",
                reservation.id
            )));
        }
        self.working
            .reservations
            .insert(reservation.id, reservation.clone());
        Ok(())
    }

    async fn update_reservation(&mut self, reservation: &StockReservation) -> StoreResult<()> {
        match self.working.reservations.get_mut(&reservation.id) {
            Some(slot) => {
                *slot = reservation.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("reservation {}", reservation.id))),
        }
    }

    async fn approval_tiers(&mut self, document_type: DocumentType) -> StoreResult<Vec<ApprovalTier>> {
        Ok(self
            .working
            .tiers
            .iter()
            .filter(|t| t.document_type == document_type)
            .cloned()
            .collect())
    }

    async fn enqueue(&mut self, event: WarehouseSystemEvent) -> StoreResult<()> {
        self.enqueued.push(event);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<Vec<WarehouseSystemEvent>> {
        let InMemoryTx {
            mut guard,
            working,
            enqueued,
            outbox,
            outbox_lease,
        } = *self;
        {
            // The committer delivers these itself; the drain leaves them alone
            // until the lease lapses.
            let claimed_until = lease_end(outbox_lease);
            let mut outbox = outbox.lock().map_err(poisoned)?;
            outbox.extend(enqueued.iter().cloned().map(|event| OutboxEntry {
                event,
                published: false,
                claimed_until,
            }));
        }
        *guard = working;
        Ok(enqueued)
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTx {
            guard,
            working,
            enqueued: Vec::new(),
            outbox: self.outbox.clone(),
            outbox_lease: self.outbox_lease,
        }))
    }

    async fn next_sequence(&self, document_type: DocumentType, year: i32) -> StoreResult<u64> {
        let mut counters = self.counters.lock().map_err(poisoned)?;
        let last = counters.entry((document_type, year)).or_insert(0);
        *last += 1;
        Ok(*last)
    }

    async fn document(&self, id: DocumentId) -> StoreResult<Option<Document>> {
        Ok(self.state.lock().await.documents.get(&id).cloned())
    }

    async fn find_by_reference(
        &self,
        reference_id: DocumentId,
        document_type: DocumentType,
    ) -> StoreResult<Option<Document>> {
        Ok(self
            .state
            .lock()
            .await
            .find_by_reference(reference_id, document_type))
    }

    async fn lot(&self, id: LotId) -> StoreResult<Option<InventoryLot>> {
        Ok(self.state.lock().await.lots.get(&id).cloned())
    }

    async fn lots(&self, item_id: ItemId, warehouse_id: WarehouseId) -> StoreResult<Vec<InventoryLot>> {
        Ok(self.state.lock().await.lots_fifo(item_id, warehouse_id))
    }

    async fn reservation(&self, id: ReservationId) -> StoreResult<Option<StockReservation>> {
        Ok(self.state.lock().await.reservations.get(&id).cloned())
    }

    async fn all_approval_tiers(&self) -> StoreResult<Vec<ApprovalTier>> {
        Ok(self.state.lock().await.tiers.clone())
    }

    async fn replace_approval_tiers(
        &self,
        document_type: DocumentType,
        tiers: Vec<ApprovalTier>,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.tiers.retain(|t| t.document_type != document_type);
        state.tiers.extend(tiers);
        Ok(())
    }

    async fn mark_published(&self, event_ids: &[Uuid]) -> StoreResult<()> {
        let mut outbox = self.outbox.lock().map_err(poisoned)?;
        for entry in outbox.iter_mut() {
            if event_ids.contains(&entry.event.event_id()) {
                entry.published = true;
            }
        }
        outbox.retain(|e| !e.published);
        Ok(())
    }

    async fn claim_unpublished(&self, limit: usize) -> StoreResult<Vec<WarehouseSystemEvent>> {
        let now = Utc::now();
        let claimed_until = lease_end(self.outbox_lease);
        let mut outbox = self.outbox.lock().map_err(poisoned)?;
        Ok(outbox
            .iter_mut()
            .filter(|e| !e.published && e.claimed_until <= now)
            .take(limit)
            .map(|e| {
                e.claimed_until = claimed_until;
                e.event.clone()
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use wareflow_core::UserId;
    use wareflow_documents::NewDocument;

    use super::*;

    fn test_document() -> Document {
        Document::draft(
            DocumentType::GoodsReceipt,
            format!("GRN-TEST-{}", Uuid::now_v7()),
            NewDocument::default(),
            UserId::new(),
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = InMemoryStore::new();
        let doc = test_document();
        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_document(&doc).await.unwrap();
        }
        assert!(store.document(doc.id).await.unwrap().is_none());

        let mut tx = store.begin().await.unwrap();
        tx.insert_document(&doc).await.unwrap();
        tx.commit().await.unwrap();
        assert!(store.document(doc.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn update_is_compare_and_swap() {
        let store = InMemoryStore::new();
        let mut doc = test_document();
        let mut tx = store.begin().await.unwrap();
        tx.insert_document(&doc).await.unwrap();
        tx.commit().await.unwrap();

        doc.touch(Utc::now());
        let mut tx = store.begin().await.unwrap();
        let err = tx.update_document(&doc, 7).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        tx.update_document(&doc, 1).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.document(doc.id).await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn counter_is_per_type_and_year() {
        let store = InMemoryStore::new();
        assert_eq!(store.next_sequence(DocumentType::GoodsReceipt, 2026).await.unwrap(), 1);
        assert_eq!(store.next_sequence(DocumentType::GoodsReceipt, 2026).await.unwrap(), 2);
        assert_eq!(store.next_sequence(DocumentType::GoodsReceipt, 2027).await.unwrap(), 1);
        assert_eq!(store.next_sequence(DocumentType::MaterialIssue, 2026).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn outbox_tracks_unpublished_events() {
        let store = InMemoryStore::new().with_outbox_lease(Duration::ZERO);
        let events = commit_created_event(&store).await;
        assert_eq!(events.len(), 1);
        assert_eq!(store.claim_unpublished(10).await.unwrap().len(), 1);

        store.mark_published(&[events[0].event_id()]).await.unwrap();
        assert!(store.claim_unpublished(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn committed_events_stay_claimed_by_the_committer() {
        let store = InMemoryStore::new();
        let events = commit_created_event(&store).await;
        assert_eq!(events.len(), 1);

        assert!(store.claim_unpublished(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn a_lapsed_claim_is_handed_out_once() {
        let store = InMemoryStore::new().with_outbox_lease(Duration::from_millis(20));
        commit_created_event(&store).await;

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.claim_unpublished(10).await.unwrap().len(), 1);
        assert!(store.claim_unpublished(10).await.unwrap().is_empty());
    }

    async fn commit_created_event(store: &InMemoryStore) -> Vec<WarehouseSystemEvent> {
        use crate::events::document_event;
        use wareflow_documents::DocumentEvent;

        let doc = test_document();
        let mut tx = store.begin().await.unwrap();
        tx.insert_document(&doc).await.unwrap();
        tx.enqueue(document_event(DocumentEvent::created(&doc), None))
            .await
            .unwrap();
        tx.commit().await.unwrap()
    }
}

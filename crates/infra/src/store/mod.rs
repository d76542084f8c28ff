//! Transactional storage boundary.
//!
//! Every durability-relevant mutation happens inside a [`StoreTx`]. A
//! transaction either commits all of its writes and enqueued events, or none:
//! dropping a transaction without calling [`StoreTx::commit`] rolls it back.
//!
//! Row locking:
//! - reads made through a `StoreTx` lock the rows they return until the
//!   transaction ends (`SELECT … FOR UPDATE` in Postgres, a store-wide lock in
//!   memory), so concurrent allocations cannot oversubscribe a lot
//! - `update_document` is a compare-and-swap on `version`
//!
//! Event outbox: events passed to [`StoreTx::enqueue`] are persisted with the
//! transaction and returned by `commit`. Committed entries are claimed by the
//! committing caller for the store's outbox lease
//! ([`OUTBOX_LEASE`] unless overridden); it publishes them and then marks
//! them published. [`DocumentStore::claim_unpublished`] only hands out entries
//! whose claim has lapsed (a crash or a failed `mark_published`), and claims
//! them in turn, so an event is never delivered by two callers at once.

use async_trait::async_trait;
use uuid::Uuid;

use wareflow_approvals::ApprovalTier;
use wareflow_core::{DocumentId, ItemId, LotId, ReservationId, WarehouseId};
use wareflow_documents::{Document, DocumentType};
use wareflow_inventory::{InventoryLot, StockReservation};

use crate::error::StoreError;
use crate::events::WarehouseSystemEvent;

pub mod in_memory;
pub mod postgres;

/// Default time a claim on an outbox entry lasts before another caller may take it.
pub const OUTBOX_LEASE: std::time::Duration = std::time::Duration::from_secs(60);

pub use in_memory::InMemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait StoreTx: Send {
    /// Load and lock a document.
    async fn document(&mut self, id: DocumentId) -> StoreResult<Option<Document>>;

    async fn insert_document(&mut self, doc: &Document) -> StoreResult<()>;

    /// Persist `doc` only if the stored version still equals `expected_version`.
    ///
    /// Fails with `StoreError::Conflict` otherwise, writing nothing.
    async fn update_document(&mut self, doc: &Document, expected_version: u64) -> StoreResult<()>;

    async fn find_by_reference(
        &mut self,
        reference_id: DocumentId,
        document_type: DocumentType,
    ) -> StoreResult<Option<Document>>;

    /// Lock every lot of `item_id` at `warehouse_id`, oldest receipt first.
    async fn lots_for_allocation(
        &mut self,
        item_id: ItemId,
        warehouse_id: WarehouseId,
    ) -> StoreResult<Vec<InventoryLot>>;

    async fn lot(&mut self, id: LotId) -> StoreResult<Option<InventoryLot>>;

    async fn insert_lot(&mut self, lot: &InventoryLot) -> StoreResult<()>;

    async fn update_lot(&mut self, lot: &InventoryLot) -> StoreResult<()>;

    async fn reservation(&mut self, id: ReservationId) -> StoreResult<Option<StockReservation>>;

    async fn reservations_for_document(
        &mut self,
        document_id: DocumentId,
    ) -> StoreResult<Vec<StockReservation>>;

    async fn insert_reservation(&mut self, reservation: &StockReservation) -> StoreResult<()>;

    async fn update_reservation(&mut self, reservation: &StockReservation) -> StoreResult<()>;

    async fn approval_tiers(&mut self, document_type: DocumentType) -> StoreResult<Vec<ApprovalTier>>;

    /// Add an event to the transaction's outbox.
    async fn enqueue(&mut self, event: WarehouseSystemEvent) -> StoreResult<()>;

    /// Commit, returning the events enqueued by this transaction in order.
    async fn commit(self: Box<Self>) -> StoreResult<Vec<WarehouseSystemEvent>>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;

    /// Atomically increment-or-insert the `(document_type, year)` counter.
    ///
    /// Runs outside any caller transaction; numbers consumed by a transaction
    /// that later rolls back are skipped, never reused.
    async fn next_sequence(&self, document_type: DocumentType, year: i32) -> StoreResult<u64>;

    async fn document(&self, id: DocumentId) -> StoreResult<Option<Document>>;

    async fn find_by_reference(
        &self,
        reference_id: DocumentId,
        document_type: DocumentType,
    ) -> StoreResult<Option<Document>>;

    async fn lot(&self, id: LotId) -> StoreResult<Option<InventoryLot>>;

    async fn lots(&self, item_id: ItemId, warehouse_id: WarehouseId) -> StoreResult<Vec<InventoryLot>>;

    async fn reservation(&self, id: ReservationId) -> StoreResult<Option<StockReservation>>;

    async fn all_approval_tiers(&self) -> StoreResult<Vec<ApprovalTier>>;

    /// Replace the tiers of one document type.
    async fn replace_approval_tiers(
        &self,
        document_type: DocumentType,
        tiers: Vec<ApprovalTier>,
    ) -> StoreResult<()>;

    async fn mark_published(&self, event_ids: &[Uuid]) -> StoreResult<()>;

    /// Claim up to `limit` unpublished outbox entries whose previous claim has
    /// lapsed, oldest first. Claimed entries are not handed out again until
    /// the store's lease expires.
    async fn claim_unpublished(&self, limit: usize) -> StoreResult<Vec<WarehouseSystemEvent>>;
}

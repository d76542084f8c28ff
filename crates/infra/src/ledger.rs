//! Inventory lot ledger service.
//!
//! The `*_in` functions apply one ledger mutation inside a caller-owned
//! transaction and enqueue its [`LedgerEvent`]; the document engine uses them
//! for transition side effects. [`LotLedger`] wraps each of them in its own
//! transaction for direct stock operations.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::instrument;

use wareflow_core::{DocumentId, DomainError, ItemId, LotId, ReservationId, UserId, WarehouseId};
use wareflow_inventory::{
    InventoryLot, LedgerEvent, NewLot, StockReservation, StockSummary, reserve_fifo,
};

use crate::error::EngineResult;
use crate::events::{WarehouseBus, ledger_event};
use crate::outbox::publish_committed;
use crate::store::{DocumentStore, StoreTx};

/// Reserve `qty` FIFO across the active lots of `item_id` at `warehouse_id`.
///
/// All-or-nothing: on `InsufficientStock` no lot is written.
pub async fn allocate_in(
    tx: &mut dyn StoreTx,
    item_id: ItemId,
    warehouse_id: WarehouseId,
    qty: i64,
    document_id: Option<DocumentId>,
    performed_by: Option<UserId>,
    now: DateTime<Utc>,
) -> EngineResult<StockReservation> {
    let mut lots = tx.lots_for_allocation(item_id, warehouse_id).await?;
    let plan = reserve_fifo(item_id, warehouse_id, &mut lots, qty)?;

    for alloc in &plan {
        let lot = lots
            .iter()
            .find(|l| l.id == alloc.lot_id)
            .ok_or_else(|| DomainError::invariant(format!("allocated lot {} vanished", alloc.lot_id)))?;
        tx.update_lot(lot).await?;
    }

    let reservation = StockReservation::new(item_id, warehouse_id, document_id, plan, now);
    tx.insert_reservation(&reservation).await?;
    tx.enqueue(ledger_event(LedgerEvent::stock_reserved(&reservation), performed_by))
        .await?;
    Ok(reservation)
}

/// Return every allocation of an active reservation to its lot.
pub async fn release_in(
    tx: &mut dyn StoreTx,
    reservation_id: ReservationId,
    performed_by: Option<UserId>,
    now: DateTime<Utc>,
) -> EngineResult<StockReservation> {
    let mut reservation = load_reservation(tx, reservation_id).await?;
    reservation.mark_released(now)?;
    for alloc in &reservation.lot_allocations {
        let mut lot = load_lot(tx, alloc.lot_id).await?;
        lot.release(alloc.qty)?;
        tx.update_lot(&lot).await?;
    }
    tx.update_reservation(&reservation).await?;
    tx.enqueue(ledger_event(LedgerEvent::reservation_released(&reservation), performed_by))
        .await?;
    Ok(reservation)
}

/// Permanently take an active reservation's quantity out of its lots.
pub async fn consume_in(
    tx: &mut dyn StoreTx,
    reservation_id: ReservationId,
    performed_by: Option<UserId>,
    now: DateTime<Utc>,
) -> EngineResult<StockReservation> {
    let mut reservation = load_reservation(tx, reservation_id).await?;
    reservation.mark_consumed(now)?;
    for alloc in &reservation.lot_allocations {
        let mut lot = load_lot(tx, alloc.lot_id).await?;
        lot.consume(alloc.qty)?;
        tx.update_lot(&lot).await?;
    }
    tx.update_reservation(&reservation).await?;
    tx.enqueue(ledger_event(LedgerEvent::reservation_consumed(&reservation), performed_by))
        .await?;
    Ok(reservation)
}

/// Receiving always creates a fresh lot.
pub async fn receive_in(
    tx: &mut dyn StoreTx,
    input: NewLot,
    performed_by: Option<UserId>,
    now: DateTime<Utc>,
) -> EngineResult<InventoryLot> {
    let lot = InventoryLot::receive(input, now)?;
    tx.insert_lot(&lot).await?;
    tx.enqueue(ledger_event(LedgerEvent::lot_received(&lot), performed_by))
        .await?;
    Ok(lot)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LotCommand {
    Block,
    Unblock,
    Expire,
}

async fn apply_lot_command(
    tx: &mut dyn StoreTx,
    lot_id: LotId,
    command: LotCommand,
    performed_by: Option<UserId>,
) -> EngineResult<InventoryLot> {
    let mut lot = load_lot(tx, lot_id).await?;
    let event = match command {
        LotCommand::Block => {
            lot.block()?;
            LedgerEvent::LotBlocked { lot_id }
        }
        LotCommand::Unblock => {
            lot.unblock()?;
            LedgerEvent::LotUnblocked { lot_id }
        }
        LotCommand::Expire => {
            lot.expire()?;
            LedgerEvent::LotExpired { lot_id }
        }
    };
    tx.update_lot(&lot).await?;
    tx.enqueue(ledger_event(event, performed_by)).await?;
    Ok(lot)
}

async fn load_lot(tx: &mut dyn StoreTx, id: LotId) -> EngineResult<InventoryLot> {
    tx.lot(id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("lot {id}")).into())
}

async fn load_reservation(tx: &mut dyn StoreTx, id: ReservationId) -> EngineResult<StockReservation> {
    tx.reservation(id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("reservation {id}")).into())
}

/// Direct stock operations, each in its own transaction.
///
/// Events are published on the bus after commit.
#[derive(Clone)]
pub struct LotLedger {
    store: Arc<dyn DocumentStore>,
    bus: Arc<WarehouseBus>,
}

impl LotLedger {
    pub fn new(store: Arc<dyn DocumentStore>, bus: Arc<WarehouseBus>) -> Self {
        Self { store, bus }
    }

    #[instrument(skip(self), fields(item_id = %item_id, warehouse_id = %warehouse_id), err)]
    pub async fn allocate(
        &self,
        item_id: ItemId,
        warehouse_id: WarehouseId,
        qty: i64,
        document_id: Option<DocumentId>,
        performed_by: Option<UserId>,
    ) -> EngineResult<StockReservation> {
        let mut tx = self.store.begin().await?;
        let reservation = allocate_in(
            tx.as_mut(),
            item_id,
            warehouse_id,
            qty,
            document_id,
            performed_by,
            Utc::now(),
        )
        .await?;
        let events = tx.commit().await?;
        self.publish(events).await;
        Ok(reservation)
    }

    #[instrument(skip(self), fields(reservation_id = %reservation_id), err)]
    pub async fn release(
        &self,
        reservation_id: ReservationId,
        performed_by: Option<UserId>,
    ) -> EngineResult<StockReservation> {
        let mut tx = self.store.begin().await?;
        let reservation = release_in(tx.as_mut(), reservation_id, performed_by, Utc::now()).await?;
        let events = tx.commit().await?;
        self.publish(events).await;
        Ok(reservation)
    }

    #[instrument(skip(self), fields(reservation_id = %reservation_id), err)]
    pub async fn consume(
        &self,
        reservation_id: ReservationId,
        performed_by: Option<UserId>,
    ) -> EngineResult<StockReservation> {
        let mut tx = self.store.begin().await?;
        let reservation = consume_in(tx.as_mut(), reservation_id, performed_by, Utc::now()).await?;
        let events = tx.commit().await?;
        self.publish(events).await;
        Ok(reservation)
    }

    #[instrument(skip(self, input), fields(item_id = %input.item_id, warehouse_id = %input.warehouse_id), err)]
    pub async fn receive(&self, input: NewLot, performed_by: Option<UserId>) -> EngineResult<InventoryLot> {
        let mut tx = self.store.begin().await?;
        let lot = receive_in(tx.as_mut(), input, performed_by, Utc::now()).await?;
        let events = tx.commit().await?;
        self.publish(events).await;
        Ok(lot)
    }

    pub async fn block(&self, lot_id: LotId, performed_by: Option<UserId>) -> EngineResult<InventoryLot> {
        self.lot_command(lot_id, LotCommand::Block, performed_by).await
    }

    pub async fn unblock(&self, lot_id: LotId, performed_by: Option<UserId>) -> EngineResult<InventoryLot> {
        self.lot_command(lot_id, LotCommand::Unblock, performed_by).await
    }

    pub async fn expire(&self, lot_id: LotId, performed_by: Option<UserId>) -> EngineResult<InventoryLot> {
        self.lot_command(lot_id, LotCommand::Expire, performed_by).await
    }

    pub async fn lot(&self, id: LotId) -> EngineResult<InventoryLot> {
        self.store
            .lot(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("lot {id}")).into())
    }

    /// Every lot of the item at the warehouse, oldest receipt first.
    pub async fn lots(&self, item_id: ItemId, warehouse_id: WarehouseId) -> EngineResult<Vec<InventoryLot>> {
        Ok(self.store.lots(item_id, warehouse_id).await?)
    }

    pub async fn reservation(&self, id: ReservationId) -> EngineResult<StockReservation> {
        self.store
            .reservation(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("reservation {id}")).into())
    }

    pub async fn on_hand(&self, item_id: ItemId, warehouse_id: WarehouseId) -> EngineResult<StockSummary> {
        let lots = self.store.lots(item_id, warehouse_id).await?;
        Ok(StockSummary::from_lots(item_id, warehouse_id, &lots))
    }

    #[instrument(skip(self), fields(lot_id = %lot_id), err)]
    async fn lot_command(
        &self,
        lot_id: LotId,
        command: LotCommand,
        performed_by: Option<UserId>,
    ) -> EngineResult<InventoryLot> {
        let mut tx = self.store.begin().await?;
        let lot = apply_lot_command(tx.as_mut(), lot_id, command, performed_by).await?;
        let events = tx.commit().await?;
        self.publish(events).await;
        Ok(lot)
    }

    async fn publish(&self, events: Vec<crate::events::WarehouseSystemEvent>) {
        publish_committed(self.store.as_ref(), &self.bus, events).await;
    }
}

#[cfg(test)]
mod tests {
    use wareflow_inventory::{LotStatus, ReservationStatus};

    use super::*;
    use crate::store::InMemoryStore;

    struct Fixture {
        ledger: LotLedger,
        bus: Arc<WarehouseBus>,
        item: ItemId,
        warehouse: WarehouseId,
    }

    fn fixture() -> Fixture {
        let bus = Arc::new(WarehouseBus::new());
        Fixture {
            ledger: LotLedger::new(Arc::new(InMemoryStore::new()), bus.clone()),
            bus,
            item: ItemId::new(),
            warehouse: WarehouseId::new(),
        }
    }

    impl Fixture {
        async fn receive(&self, qty: i64) -> InventoryLot {
            self.ledger
                .receive(
                    NewLot {
                        item_id: self.item,
                        warehouse_id: self.warehouse,
                        quantity: qty,
                        unit_cost: 250,
                        source_document_id: None,
                        lot_number: None,
                    },
                    None,
                )
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn allocation_draws_oldest_lots_first() {
        let f = fixture();
        let a = f.receive(10).await;
        let b = f.receive(50).await;

        let r = f.ledger.allocate(f.item, f.warehouse, 30, None, None).await.unwrap();
        assert_eq!(r.quantity, 30);
        assert_eq!(r.lot_allocations.len(), 2);
        assert_eq!((r.lot_allocations[0].lot_id, r.lot_allocations[0].qty), (a.id, 10));
        assert_eq!((r.lot_allocations[1].lot_id, r.lot_allocations[1].qty), (b.id, 20));

        let a = f.ledger.lot(a.id).await.unwrap();
        assert_eq!((a.available_qty, a.reserved_qty), (0, 10));
        let summary = f.ledger.on_hand(f.item, f.warehouse).await.unwrap();
        assert_eq!((summary.available, summary.reserved), (30, 30));
    }

    #[tokio::test]
    async fn insufficient_stock_mutates_nothing() {
        let f = fixture();
        let lot = f.receive(20).await;

        let err = f.ledger.allocate(f.item, f.warehouse, 21, None, None).await.unwrap_err();
        assert!(matches!(
            err.domain(),
            Some(DomainError::InsufficientStock { requested: 21, available: 20, .. })
        ));
        assert_eq!(f.ledger.lot(lot.id).await.unwrap(), lot);
    }

    #[tokio::test]
    async fn release_twice_fails() {
        let f = fixture();
        let lot = f.receive(40).await;
        let r = f.ledger.allocate(f.item, f.warehouse, 15, None, None).await.unwrap();

        let released = f.ledger.release(r.id, None).await.unwrap();
        assert_eq!(released.status, ReservationStatus::Released);
        let lot = f.ledger.lot(lot.id).await.unwrap();
        assert_eq!((lot.available_qty, lot.reserved_qty), (40, 0));

        let err = f.ledger.release(r.id, None).await.unwrap_err();
        assert_eq!(err.domain(), Some(&DomainError::AlreadyReleased(r.id)));
    }

    #[tokio::test]
    async fn consume_is_single_use_and_blocks_release() {
        let f = fixture();
        let lot = f.receive(40).await;
        let r = f.ledger.allocate(f.item, f.warehouse, 40, None, None).await.unwrap();

        f.ledger.consume(r.id, None).await.unwrap();
        let lot = f.ledger.lot(lot.id).await.unwrap();
        assert_eq!((lot.initial_qty, lot.available_qty, lot.reserved_qty), (0, 0, 0));
        assert_eq!(lot.status, LotStatus::Depleted);

        let err = f.ledger.consume(r.id, None).await.unwrap_err();
        assert_eq!(err.domain(), Some(&DomainError::AlreadyConsumed(r.id)));
        let err = f.ledger.release(r.id, None).await.unwrap_err();
        assert_eq!(err.domain(), Some(&DomainError::AlreadyConsumed(r.id)));
    }

    #[tokio::test]
    async fn blocked_lots_are_skipped_until_unblocked() {
        let f = fixture();
        let old = f.receive(10).await;
        let new = f.receive(10).await;

        f.ledger.block(old.id, None).await.unwrap();
        let r = f.ledger.allocate(f.item, f.warehouse, 5, None, None).await.unwrap();
        assert_eq!(r.lot_allocations[0].lot_id, new.id);

        f.ledger.unblock(old.id, None).await.unwrap();
        let r = f.ledger.allocate(f.item, f.warehouse, 5, None, None).await.unwrap();
        assert_eq!(r.lot_allocations[0].lot_id, old.id);

        // Reserved lots cannot be blocked or expired.
        assert!(matches!(
            f.ledger.block(old.id, None).await.unwrap_err().domain(),
            Some(DomainError::InvariantViolation(_))
        ));
        assert!(f.ledger.expire(old.id, None).await.is_err());
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let f = fixture();
        let err = f.ledger.release(ReservationId::new(), None).await.unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::NotFound(_))));
        let err = f.ledger.block(LotId::new(), None).await.unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_allocations_never_oversubscribe() {
        let f = fixture();
        let lot = f.receive(100).await;
        let ledger = Arc::new(f.ledger.clone());

        let mut handles = Vec::new();
        for _ in 0..25 {
            let ledger = ledger.clone();
            let (item, wh) = (f.item, f.warehouse);
            handles.push(tokio::spawn(async move { ledger.allocate(item, wh, 7, None, None).await }));
        }

        let mut granted = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => granted += 1,
                Err(err) => assert!(matches!(err.domain(), Some(DomainError::InsufficientStock { .. }))),
            }
        }
        assert_eq!(granted, 14);

        let lot = f.ledger.lot(lot.id).await.unwrap();
        lot.check_invariants().unwrap();
        assert_eq!((lot.available_qty, lot.reserved_qty), (2, 98));
    }

    #[tokio::test]
    async fn mutations_publish_ledger_events() {
        use std::sync::Mutex;
        use async_trait::async_trait;
        use wareflow_events::{EventHandler, HandlerError, Topic};

        use crate::events::WarehouseSystemEvent;

        #[derive(Default)]
        struct Seen(Mutex<Vec<String>>);

        #[async_trait]
        impl EventHandler<crate::events::WarehouseEvent> for Seen {
            fn name(&self) -> &str {
                "seen"
            }

            async fn handle(&self, event: &WarehouseSystemEvent) -> Result<(), HandlerError> {
                self.0.lock().unwrap().push(event.event_type().to_string());
                Ok(())
            }
        }

        let f = fixture();
        let seen = Arc::new(Seen::default());
        f.bus.subscribe(Topic::All, seen.clone());

        let lot = f.receive(10).await;
        let r = f.ledger.allocate(f.item, f.warehouse, 4, None, None).await.unwrap();
        f.ledger.release(r.id, None).await.unwrap();
        f.ledger.block(lot.id, None).await.unwrap();

        assert_eq!(
            *seen.0.lock().unwrap(),
            vec!["lot.received", "stock.reserved", "reservation.released", "lot.blocked"]
        );
    }
}

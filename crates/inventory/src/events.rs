use serde::{Deserialize, Serialize};
use uuid::Uuid;

use wareflow_core::{DocumentId, ItemId, LotId, ReservationId, WarehouseId};
use wareflow_events::Event;

use crate::{InventoryLot, LotAllocation, StockReservation};

/// Ledger mutations, enqueued in the same transaction as the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    LotReceived {
        lot_id: LotId,
        item_id: ItemId,
        warehouse_id: WarehouseId,
        lot_number: String,
        quantity: i64,
        unit_cost: u64,
        source_document_id: Option<DocumentId>,
    },
    StockReserved {
        reservation_id: ReservationId,
        item_id: ItemId,
        warehouse_id: WarehouseId,
        document_id: Option<DocumentId>,
        quantity: i64,
        allocations: Vec<LotAllocation>,
    },
    ReservationReleased {
        reservation_id: ReservationId,
        document_id: Option<DocumentId>,
        allocations: Vec<LotAllocation>,
    },
    ReservationConsumed {
        reservation_id: ReservationId,
        document_id: Option<DocumentId>,
        allocations: Vec<LotAllocation>,
    },
    LotBlocked {
        lot_id: LotId,
    },
    LotUnblocked {
        lot_id: LotId,
    },
    LotExpired {
        lot_id: LotId,
    },
}

impl LedgerEvent {
    pub fn lot_received(lot: &InventoryLot) -> Self {
        LedgerEvent::LotReceived {
            lot_id: lot.id,
            item_id: lot.item_id,
            warehouse_id: lot.warehouse_id,
            lot_number: lot.lot_number.clone(),
            quantity: lot.initial_qty,
            unit_cost: lot.unit_cost,
            source_document_id: lot.source_document_id,
        }
    }

    pub fn stock_reserved(r: &StockReservation) -> Self {
        LedgerEvent::StockReserved {
            reservation_id: r.id,
            item_id: r.item_id,
            warehouse_id: r.warehouse_id,
            document_id: r.consuming_document_id,
            quantity: r.quantity,
            allocations: r.lot_allocations.clone(),
        }
    }

    pub fn reservation_released(r: &StockReservation) -> Self {
        LedgerEvent::ReservationReleased {
            reservation_id: r.id,
            document_id: r.consuming_document_id,
            allocations: r.lot_allocations.clone(),
        }
    }

    pub fn reservation_consumed(r: &StockReservation) -> Self {
        LedgerEvent::ReservationConsumed {
            reservation_id: r.id,
            document_id: r.consuming_document_id,
            allocations: r.lot_allocations.clone(),
        }
    }

    pub fn entity_type(&self) -> &'static str {
        match self {
            LedgerEvent::LotReceived { .. }
            | LedgerEvent::LotBlocked { .. }
            | LedgerEvent::LotUnblocked { .. }
            | LedgerEvent::LotExpired { .. } => "inventory_lot",
            LedgerEvent::StockReserved { .. }
            | LedgerEvent::ReservationReleased { .. }
            | LedgerEvent::ReservationConsumed { .. } => "stock_reservation",
        }
    }

    pub fn entity_id(&self) -> Uuid {
        match self {
            LedgerEvent::LotReceived { lot_id, .. }
            | LedgerEvent::LotBlocked { lot_id }
            | LedgerEvent::LotUnblocked { lot_id }
            | LedgerEvent::LotExpired { lot_id } => (*lot_id).into(),
            LedgerEvent::StockReserved { reservation_id, .. }
            | LedgerEvent::ReservationReleased { reservation_id, .. }
            | LedgerEvent::ReservationConsumed { reservation_id, .. } => (*reservation_id).into(),
        }
    }

    /// Verb recorded on the system event.
    pub fn action(&self) -> &'static str {
        match self {
            LedgerEvent::LotReceived { .. } => "receive",
            LedgerEvent::StockReserved { .. } => "reserve",
            LedgerEvent::ReservationReleased { .. } => "release",
            LedgerEvent::ReservationConsumed { .. } => "consume",
            LedgerEvent::LotBlocked { .. } => "block",
            LedgerEvent::LotUnblocked { .. } => "unblock",
            LedgerEvent::LotExpired { .. } => "expire",
        }
    }
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::LotReceived { .. } => "lot.received",
            LedgerEvent::StockReserved { .. } => "stock.reserved",
            LedgerEvent::ReservationReleased { .. } => "reservation.released",
            LedgerEvent::ReservationConsumed { .. } => "reservation.consumed",
            LedgerEvent::LotBlocked { .. } => "lot.blocked",
            LedgerEvent::LotUnblocked { .. } => "lot.unblocked",
            LedgerEvent::LotExpired { .. } => "lot.expired",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let lot_id = LotId::new();
        let json = serde_json::to_value(LedgerEvent::LotBlocked { lot_id }).unwrap();
        assert_eq!(json["type"], "lot_blocked");
        assert_eq!(json["lot_id"], lot_id.to_string());
    }

    #[test]
    fn entity_routing() {
        let lot_id = LotId::new();
        let e = LedgerEvent::LotExpired { lot_id };
        assert_eq!(e.entity_type(), "inventory_lot");
        assert_eq!(e.entity_id(), Uuid::from(lot_id));
        assert_eq!(e.event_type(), "lot.expired");
    }
}

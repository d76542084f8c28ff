use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wareflow_core::{DocumentId, DomainError, DomainResult, ItemId, LotId, ReservationId, WarehouseId};

/// Quantity drawn from a single lot on behalf of a reservation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotAllocation {
    pub lot_id: LotId,
    pub qty: i64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Active,
    Released,
    Consumed,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Released => "released",
            ReservationStatus::Consumed => "consumed",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "active" => Ok(ReservationStatus::Active),
            "released" => Ok(ReservationStatus::Released),
            "consumed" => Ok(ReservationStatus::Consumed),
            other => Err(DomainError::validation(format!(
                "unknown reservation status '{other}'"
            ))),
        }
    }
}

/// Stock held against a consuming document.
///
/// Created together with the lot debits listed in `lot_allocations`. Moves out
/// of `Active` exactly once, to either `Released` or `Consumed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReservation {
    pub id: ReservationId,
    pub item_id: ItemId,
    pub warehouse_id: WarehouseId,
    pub consuming_document_id: Option<DocumentId>,
    pub quantity: i64,
    pub lot_allocations: Vec<LotAllocation>,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl StockReservation {
    pub fn new(
        item_id: ItemId,
        warehouse_id: WarehouseId,
        consuming_document_id: Option<DocumentId>,
        lot_allocations: Vec<LotAllocation>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let quantity = lot_allocations.iter().map(|a| a.qty).sum();
        Self {
            id: ReservationId::new(),
            item_id,
            warehouse_id,
            consuming_document_id,
            quantity,
            lot_allocations,
            status: ReservationStatus::Active,
            created_at,
            resolved_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    pub fn mark_released(&mut self, at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_active()?;
        self.status = ReservationStatus::Released;
        self.resolved_at = Some(at);
        Ok(())
    }

    pub fn mark_consumed(&mut self, at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_active()?;
        self.status = ReservationStatus::Consumed;
        self.resolved_at = Some(at);
        Ok(())
    }

    fn ensure_active(&self) -> DomainResult<()> {
        match self.status {
            ReservationStatus::Active => Ok(()),
            ReservationStatus::Released => Err(DomainError::AlreadyReleased(self.id)),
            ReservationStatus::Consumed => Err(DomainError::AlreadyConsumed(self.id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_reservation() -> StockReservation {
        StockReservation::new(
            ItemId::new(),
            WarehouseId::new(),
            Some(DocumentId::new()),
            vec![
                LotAllocation { lot_id: LotId::new(), qty: 20 },
                LotAllocation { lot_id: LotId::new(), qty: 10 },
            ],
            Utc::now(),
        )
    }

    #[test]
    fn quantity_is_sum_of_allocations() {
        assert_eq!(test_reservation().quantity, 30);
    }

    #[test]
    fn release_twice_fails() {
        let mut r = test_reservation();
        r.mark_released(Utc::now()).unwrap();
        assert_eq!(r.mark_released(Utc::now()), Err(DomainError::AlreadyReleased(r.id)));
    }

    #[test]
    fn release_after_consume_fails() {
        let mut r = test_reservation();
        r.mark_consumed(Utc::now()).unwrap();
        assert_eq!(r.mark_released(Utc::now()), Err(DomainError::AlreadyConsumed(r.id)));
        assert_eq!(r.mark_consumed(Utc::now()), Err(DomainError::AlreadyConsumed(r.id)));
    }

    #[test]
    fn consume_after_release_fails() {
        let mut r = test_reservation();
        r.mark_released(Utc::now()).unwrap();
        assert_eq!(r.mark_consumed(Utc::now()), Err(DomainError::AlreadyReleased(r.id)));
        assert!(r.resolved_at.is_some());
    }
}

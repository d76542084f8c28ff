use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wareflow_core::{DocumentId, DomainError, DomainResult, ItemId, LotId, WarehouseId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LotStatus {
    Active,
    Depleted,
    Expired,
    Blocked,
}

impl LotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LotStatus::Active => "active",
            LotStatus::Depleted => "depleted",
            LotStatus::Expired => "expired",
            LotStatus::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "active" => Ok(LotStatus::Active),
            "depleted" => Ok(LotStatus::Depleted),
            "expired" => Ok(LotStatus::Expired),
            "blocked" => Ok(LotStatus::Blocked),
            other => Err(DomainError::validation(format!("unknown lot status '{other}'"))),
        }
    }
}

impl core::fmt::Display for LotStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for receiving stock into a brand-new lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLot {
    pub item_id: ItemId,
    pub warehouse_id: WarehouseId,
    pub quantity: i64,
    pub unit_cost: u64,
    pub source_document_id: Option<DocumentId>,
    /// Explicit lot number; generated from the receipt time when absent.
    #[serde(default)]
    pub lot_number: Option<String>,
}

/// A quantity of one item received at one warehouse from one source.
///
/// Invariants, checked after every mutation:
/// - `available_qty >= 0`, `reserved_qty >= 0`
/// - `available_qty + reserved_qty <= initial_qty`
/// - `status == Depleted` exactly when an active lot runs out of both quantities
///
/// `initial_qty` shrinks as reservations are consumed; lots are never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLot {
    pub id: LotId,
    pub item_id: ItemId,
    pub warehouse_id: WarehouseId,
    pub lot_number: String,
    pub source_document_id: Option<DocumentId>,
    pub initial_qty: i64,
    pub available_qty: i64,
    pub reserved_qty: i64,
    pub unit_cost: u64,
    pub status: LotStatus,
    pub received_at: DateTime<Utc>,
    pub version: u64,
}

impl InventoryLot {
    /// Create the lot for a receipt. Receiving always creates a new lot.
    pub fn receive(input: NewLot, received_at: DateTime<Utc>) -> DomainResult<Self> {
        if input.quantity <= 0 {
            return Err(DomainError::validation("received quantity must be positive"));
        }
        let id = LotId::new();
        let lot_number = match input.lot_number {
            Some(n) if !n.trim().is_empty() => n,
            Some(_) => return Err(DomainError::validation("lot number cannot be blank")),
            None => generate_lot_number(received_at, id),
        };
        Ok(Self {
            id,
            item_id: input.item_id,
            warehouse_id: input.warehouse_id,
            lot_number,
            source_document_id: input.source_document_id,
            initial_qty: input.quantity,
            available_qty: input.quantity,
            reserved_qty: 0,
            unit_cost: input.unit_cost,
            status: LotStatus::Active,
            received_at,
            version: 1,
        })
    }

    /// Eligible for FIFO allocation.
    pub fn is_allocatable(&self) -> bool {
        self.status == LotStatus::Active && self.available_qty > 0
    }

    pub fn reserve(&mut self, qty: i64) -> DomainResult<()> {
        ensure_positive(qty)?;
        if self.status != LotStatus::Active {
            return Err(DomainError::invariant(format!(
                "lot {} is {} and cannot be allocated",
                self.lot_number, self.status
            )));
        }
        if qty > self.available_qty {
            return Err(DomainError::InsufficientStock {
                item_id: self.item_id,
                warehouse_id: self.warehouse_id,
                requested: qty,
                available: self.available_qty,
            });
        }
        self.available_qty -= qty;
        self.reserved_qty += qty;
        self.touch()
    }

    /// Return reserved quantity to the available pool.
    pub fn release(&mut self, qty: i64) -> DomainResult<()> {
        ensure_positive(qty)?;
        if qty > self.reserved_qty {
            return Err(DomainError::invariant(format!(
                "lot {} has only {} reserved, cannot release {}",
                self.lot_number, self.reserved_qty, qty
            )));
        }
        self.reserved_qty -= qty;
        self.available_qty += qty;
        if self.status == LotStatus::Depleted {
            self.status = LotStatus::Active;
        }
        self.touch()
    }

    /// Permanently take reserved quantity out of the lot.
    pub fn consume(&mut self, qty: i64) -> DomainResult<()> {
        ensure_positive(qty)?;
        if qty > self.reserved_qty {
            return Err(DomainError::invariant(format!(
                "lot {} has only {} reserved, cannot consume {}",
                self.lot_number, self.reserved_qty, qty
            )));
        }
        self.reserved_qty -= qty;
        self.initial_qty -= qty;
        self.touch()
    }

    pub fn block(&mut self) -> DomainResult<()> {
        self.ensure_status("block", &[LotStatus::Active, LotStatus::Depleted])?;
        if self.reserved_qty > 0 {
            return Err(DomainError::invariant(format!(
                "lot {} has {} reserved and cannot be blocked",
                self.lot_number, self.reserved_qty
            )));
        }
        self.status = LotStatus::Blocked;
        self.touch()
    }

    pub fn unblock(&mut self) -> DomainResult<()> {
        self.ensure_status("unblock", &[LotStatus::Blocked])?;
        self.status = LotStatus::Active;
        self.touch()
    }

    /// Soft-retire the lot. Its remaining quantity stays on record but is no
    /// longer allocatable.
    pub fn expire(&mut self) -> DomainResult<()> {
        self.ensure_status("expire", &[LotStatus::Active, LotStatus::Depleted, LotStatus::Blocked])?;
        if self.reserved_qty > 0 {
            return Err(DomainError::invariant(format!(
                "lot {} has {} reserved and cannot expire",
                self.lot_number, self.reserved_qty
            )));
        }
        self.status = LotStatus::Expired;
        self.touch()
    }

    pub fn check_invariants(&self) -> DomainResult<()> {
        if self.available_qty < 0 || self.reserved_qty < 0 {
            return Err(DomainError::invariant("lot quantities cannot go negative"));
        }
        if self.available_qty + self.reserved_qty > self.initial_qty {
            return Err(DomainError::invariant(format!(
                "lot {}: available {} + reserved {} exceeds initial {}",
                self.lot_number, self.available_qty, self.reserved_qty, self.initial_qty
            )));
        }
        Ok(())
    }

    fn ensure_status(&self, action: &str, allowed_from: &[LotStatus]) -> DomainResult<()> {
        if allowed_from.contains(&self.status) {
            return Ok(());
        }
        Err(DomainError::InvalidTransition {
            from: self.status.to_string(),
            action: action.to_string(),
            allowed: self.status_actions(),
        })
    }

    fn status_actions(&self) -> Vec<String> {
        let actions: &[&str] = match self.status {
            LotStatus::Active | LotStatus::Depleted => &["block", "expire"],
            LotStatus::Blocked => &["unblock", "expire"],
            LotStatus::Expired => &[],
        };
        actions.iter().map(|a| a.to_string()).collect()
    }

    fn touch(&mut self) -> DomainResult<()> {
        if self.status == LotStatus::Active && self.available_qty == 0 && self.reserved_qty == 0 {
            self.status = LotStatus::Depleted;
        }
        self.check_invariants()?;
        self.version += 1;
        Ok(())
    }
}

fn ensure_positive(qty: i64) -> DomainResult<()> {
    if qty <= 0 {
        return Err(DomainError::validation("quantity must be positive"));
    }
    Ok(())
}

/// `LOT-<yyyymmdd>-<first 8 hex of the id>`.
pub fn generate_lot_number(received_at: DateTime<Utc>, id: LotId) -> String {
    let hex = id.as_uuid().simple().to_string();
    format!(
        "LOT-{}-{}",
        received_at.format("%Y%m%d"),
        hex[hex.len() - 8..].to_uppercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_lot(qty: i64) -> InventoryLot {
        InventoryLot::receive(
            NewLot {
                item_id: ItemId::new(),
                warehouse_id: WarehouseId::new(),
                quantity: qty,
                unit_cost: 250,
                source_document_id: None,
                lot_number: None,
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn receive_creates_active_lot() {
        let lot = test_lot(100);
        assert_eq!(lot.initial_qty, 100);
        assert_eq!(lot.available_qty, 100);
        assert_eq!(lot.reserved_qty, 0);
        assert_eq!(lot.status, LotStatus::Active);
        assert!(lot.lot_number.starts_with("LOT-"));
    }

    #[test]
    fn receive_rejects_non_positive_quantity() {
        let err = InventoryLot::receive(
            NewLot {
                item_id: ItemId::new(),
                warehouse_id: WarehouseId::new(),
                quantity: 0,
                unit_cost: 0,
                source_document_id: None,
                lot_number: None,
            },
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn reserve_then_consume_shrinks_lot() {
        let mut lot = test_lot(100);
        lot.reserve(30).unwrap();
        assert_eq!((lot.available_qty, lot.reserved_qty), (70, 30));

        lot.consume(30).unwrap();
        assert_eq!((lot.initial_qty, lot.available_qty, lot.reserved_qty), (70, 70, 0));
        assert_eq!(lot.status, LotStatus::Active);
    }

    #[test]
    fn lot_depletes_when_fully_consumed_and_revives_on_release() {
        let mut lot = test_lot(10);
        lot.reserve(10).unwrap();
        assert_eq!(lot.status, LotStatus::Active);

        lot.release(10).unwrap();
        assert_eq!(lot.status, LotStatus::Active);

        lot.reserve(10).unwrap();
        lot.consume(10).unwrap();
        assert_eq!(lot.status, LotStatus::Depleted);
        assert_eq!(lot.initial_qty, 0);
    }

    #[test]
    fn over_reserve_is_insufficient_stock() {
        let mut lot = test_lot(5);
        let err = lot.reserve(6).unwrap_err();
        assert!(matches!(
            err,
            DomainError::InsufficientStock { requested: 6, available: 5, .. }
        ));
        assert_eq!(lot.available_qty, 5);
    }

    #[test]
    fn block_requires_no_reservations() {
        let mut lot = test_lot(10);
        lot.reserve(1).unwrap();
        assert!(matches!(lot.block(), Err(DomainError::InvariantViolation(_))));

        lot.release(1).unwrap();
        lot.block().unwrap();
        assert!(!lot.is_allocatable());
        assert!(lot.reserve(1).is_err());

        lot.unblock().unwrap();
        assert!(lot.is_allocatable());
    }

    #[test]
    fn unblock_active_lot_is_invalid_transition() {
        let mut lot = test_lot(10);
        let err = lot.unblock().unwrap_err();
        match err {
            DomainError::InvalidTransition { from, allowed, .. } => {
                assert_eq!(from, "active");
                assert_eq!(allowed, vec!["block".to_string(), "expire".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn expired_lot_is_terminal() {
        let mut lot = test_lot(10);
        lot.expire().unwrap();
        assert_eq!(lot.status, LotStatus::Expired);
        assert!(lot.unblock().is_err());
        assert!(lot.block().is_err());
    }

    #[test]
    fn every_mutation_bumps_version() {
        let mut lot = test_lot(10);
        let v = lot.version;
        lot.reserve(2).unwrap();
        lot.release(2).unwrap();
        assert_eq!(lot.version, v + 2);
    }
}

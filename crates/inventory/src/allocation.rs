//! FIFO allocation planning.

use serde::{Deserialize, Serialize};

use wareflow_core::{DomainError, DomainResult, ItemId, WarehouseId};

use crate::{InventoryLot, LotAllocation};

/// Plan a draw of `qty` units of `item_id` at `warehouse_id`, oldest receipt first.
///
/// Only `Active` lots of the matching item and warehouse with available stock
/// are considered. Ties on `received_at` are broken by lot id (v7, so creation
/// order). The plan is all-or-nothing: if eligible lots cannot cover `qty` the
/// call fails with `InsufficientStock` and returns no partial plan.
pub fn plan_fifo_allocation(
    item_id: ItemId,
    warehouse_id: WarehouseId,
    lots: &[InventoryLot],
    qty: i64,
) -> DomainResult<Vec<LotAllocation>> {
    if qty <= 0 {
        return Err(DomainError::validation("allocation quantity must be positive"));
    }

    let mut eligible: Vec<&InventoryLot> = lots
        .iter()
        .filter(|l| l.item_id == item_id && l.warehouse_id == warehouse_id && l.is_allocatable())
        .collect();
    eligible.sort_by(|a, b| a.received_at.cmp(&b.received_at).then(a.id.cmp(&b.id)));

    let available: i64 = eligible.iter().map(|l| l.available_qty).sum();
    if available < qty {
        return Err(DomainError::InsufficientStock {
            item_id,
            warehouse_id,
            requested: qty,
            available,
        });
    }

    let mut remaining = qty;
    let mut plan = Vec::new();
    for lot in eligible {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(lot.available_qty);
        plan.push(LotAllocation { lot_id: lot.id, qty: take });
        remaining -= take;
    }
    Ok(plan)
}

/// Plan and apply a FIFO draw against `lots` in place.
///
/// Lots are only touched once the plan is known to cover `qty`, so on error
/// `lots` is unchanged.
pub fn reserve_fifo(
    item_id: ItemId,
    warehouse_id: WarehouseId,
    lots: &mut [InventoryLot],
    qty: i64,
) -> DomainResult<Vec<LotAllocation>> {
    let plan = plan_fifo_allocation(item_id, warehouse_id, lots, qty)?;
    let mut staged = lots.to_vec();
    for alloc in &plan {
        let lot = staged
            .iter_mut()
            .find(|l| l.id == alloc.lot_id)
            .ok_or_else(|| DomainError::invariant("planned lot vanished"))?;
        lot.reserve(alloc.qty)?;
    }
    lots.clone_from_slice(&staged);
    Ok(plan)
}

/// Stock position of one item at one warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSummary {
    pub item_id: ItemId,
    pub warehouse_id: WarehouseId,
    pub available: i64,
    pub reserved: i64,
    pub lot_count: usize,
}

impl StockSummary {
    pub fn from_lots(item_id: ItemId, warehouse_id: WarehouseId, lots: &[InventoryLot]) -> Self {
        let relevant = lots
            .iter()
            .filter(|l| l.item_id == item_id && l.warehouse_id == warehouse_id);
        let mut summary = Self {
            item_id,
            warehouse_id,
            available: 0,
            reserved: 0,
            lot_count: 0,
        };
        for lot in relevant {
            if lot.is_allocatable() {
                summary.available += lot.available_qty;
            }
            summary.reserved += lot.reserved_qty;
            summary.lot_count += 1;
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::{LotStatus, NewLot};

    fn test_lot(item_id: ItemId, warehouse_id: WarehouseId, qty: i64, age_days: i64) -> InventoryLot {
        InventoryLot::receive(
            NewLot {
                item_id,
                warehouse_id,
                quantity: qty,
                unit_cost: 100,
                source_document_id: None,
                lot_number: None,
            },
            Utc::now() - Duration::days(age_days),
        )
        .unwrap()
    }

    #[test]
    fn draws_oldest_lot_first() {
        let (item, wh) = (ItemId::new(), WarehouseId::new());
        let young = test_lot(item, wh, 50, 1);
        let old = test_lot(item, wh, 40, 10);
        let lots = vec![young.clone(), old.clone()];

        let plan = plan_fifo_allocation(item, wh, &lots, 60).unwrap();
        assert_eq!(
            plan,
            vec![
                LotAllocation { lot_id: old.id, qty: 40 },
                LotAllocation { lot_id: young.id, qty: 20 },
            ]
        );
    }

    #[test]
    fn ignores_blocked_and_foreign_lots() {
        let (item, wh) = (ItemId::new(), WarehouseId::new());
        let mut blocked = test_lot(item, wh, 100, 30);
        blocked.block().unwrap();
        let other_wh = test_lot(item, WarehouseId::new(), 100, 20);
        let good = test_lot(item, wh, 10, 1);

        let lots = vec![blocked, other_wh, good.clone()];
        let err = plan_fifo_allocation(item, wh, &lots, 11).unwrap_err();
        assert_eq!(
            err,
            DomainError::InsufficientStock {
                item_id: item,
                warehouse_id: wh,
                requested: 11,
                available: 10,
            }
        );
    }

    #[test]
    fn reserve_fifo_is_all_or_nothing() {
        let (item, wh) = (ItemId::new(), WarehouseId::new());
        let mut lots = vec![test_lot(item, wh, 10, 2), test_lot(item, wh, 10, 1)];
        let before = lots.clone();

        assert!(reserve_fifo(item, wh, &mut lots, 25).is_err());
        assert_eq!(lots, before);

        reserve_fifo(item, wh, &mut lots, 15).unwrap();
        assert_eq!(lots[0].available_qty, 0);
        assert_eq!(lots[0].reserved_qty, 10);
        assert_eq!(lots[1].available_qty, 5);
        assert_eq!(lots[0].status, LotStatus::Active);
    }

    #[test]
    fn summary_counts_only_allocatable_as_available() {
        let (item, wh) = (ItemId::new(), WarehouseId::new());
        let mut blocked = test_lot(item, wh, 7, 3);
        blocked.block().unwrap();
        let mut lots = vec![blocked, test_lot(item, wh, 10, 1)];
        reserve_fifo(item, wh, &mut lots, 4).unwrap();

        let s = StockSummary::from_lots(item, wh, &lots);
        assert_eq!((s.available, s.reserved, s.lot_count), (6, 4, 2));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: the lot invariant survives any sequence of FIFO draws.
            #[test]
            fn lot_invariant_holds_under_draws(
                sizes in prop::collection::vec(1i64..200, 1..8),
                draws in prop::collection::vec(1i64..150, 1..20),
            ) {
                let (item, wh) = (ItemId::new(), WarehouseId::new());
                let mut lots: Vec<InventoryLot> = sizes
                    .iter()
                    .enumerate()
                    .map(|(i, q)| test_lot(item, wh, *q, i as i64))
                    .collect();
                let total: i64 = sizes.iter().sum();
                let mut reserved = 0i64;

                for qty in draws {
                    match reserve_fifo(item, wh, &mut lots, qty) {
                        Ok(plan) => {
                            prop_assert_eq!(plan.iter().map(|a| a.qty).sum::<i64>(), qty);
                            reserved += qty;
                        }
                        Err(DomainError::InsufficientStock { available, .. }) => {
                            prop_assert!(available < qty);
                            prop_assert_eq!(available, total - reserved);
                        }
                        Err(other) => prop_assert!(false, "unexpected error {:?}", other),
                    }
                    for lot in &lots {
                        prop_assert!(lot.check_invariants().is_ok());
                        prop_assert!(lot.available_qty + lot.reserved_qty <= lot.initial_qty);
                    }
                }

                let held: i64 = lots.iter().map(|l| l.reserved_qty).sum();
                prop_assert_eq!(held, reserved);
            }

            /// Property: a plan never touches a younger lot while an older one has stock left.
            #[test]
            fn plan_is_fifo(
                sizes in prop::collection::vec(1i64..100, 2..6),
                qty in 1i64..300,
            ) {
                let (item, wh) = (ItemId::new(), WarehouseId::new());
                let lots: Vec<InventoryLot> = sizes
                    .iter()
                    .enumerate()
                    .map(|(i, q)| test_lot(item, wh, *q, 100 - i as i64))
                    .collect();

                if let Ok(plan) = plan_fifo_allocation(item, wh, &lots, qty) {
                    for (i, alloc) in plan.iter().enumerate() {
                        prop_assert_eq!(alloc.lot_id, lots[i].id);
                        if i + 1 < plan.len() {
                            prop_assert_eq!(alloc.qty, lots[i].available_qty);
                        }
                    }
                }
            }
        }
    }
}

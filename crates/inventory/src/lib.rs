//! Inventory lot ledger rules.
//!
//! Lots, reservations and FIFO allocation planning, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage). Persistence and
//! locking live in `wareflow-infra`.

pub mod allocation;
pub mod events;
pub mod lot;
pub mod reservation;

pub use allocation::{StockSummary, plan_fifo_allocation, reserve_fifo};
pub use events::LedgerEvent;
pub use lot::{InventoryLot, LotStatus, NewLot};
pub use reservation::{LotAllocation, ReservationStatus, StockReservation};

//! Infrastructure layer: storage, the document engine, the lot ledger
//! service, numbering, configuration and event orchestration.

pub mod approvals;
pub mod config;
pub mod counter;
pub mod engine;
pub mod error;
pub mod events;
pub mod ledger;
pub mod orchestrator;
pub mod outbox;
pub mod store;


pub use approvals::ApprovalResolver;
pub use config::{EngineConfig, NumberFormat};
pub use counter::DocumentCounter;
pub use engine::DocumentEngine;
pub use error::{EngineError, EngineResult, StoreError};
pub use events::{WarehouseBus, WarehouseEvent, WarehouseSystemEvent};
pub use ledger::LotLedger;
pub use store::{DocumentStore, InMemoryStore, PgStore, StoreTx};

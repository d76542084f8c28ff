//! Warehouse documents and their workflows.
//!
//! - [`types`]: document types, statuses, actions
//! - [`document`]: the `Document` record and its lines
//! - [`workflow`]: per-type transition tables ([`WorkflowRegistry`])
//! - [`numbering`]: document number templates
//! - [`events`]: `DocumentEvent` payloads
//!
//! Everything here is deterministic; the engine that persists transitions and
//! runs their stock side effects lives in `wareflow-infra`.

pub mod document;
pub mod events;
pub mod numbering;
pub mod types;
pub mod workflow;

pub use document::{Document, DocumentLine, MAX_AMOUNT, NewDocument, NewLine, TransitionInput};
pub use events::DocumentEvent;
pub use numbering::NumberTemplate;
pub use types::{Action, DocumentStatus, DocumentType, InspectionResult, LineStatus};
pub use workflow::{ScopeRule, SideEffect, TransitionSpec, Validator, Workflow, WorkflowRegistry};

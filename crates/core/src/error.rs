//! Domain error model.

use thiserror::Error;

use crate::id::{ItemId, ReservationId, WarehouseId};

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts). Infrastructure concerns belong elsewhere.
///
/// Every variant is surfaced to the caller untranslated. Only [`DomainError::Conflict`]
/// is meant to be retried, and only after the caller re-reads the current state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input, missing lines).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// The `(status, action)` pair is not in the document type's transition table.
    #[error("action '{action}' is not allowed from status '{from}' (allowed: {})", allowed.join(", "))]
    InvalidTransition {
        from: String,
        action: String,
        allowed: Vec<String>,
    },

    /// The actor's role or scope does not permit the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// A stale version lost the race against a concurrent writer.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Not enough unreserved stock across eligible lots.
    #[error(
        "insufficient stock for item {item_id} in warehouse {warehouse_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        item_id: ItemId,
        warehouse_id: WarehouseId,
        requested: i64,
        available: i64,
    },

    #[error("reservation {0} was already released")]
    AlreadyReleased(ReservationId),

    #[error("reservation {0} was already consumed")]
    AlreadyConsumed(ReservationId),

    /// A requested resource was not found (domain-level).
    #[error("not found: {0}")]
    NotFound(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Whether the caller may retry after re-reading state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_lists_allowed_actions() {
        let err = DomainError::InvalidTransition {
            from: "draft".to_string(),
            action: "approve".to_string(),
            allowed: vec!["submit".to_string(), "cancel".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "action 'approve' is not allowed from status 'draft' (allowed: submit, cancel)"
        );
    }

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(DomainError::conflict("stale").is_retryable());
        assert!(!DomainError::forbidden("nope").is_retryable());
        assert!(!DomainError::AlreadyReleased(ReservationId::new()).is_retryable());
    }
}

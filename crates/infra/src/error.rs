//! Storage and engine error types.

use thiserror::Error;

use wareflow_core::DomainError;

/// Storage operation error.
///
/// These are **infrastructure errors** as opposed to domain errors. A
/// `Conflict` means a version check or unique constraint lost a race.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("concurrent modification: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Error returned by engine, ledger and counter operations.
///
/// Store conflicts and missing rows are surfaced as their domain equivalents
/// so callers only need to match on [`DomainError`] for business outcomes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(StoreError),
}

impl EngineError {
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            EngineError::Domain(e) => Some(e),
            EngineError::Store(_) => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(msg) => EngineError::Domain(DomainError::Conflict(msg)),
            StoreError::NotFound(msg) => EngineError::Domain(DomainError::NotFound(msg)),
            other => EngineError::Store(other),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

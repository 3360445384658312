//! Storage operation errors.
//!
//! These are **infrastructure** failures, kept apart from domain errors
//! (validation, invariants) which travel inside the `Domain` variant, and
//! from business-rule refusals which are ordinary return values
//! (`CheckoutOutcome`).

use thiserror::Error;

use tradepost_core::DomainError;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Store operation error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A deterministic domain failure (validation, invariant, not-found).
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Concurrent modification: a serialization failure that survived the
    /// retry, or a unique-constraint race (e.g. two registrations of the
    /// same email).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A referenced row vanished mid-operation (e.g. a seller account that
    /// no longer exists at credit time). The transaction rolls back whole.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// Driver, pool or connection failure.
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn not_found() -> Self {
        Self::Domain(DomainError::NotFound)
    }
}

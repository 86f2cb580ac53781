//! Ledger error taxonomy.

use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Missing or malformed required input. Never retried automatically.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown or voided register / movement / invoice.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// A uniqueness invariant would be violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Store failure mid-transaction; the whole unit was rolled back.
    #[error("persistence failure: {0}")]
    Persistence(#[from] rusqlite::Error),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        LedgerError::Validation(msg.into())
    }

    pub fn not_found(entity: &'static str, id: i64) -> Self {
        LedgerError::NotFound { entity, id }
    }
}

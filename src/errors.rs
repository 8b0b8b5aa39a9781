use crate::money::{Money, Quantity};
use thiserror::Error;

/// All error kinds returned at the engine's public boundary.
///
/// Validation/business-rule errors are surfaced directly and roll back the
/// open transaction; `LockTimeout` is only returned once internal retries
/// (see `config::RetryConfig`) are exhausted; `Internal` wraps storage
/// faults the caller cannot act on.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: i64,
        requested: Quantity,
        available: Quantity,
    },

    #[error("insufficient credit: requested {requested}, available {available}")]
    InsufficientCredit { requested: Money, available: Money },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("lock timeout: writer contention exceeded retry budget")]
    LockTimeout,

    #[error("business rule violated: {0}")]
    BusinessRule(String),

    #[error("operation timed out")]
    Timeout,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(sql_err, _)
                if sql_err.code == rusqlite::ErrorCode::DatabaseBusy
                    || sql_err.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                EngineError::LockTimeout
            }
            _ => EngineError::Internal(e.to_string()),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Internal(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

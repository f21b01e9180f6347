//! Store error types.

use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite error.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A query expected exactly one row but found none.
    #[error("record not found")]
    NotFound,
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

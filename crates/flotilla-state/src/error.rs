//! Error types for the revision history store.

use thiserror::Error;

/// Result type alias for revision history operations.
pub type HistoryResult<T> = Result<T, HistoryError>;

/// Errors that can occur during revision history operations.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("revision not found: {0}")]
    NotFound(String),
}

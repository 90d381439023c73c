//! Error types for the ledger

use crate::types::TransactionId;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Account refuses postings (frozen, closed, blocked by the counterparty bank)
    #[error("Account rejected: {0}")]
    AccountRejected(String),

    /// Ledger endpoint unreachable
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    /// Storage error on the ledger side
    #[error("Storage error: {0}")]
    Storage(String),

    /// Malformed balance update
    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    /// Transaction unknown to the ledger
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True when retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Unavailable(_) | Error::Storage(_))
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

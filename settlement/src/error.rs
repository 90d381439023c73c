//! Error types for settlement engine

use crate::types::FailureKind;
use ledger_core::Currency;
use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Settlement errors
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Malformed request (never retried)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Insufficient liquidity
    #[error("Insufficient liquidity in {currency}: required {required}, available {available}")]
    InsufficientLiquidity {
        /// Pool currency
        currency: Currency,
        /// Amount asked for
        required: Decimal,
        /// Amount the pool could offer
        available: Decimal,
    },

    /// Infrastructure failure
    #[error("Technical failure: {0}")]
    Technical(String),

    /// Compliance gate refused the settlement
    #[error("Compliance failure: {0}")]
    Compliance(String),

    /// Counterparty refused or cannot receive
    #[error("Counterparty failure: {0}")]
    Counterparty(String),

    /// Transport-level failure towards a dependency
    #[error("Network failure: {0}")]
    Network(String),

    /// Operation not allowed in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Unknown or already terminated reservation
    #[error("Reservation not found: {0}")]
    ReservationNotFound(String),

    /// Circuit breaker open
    #[error("Circuit breaker open for {dependency}: {reason}")]
    CircuitOpen {
        /// Guarded dependency
        dependency: String,
        /// Reason
        reason: String,
    },

    /// Lock acquisition timed out
    #[error("Lock timeout after {millis}ms on {keys}")]
    LockTimeout {
        /// Wait budget
        millis: u64,
        /// Resource keys requested
        keys: String,
    },

    /// Request outlived its processing deadline
    #[error("Processing deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_core::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Classify the error into the settlement failure taxonomy
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::InvalidRequest(_) | Error::Config(_) => FailureKind::InvalidRequest,
            Error::InsufficientLiquidity { .. } | Error::ReservationNotFound(_) => {
                FailureKind::InsufficientLiquidity
            }
            Error::Compliance(_) => FailureKind::ComplianceFailure,
            Error::Counterparty(_) => FailureKind::CounterpartyFailure,
            Error::Network(_) => FailureKind::NetworkFailure,
            Error::Ledger(err) => match err {
                ledger_core::Error::AccountRejected(_) => FailureKind::CounterpartyFailure,
                ledger_core::Error::Unavailable(_) => FailureKind::NetworkFailure,
                _ => FailureKind::TechnicalFailure,
            },
            Error::Technical(_)
            | Error::InvalidState(_)
            | Error::CircuitOpen { .. }
            | Error::LockTimeout { .. }
            | Error::DeadlineExceeded(_)
            | Error::Io(_)
            | Error::Other(_) => FailureKind::TechnicalFailure,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_errors_are_classified() {
        let rejected = Error::from(ledger_core::Error::AccountRejected("Y".into()));
        let outage = Error::from(ledger_core::Error::Unavailable("down".into()));
        let storage = Error::from(ledger_core::Error::Storage("disk".into()));

        assert_eq!(rejected.kind(), FailureKind::CounterpartyFailure);
        assert_eq!(outage.kind(), FailureKind::NetworkFailure);
        assert_eq!(storage.kind(), FailureKind::TechnicalFailure);
    }

    #[test]
    fn test_liquidity_error_message() {
        let err = Error::InsufficientLiquidity {
            currency: Currency::USD,
            required: Decimal::new(100, 0),
            available: Decimal::new(50, 0),
        };

        assert_eq!(err.kind(), FailureKind::InsufficientLiquidity);
        assert!(err.to_string().contains("required 100, available 50"));
    }
}

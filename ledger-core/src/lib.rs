//! DelTran Ledger Core
//!
//! Account ledger boundary used by the real-time settlement core.
//!
//! # Architecture
//!
//! - **Transactional staging**: balance deltas are staged under a
//!   [`TransactionId`] and only become visible on commit
//! - **All-or-nothing**: a set of updates is validated in full before any
//!   of it is staged
//! - **Pluggable backend**: the settlement core depends on the
//!   [`AccountLedger`] trait, never on a concrete store
//!
//! # Invariants
//!
//! - Money conservation: a balanced update set leaves Σ(balances) unchanged
//! - Rolled back transactions leave no trace in committed balances
//! - Committed balances are never observed half-applied

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod error;
pub mod ledger;
pub mod types;

// Re-exports
pub use error::{Error, Result};
pub use ledger::{AccountLedger, FaultKind, InMemoryLedger};
pub use types::{AccountId, BalanceUpdate, Currency, TransactionId};

//! Account ledger boundary
//!
//! The settlement core never owns balances. It talks to the ledger through
//! [`AccountLedger`], which must apply a set of signed deltas all-or-nothing
//! under a transaction and make them visible only on commit.
//!
//! [`InMemoryLedger`] is the in-process implementation used by the
//! settlement node and the test suites.
//!
//! # Example
//!
//! ```no_run
//! use ledger_core::{AccountId, AccountLedger, BalanceUpdate, Currency, InMemoryLedger, TransactionId};
//! use rust_decimal::Decimal;
//!
//! #[tokio::main]
//! async fn main() -> ledger_core::Result<()> {
//!     let ledger = InMemoryLedger::new();
//!     let tx = TransactionId::new();
//!     let updates = BalanceUpdate::transfer_pair(
//!         &AccountId::new("X"),
//!         &AccountId::new("Y"),
//!         Currency::USD,
//!         Decimal::from(100),
//!         "demo",
//!     );
//!
//!     ledger.apply_updates(tx, &updates).await?;
//!     ledger.commit(tx).await?;
//!
//!     Ok(())
//! }
//! ```

use crate::{
    types::{AccountId, BalanceUpdate, Currency, TransactionId},
    Error, Result,
};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};

/// Contract the settlement core requires from the ledger
#[async_trait]
pub trait AccountLedger: Send + Sync {
    /// Committed balance of an account in one currency
    async fn get_balance(&self, account: &AccountId, currency: Currency) -> Result<Decimal>;

    /// Stage a set of signed deltas under `tx`
    ///
    /// Either every update in the set is staged or none is.
    async fn apply_updates(&self, tx: TransactionId, updates: &[BalanceUpdate]) -> Result<()>;

    /// Make everything staged under `tx` durable and visible
    async fn commit(&self, tx: TransactionId) -> Result<()>;

    /// Discard everything staged under `tx`
    async fn rollback(&self, tx: TransactionId) -> Result<()>;
}

/// Failure injected into the next `apply_updates` calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Endpoint unreachable (network class)
    Unavailable,
    /// Backend write failure (technical class)
    Storage,
}

/// In-process ledger with staged transactions
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    /// Committed balances
    balances: DashMap<(AccountId, Currency), Decimal>,

    /// Staged updates per open transaction
    staged: Mutex<HashMap<TransactionId, Vec<BalanceUpdate>>>,

    /// Accounts refusing postings
    frozen: DashSet<AccountId>,

    /// Pending injected faults, consumed one per `apply_updates`
    faults: Mutex<VecDeque<FaultKind>>,

    /// Commits take the write side so snapshots never see half a transaction
    commit_gate: RwLock<()>,
}

impl InMemoryLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Post an opening balance outside any transaction
    pub fn open_balance(&self, account: AccountId, currency: Currency, amount: Decimal) {
        let _gate = self.commit_gate.write();
        *self.balances.entry((account, currency)).or_insert(Decimal::ZERO) += amount;
    }

    /// Committed balance (zero for unknown accounts)
    pub fn balance(&self, account: &AccountId, currency: Currency) -> Decimal {
        let _gate = self.commit_gate.read();
        self.balances
            .get(&(account.clone(), currency))
            .map(|b| *b)
            .unwrap_or(Decimal::ZERO)
    }

    /// Sum of every committed balance in a currency
    pub fn total_balance(&self, currency: Currency) -> Decimal {
        let _gate = self.commit_gate.read();
        self.balances
            .iter()
            .filter(|entry| entry.key().1 == currency)
            .map(|entry| *entry.value())
            .sum()
    }

    /// Consistent copy of all committed balances
    pub fn snapshot(&self) -> HashMap<(AccountId, Currency), Decimal> {
        let _gate = self.commit_gate.read();
        self.balances
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Number of transactions with staged, uncommitted updates
    pub fn open_transactions(&self) -> usize {
        self.staged.lock().len()
    }

    /// Reject every future update touching `account`
    pub fn freeze_account(&self, account: AccountId) {
        tracing::warn!("Account {} frozen for postings", account);
        self.frozen.insert(account);
    }

    /// Accept updates for `account` again
    pub fn unfreeze_account(&self, account: &AccountId) {
        self.frozen.remove(account);
    }

    /// Make the next `count` calls to `apply_updates` fail with `kind`
    pub fn inject_failures(&self, count: usize, kind: FaultKind) {
        let mut faults = self.faults.lock();
        faults.extend(std::iter::repeat(kind).take(count));
    }

    fn validate(&self, updates: &[BalanceUpdate]) -> Result<()> {
        for update in updates {
            if update.account.is_empty() {
                return Err(Error::InvalidUpdate("Blank account in update".to_string()));
            }
            if update.amount.is_zero() {
                return Err(Error::InvalidUpdate(format!(
                    "Zero delta for account {}",
                    update.account
                )));
            }
            if self.frozen.contains(&update.account) {
                return Err(Error::AccountRejected(update.account.to_string()));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AccountLedger for InMemoryLedger {
    async fn get_balance(&self, account: &AccountId, currency: Currency) -> Result<Decimal> {
        Ok(self.balance(account, currency))
    }

    async fn apply_updates(&self, tx: TransactionId, updates: &[BalanceUpdate]) -> Result<()> {
        let fault = self.faults.lock().pop_front();
        if let Some(fault) = fault {
            return Err(match fault {
                FaultKind::Unavailable => Error::Unavailable("injected outage".to_string()),
                FaultKind::Storage => Error::Storage("injected write failure".to_string()),
            });
        }

        // Validate the whole set before staging any of it
        self.validate(updates)?;

        self.staged
            .lock()
            .entry(tx)
            .or_default()
            .extend(updates.iter().cloned());

        tracing::debug!("Staged {} updates under {}", updates.len(), tx);
        Ok(())
    }

    async fn commit(&self, tx: TransactionId) -> Result<()> {
        let updates = self.staged.lock().remove(&tx).unwrap_or_default();

        let _gate = self.commit_gate.write();
        for update in &updates {
            *self
                .balances
                .entry((update.account.clone(), update.currency))
                .or_insert(Decimal::ZERO) += update.amount;
        }

        tracing::debug!("Committed {} updates under {}", updates.len(), tx);
        Ok(())
    }

    async fn rollback(&self, tx: TransactionId) -> Result<()> {
        let discarded = self.staged.lock().remove(&tx).map(|u| u.len()).unwrap_or(0);
        tracing::debug!("Rolled back {} staged updates under {}", discarded, tx);
        Ok(())
    }
}

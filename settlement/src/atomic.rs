//! Atomic settlement processor
//!
//! The only path through which balances change. A settlement:
//!
//! 1. locks every [`ResourceKey`] it touches, in canonical order
//! 2. opens a transaction
//! 3. stages its balance updates on the ledger (all-or-nothing)
//! 4. commits, or rolls back on any failure
//!
//! Locks are held by a [`LockSet`] and released on drop. A [`Transaction`]
//! that is dropped while still active is rolled back in the background, so
//! neither locks nor staged updates leak on early returns or cancellation.
//!
//! Fallback routes are separate ledgers bound by name. A transaction is tied
//! to the ledger it was opened on and stages, commits and rolls back there.

use crate::{types::ResourceKey, Error, Result};
use dashmap::DashMap;
use ledger_core::{AccountLedger, BalanceUpdate, TransactionId};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Lifecycle of a transaction context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Open, updates may be staged
    Active,
    /// Durable
    Committed,
    /// Discarded
    RolledBack,
}

/// Processor shared by every settlement path
#[derive(Clone)]
pub struct AtomicSettlementProcessor {
    /// Primary ledger
    ledger: Arc<dyn AccountLedger>,

    /// Ledgers reachable through named fallback routes
    routes: Arc<DashMap<String, Arc<dyn AccountLedger>>>,

    /// One async mutex per resource key
    locks: Arc<DashMap<ResourceKey, Arc<Mutex<()>>>>,

    /// Transaction contexts
    transactions: Arc<DashMap<TransactionId, TransactionState>>,

    /// Budget for acquiring a whole lock set
    lock_timeout: Duration,
}

impl fmt::Debug for AtomicSettlementProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicSettlementProcessor")
            .field("routes", &self.route_names())
            .field("locks", &self.locks.len())
            .field("transactions", &self.transactions.len())
            .field("lock_timeout", &self.lock_timeout)
            .finish()
    }
}

/// Locks held for one settlement; released on drop
pub struct LockSet {
    lock_id: Uuid,
    keys: Vec<ResourceKey>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl LockSet {
    /// Lock ID
    pub fn lock_id(&self) -> Uuid {
        self.lock_id
    }

    /// Keys held, in acquisition order
    pub fn keys(&self) -> &[ResourceKey] {
        &self.keys
    }
}

impl fmt::Debug for LockSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockSet")
            .field("lock_id", &self.lock_id)
            .field("keys", &self.keys)
            .finish()
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        debug!("Released lock set {} ({} keys)", self.lock_id, self.keys.len());
    }
}

/// Transaction context; rolled back on drop unless finished
pub struct Transaction {
    id: TransactionId,
    route: Option<String>,
    ledger: Arc<dyn AccountLedger>,
    processor: AtomicSettlementProcessor,
    finished: bool,
}

impl Transaction {
    /// Transaction ID
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Fallback route the transaction runs on, `None` for the primary ledger
    pub fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("route", &self.route)
            .field("finished", &self.finished)
            .finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        let Some(mut state) = self.processor.transactions.get_mut(&self.id) else {
            return;
        };
        if *state != TransactionState::Active {
            return;
        }
        *state = TransactionState::RolledBack;
        drop(state);

        warn!("Transaction {} dropped while active, rolling back", self.id);
        let ledger = Arc::clone(&self.ledger);
        let id = self.id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = ledger.rollback(id).await {
                    warn!("Background rollback of {} failed: {}", id, e);
                }
            });
        }
    }
}

impl AtomicSettlementProcessor {
    /// Create processor over a ledger
    pub fn new(ledger: Arc<dyn AccountLedger>, lock_timeout: Duration) -> Self {
        Self {
            ledger,
            routes: Arc::new(DashMap::new()),
            locks: Arc::new(DashMap::new()),
            transactions: Arc::new(DashMap::new()),
            lock_timeout,
        }
    }

    /// Primary ledger
    pub fn ledger(&self) -> &Arc<dyn AccountLedger> {
        &self.ledger
    }

    /// Bind a fallback route to its ledger, replacing any earlier binding
    pub fn bind_route(&self, route: impl Into<String>, ledger: Arc<dyn AccountLedger>) {
        let route = route.into();
        debug!("Bound fallback route {}", route);
        self.routes.insert(route, ledger);
    }

    /// Routes with a bound ledger, sorted
    pub fn route_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.routes.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    fn ledger_for(&self, route: Option<&str>) -> Result<Arc<dyn AccountLedger>> {
        match route {
            None => Ok(Arc::clone(&self.ledger)),
            Some(route) => self
                .routes
                .get(route)
                .map(|ledger| Arc::clone(ledger.value()))
                .ok_or_else(|| Error::Technical(format!("No ledger bound to route {}", route))),
        }
    }

    /// Acquire every key, sorted by account then currency
    ///
    /// Fails with `LockTimeout` if the whole set is not held within the
    /// configured budget; keys acquired so far are released.
    #[instrument(skip(self, keys), fields(keys = keys.len()))]
    pub async fn lock(&self, keys: &[ResourceKey]) -> Result<LockSet> {
        let mut keys = keys.to_vec();
        keys.sort();
        keys.dedup();

        let deadline = tokio::time::Instant::now() + self.lock_timeout;
        let mut guards = Vec::with_capacity(keys.len());

        for key in &keys {
            let mutex = Arc::clone(
                self.locks
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(())))
                    .value(),
            );

            match tokio::time::timeout_at(deadline, mutex.lock_owned()).await {
                Ok(guard) => guards.push(guard),
                Err(_) => {
                    let keys = keys
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ");
                    warn!("Lock timeout on [{}]", keys);
                    return Err(Error::LockTimeout {
                        millis: self.lock_timeout.as_millis() as u64,
                        keys,
                    });
                }
            }
        }

        let lock_id = Uuid::new_v4();
        debug!("Acquired lock set {} ({} keys)", lock_id, keys.len());
        Ok(LockSet {
            lock_id,
            keys,
            _guards: guards,
        })
    }

    /// Release a lock set
    pub fn unlock(&self, locks: LockSet) {
        drop(locks);
    }

    /// Drop lock entries nobody holds or waits on
    pub fn prune_locks(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        before - self.locks.len()
    }

    /// Allocate a transaction context on the primary ledger (no side effects yet)
    pub fn begin_transaction(&self) -> Transaction {
        self.open(None, Arc::clone(&self.ledger))
    }

    /// Allocate a transaction context on a route's ledger, or the primary for `None`
    pub fn begin_routed_transaction(&self, route: Option<&str>) -> Result<Transaction> {
        let ledger = self.ledger_for(route)?;
        Ok(self.open(route.map(str::to_string), ledger))
    }

    fn open(&self, route: Option<String>, ledger: Arc<dyn AccountLedger>) -> Transaction {
        let id = TransactionId::new();
        self.transactions.insert(id, TransactionState::Active);
        Transaction {
            id,
            route,
            ledger,
            processor: self.clone(),
            finished: false,
        }
    }

    /// State of a transaction
    pub fn transaction_state(&self, tx: TransactionId) -> Option<TransactionState> {
        self.transactions.get(&tx).map(|s| *s)
    }

    fn ensure_active(&self, tx: TransactionId) -> Result<()> {
        match self.transaction_state(tx) {
            Some(TransactionState::Active) => Ok(()),
            Some(state) => Err(Error::InvalidState(format!(
                "Transaction {} is {:?}",
                tx, state
            ))),
            None => Err(Error::InvalidState(format!("Unknown transaction {}", tx))),
        }
    }

    /// Stage updates under the transaction (all or none)
    #[instrument(skip(self, tx, updates), fields(tx = %tx.id, updates = updates.len()))]
    pub async fn update_balances(&self, tx: &Transaction, updates: &[BalanceUpdate]) -> Result<()> {
        self.ensure_active(tx.id)?;
        tx.ledger.apply_updates(tx.id, updates).await?;
        Ok(())
    }

    /// Make staged updates durable; fails fast if not active
    pub async fn commit_transaction(&self, mut tx: Transaction) -> Result<()> {
        self.ensure_active(tx.id)?;

        match tx.ledger.commit(tx.id).await {
            Ok(()) => {
                self.transactions.insert(tx.id, TransactionState::Committed);
                tx.finished = true;
                debug!("Committed {}", tx.id);
                Ok(())
            }
            // Dropping `tx` rolls it back
            Err(e) => Err(e.into()),
        }
    }

    /// Discard staged updates; fails fast after commit
    pub async fn rollback_transaction(&self, mut tx: Transaction) -> Result<()> {
        match self.transaction_state(tx.id) {
            Some(TransactionState::Committed) => {
                tx.finished = true;
                return Err(Error::InvalidState(format!(
                    "Transaction {} already committed",
                    tx.id
                )));
            }
            Some(TransactionState::RolledBack) => {
                tx.finished = true;
                return Ok(());
            }
            _ => {}
        }

        self.transactions.insert(tx.id, TransactionState::RolledBack);
        tx.finished = true;
        tx.ledger.rollback(tx.id).await?;
        debug!("Rolled back {}", tx.id);
        Ok(())
    }

    /// Forget finished transaction contexts
    pub fn prune_transactions(&self) -> usize {
        let before = self.transactions.len();
        self.transactions
            .retain(|_, state| *state == TransactionState::Active);
        before - self.transactions.len()
    }
}

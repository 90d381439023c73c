//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Money conservation: committed transfer pairs leave Σ(balances) unchanged
//! - Atomicity: rolled back or rejected update sets leave no trace
//! - Isolation: staged updates are invisible until commit

use ledger_core::{AccountId, AccountLedger, BalanceUpdate, Currency, InMemoryLedger, TransactionId};
use proptest::prelude::*;
use rust_decimal::Decimal;

/// Strategy for generating valid amounts (positive decimals)
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (1u64..1_000_000_00u64).prop_map(|cents| Decimal::new(cents as i64, 2))
}

/// Strategy for generating currencies
fn currency_strategy() -> impl Strategy<Value = Currency> {
    prop_oneof![
        Just(Currency::USD),
        Just(Currency::EUR),
        Just(Currency::GBP),
        Just(Currency::AED),
        Just(Currency::INR),
    ]
}

/// Strategy for generating transfers between a small set of accounts
fn transfer_strategy() -> impl Strategy<Value = (usize, usize, Decimal, Currency)> {
    (0usize..5, 0usize..5, amount_strategy(), currency_strategy())
        .prop_filter("distinct accounts", |(from, to, _, _)| from != to)
}

fn account(index: usize) -> AccountId {
    AccountId::new(format!("BANK-{}", index))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: committed transfers conserve money per currency
    #[test]
    fn prop_money_conservation(transfers in prop::collection::vec(transfer_strategy(), 1..30)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ledger = InMemoryLedger::new();

            for (from, to, amount, currency) in &transfers {
                let tx = TransactionId::new();
                let updates = BalanceUpdate::transfer_pair(&account(*from), &account(*to), *currency, *amount, "prop");
                ledger.apply_updates(tx, &updates).await.unwrap();
                ledger.commit(tx).await.unwrap();
            }

            for currency in Currency::ALL {
                prop_assert_eq!(ledger.total_balance(currency), Decimal::ZERO);
            }
            Ok(())
        })?;
    }

    /// Property: a rolled back transaction leaves committed balances untouched
    #[test]
    fn prop_rollback_leaves_no_trace(
        committed in prop::collection::vec(transfer_strategy(), 0..10),
        rolled_back in prop::collection::vec(transfer_strategy(), 1..10),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ledger = InMemoryLedger::new();

            for (from, to, amount, currency) in &committed {
                let tx = TransactionId::new();
                let updates = BalanceUpdate::transfer_pair(&account(*from), &account(*to), *currency, *amount, "kept");
                ledger.apply_updates(tx, &updates).await.unwrap();
                ledger.commit(tx).await.unwrap();
            }
            let before = ledger.snapshot();

            let tx = TransactionId::new();
            for (from, to, amount, currency) in &rolled_back {
                let updates = BalanceUpdate::transfer_pair(&account(*from), &account(*to), *currency, *amount, "undone");
                ledger.apply_updates(tx, &updates).await.unwrap();
            }
            // Staged, not visible
            prop_assert_eq!(&ledger.snapshot(), &before);

            ledger.rollback(tx).await.unwrap();
            prop_assert_eq!(&ledger.snapshot(), &before);
            prop_assert_eq!(ledger.open_transactions(), 0);
            Ok(())
        })?;
    }

    /// Property: an update set touching a frozen account is rejected whole
    #[test]
    fn prop_rejected_set_is_all_or_nothing((from, to, amount, currency) in transfer_strategy()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ledger = InMemoryLedger::new();
            ledger.freeze_account(account(to));

            let tx = TransactionId::new();
            let updates = BalanceUpdate::transfer_pair(&account(from), &account(to), currency, amount, "frozen");
            prop_assert!(ledger.apply_updates(tx, &updates).await.is_err());

            ledger.commit(tx).await.unwrap();
            prop_assert_eq!(ledger.balance(&account(from), currency), Decimal::ZERO);
            prop_assert_eq!(ledger.open_transactions(), 0);
            Ok(())
        })?;
    }
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use ledger_core::FaultKind;

    #[tokio::test]
    async fn test_transient_fault_then_success() {
        let ledger = InMemoryLedger::new();
        ledger.inject_failures(1, FaultKind::Unavailable);

        let updates = BalanceUpdate::transfer_pair(&account(1), &account(2), Currency::USD, Decimal::new(100, 0), "retry");

        let tx = TransactionId::new();
        let err = ledger.apply_updates(tx, &updates).await.unwrap_err();
        assert!(err.is_transient());
        ledger.rollback(tx).await.unwrap();

        let tx = TransactionId::new();
        ledger.apply_updates(tx, &updates).await.unwrap();
        ledger.commit(tx).await.unwrap();

        assert_eq!(ledger.balance(&account(2), Currency::USD), Decimal::new(100, 0));
        assert_eq!(ledger.total_balance(Currency::USD), Decimal::ZERO);
    }
}

//! Property-based tests for settlement invariants
//!
//! - Liquidity: reserve then release restores the pool exactly
//! - Liquidity: available + reserved never exceeds the pool total
//! - Netting: positions sum to zero and net never exceeds gross

use proptest::prelude::*;
use rust_decimal::Decimal;
use settlement::config::{LiquidityConfig, NettingConfig, PoolConfig};
use settlement::liquidity::LiquidityManager;
use settlement::netting::NettingEngine;
use settlement::{Currency, SettlementRequest};
use uuid::Uuid;

/// Strategy for generating valid amounts (positive decimals)
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (1u64..1_000_000u64).prop_map(|cents| Decimal::new(cents as i64, 2))
}

fn manager(balance: Decimal) -> LiquidityManager {
    let config = LiquidityConfig {
        pools: vec![PoolConfig {
            currency: Currency::USD,
            initial_balance: balance,
            minimum_balance: Decimal::ZERO,
            optimal_balance: Decimal::ZERO,
            internal_reserve: Decimal::ZERO,
            emergency_line: Decimal::ZERO,
        }],
        ..LiquidityConfig::default()
    };
    LiquidityManager::new(&config)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: releasing every reservation restores the pool
    #[test]
    fn prop_reserve_release_restores_pool(amounts in prop::collection::vec(amount_strategy(), 1..20)) {
        let liquidity = manager(Decimal::new(5_000_000, 2));

        let reservations: Vec<_> = amounts
            .iter()
            .filter_map(|amount| liquidity.reserve_liquidity(Currency::USD, *amount).ok())
            .collect();

        for id in &reservations {
            liquidity.release_liquidity(*id).unwrap();
            // A second release is refused
            prop_assert!(liquidity.release_liquidity(*id).is_err());
        }

        let pool = liquidity.pool(Currency::USD).unwrap();
        prop_assert_eq!(pool.available_balance, Decimal::new(5_000_000, 2));
        prop_assert_eq!(pool.reserved_balance, Decimal::ZERO);
        prop_assert_eq!(liquidity.open_reservations(), 0);
    }

    /// Property: reservations never overdraw the pool
    #[test]
    fn prop_reservations_bounded_by_total(
        amounts in prop::collection::vec(amount_strategy(), 1..40),
        commit_mask in prop::collection::vec(any::<bool>(), 40),
    ) {
        let liquidity = manager(Decimal::new(1_000_000, 2));

        for (amount, commit) in amounts.iter().zip(commit_mask) {
            if let Ok(id) = liquidity.reserve_liquidity(Currency::USD, *amount) {
                if commit {
                    liquidity.commit_liquidity(id).unwrap();
                }
            }

            let pool = liquidity.pool(Currency::USD).unwrap();
            prop_assert!(pool.available_balance >= Decimal::ZERO);
            prop_assert!(pool.available_balance + pool.reserved_balance <= pool.total_balance);
        }
    }

    /// Property: net positions sum to zero and net ≤ gross
    #[test]
    fn prop_netting_conserves(
        transfers in prop::collection::vec(
            (0usize..6, 0usize..6, amount_strategy())
                .prop_filter("distinct accounts", |(from, to, _)| from != to),
            1..30,
        )
    ) {
        let netting = NettingEngine::new(NettingConfig {
            max_members: usize::MAX,
            ..NettingConfig::default()
        });

        for (from, to, amount) in &transfers {
            let request = SettlementRequest::new(
                format!("BANK-{}", from),
                format!("BANK-{}", to),
                *amount,
                Currency::EUR,
            )
            .with_netting_group("P");
            netting.admit(Uuid::new_v4(), request).unwrap();
        }

        let cycle = netting.close_cycle("P").unwrap();
        let positions = netting.calculate_net_positions(&cycle);
        let net = netting.net_amount(&cycle, &positions);
        let efficiency = netting.get_efficiency_ratio(&cycle);

        prop_assert_eq!(positions.iter().map(|p| p.net_amount).sum::<Decimal>(), Decimal::ZERO);
        prop_assert!(net <= cycle.gross_amount());
        prop_assert!((0.0..=1.0).contains(&efficiency));
    }
}

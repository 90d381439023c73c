//! Liquidity management
//!
//! Tracks one pool per currency and hands out reservations against it.
//!
//! # Reservation lifecycle
//!
//! ```text
//! reserve:  available ──amount──▶ reserved
//! commit:   reserved  ──amount──▶ (gone, total balance reduced)
//! release:  reserved  ──amount──▶ available
//! ```
//!
//! A reservation is removed from the registry by whichever of `commit` or
//! `release` runs first, so it can never be both committed and released.
//!
//! # Provisioning
//!
//! When a check fails the shortfall is sourced, in order, from the internal
//! reserve, the emergency line, then cross-currency rebalancing out of pools
//! holding surplus above their optimal balance.

use crate::{
    config::{InflowPolicy, LiquidityConfig, PoolConfig, RebalanceRouteConfig},
    types::{Currency, SettlementRequest},
    Error, Result,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Liquidity available for one currency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityPool {
    /// Pool ID
    pub pool_id: String,

    /// Currency
    pub currency: Currency,

    /// Total balance (available + reserved)
    pub total_balance: Decimal,

    /// Everything the pool has been funded with; committed outflows do not lower it
    pub funded_balance: Decimal,

    /// Free for new reservations
    pub available_balance: Decimal,

    /// Held by open reservations
    pub reserved_balance: Decimal,

    /// Announced but not yet received
    pub pending_inflows: Decimal,

    /// Announced but not yet reserved
    pub pending_outflows: Decimal,

    /// Minimum balance
    pub minimum_balance: Decimal,

    /// Optimal balance
    pub optimal_balance: Decimal,

    /// Last confirmation of the pending inflows
    pub inflow_confirmed_at: Option<DateTime<Utc>>,

    /// Last time the pool took part in a rebalance
    pub last_rebalance: Option<DateTime<Utc>>,

    /// 0.0 (empty) - 1.0 (at or above optimal)
    pub health_score: f64,
}

impl LiquidityPool {
    fn from_config(config: &PoolConfig) -> Self {
        let mut pool = Self {
            pool_id: format!("POOL-{}", config.currency),
            currency: config.currency,
            total_balance: config.initial_balance,
            funded_balance: config.initial_balance,
            available_balance: config.initial_balance,
            reserved_balance: Decimal::ZERO,
            pending_inflows: Decimal::ZERO,
            pending_outflows: Decimal::ZERO,
            minimum_balance: config.minimum_balance,
            optimal_balance: config.optimal_balance,
            inflow_confirmed_at: None,
            last_rebalance: None,
            health_score: 0.0,
        };
        pool.refresh_health();
        pool
    }

    fn refresh_health(&mut self) {
        self.health_score = if self.optimal_balance > Decimal::ZERO {
            (self.available_balance / self.optimal_balance)
                .to_f64()
                .unwrap_or(0.0)
                .clamp(0.0, 1.0)
        } else if self.available_balance > Decimal::ZERO {
            1.0
        } else {
            0.0
        };
    }

    /// Fraction of the funded balance that is reserved or spent
    pub fn utilization(&self) -> f64 {
        if self.funded_balance <= Decimal::ZERO {
            return 0.0;
        }
        (Decimal::ONE - self.available_balance / self.funded_balance)
            .to_f64()
            .unwrap_or(0.0)
            .clamp(0.0, 1.0)
    }
}

/// Outcome of a liquidity check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityCheck {
    /// Whether `available >= required`
    pub sufficient: bool,

    /// Headroom counted for the check
    pub available: Decimal,

    /// Amount requested
    pub required: Decimal,

    /// Pool health score
    pub health_score: f64,

    /// Suggested follow-up
    pub recommended_action: RecommendedAction,
}

/// Suggested follow-up after a check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecommendedAction {
    /// Pool stays at or above optimal
    None,
    /// Pool drops below optimal
    Rebalance,
    /// Pool drops below minimum
    Provision,
    /// Pool cannot cover the settlement
    Emergency,
}

/// Provisioning source, tried in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquiditySource {
    /// Internal reserve of the same currency
    InternalReserve,
    /// Emergency credit line of the same currency
    EmergencyPool,
    /// Surplus of another currency's pool
    CrossCurrencyRebalance,
}

impl LiquiditySource {
    /// Sources in the order they are tried
    pub const ORDER: [LiquiditySource; 3] = [
        LiquiditySource::InternalReserve,
        LiquiditySource::EmergencyPool,
        LiquiditySource::CrossCurrencyRebalance,
    ];
}

/// Result of a provisioning run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionOutcome {
    /// Source that covered the shortfall (`None` if there was none)
    pub source: Option<LiquiditySource>,

    /// Amount added to the pool
    pub amount: Decimal,
}

/// Reservation handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservationId(Uuid);

impl ReservationId {
    fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rsv-{}", self.0)
    }
}

/// Open reservation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation ID
    pub reservation_id: ReservationId,

    /// Pool currency
    pub currency: Currency,

    /// Amount held
    pub amount: Decimal,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

/// Liquidity manager
#[derive(Debug)]
pub struct LiquidityManager {
    /// Pools, each behind its own lock
    pools: DashMap<Currency, Arc<Mutex<LiquidityPool>>>,

    /// Open reservations
    reservations: DashMap<ReservationId, Reservation>,

    /// Internal reserve per currency
    reserves: DashMap<Currency, Decimal>,

    /// Emergency line per currency
    emergency: DashMap<Currency, Decimal>,

    /// Cross-currency routes
    rebalance_routes: Vec<RebalanceRouteConfig>,

    /// Pending-inflow inclusion policy
    inflow_policy: InflowPolicy,
}

impl LiquidityManager {
    /// Create manager from configuration
    pub fn new(config: &LiquidityConfig) -> Self {
        let manager = Self {
            pools: DashMap::new(),
            reservations: DashMap::new(),
            reserves: DashMap::new(),
            emergency: DashMap::new(),
            rebalance_routes: config.rebalance_routes.clone(),
            inflow_policy: config.inflow_policy,
        };

        for pool in &config.pools {
            manager.add_pool(pool.clone());
        }

        manager
    }

    /// Register (or replace) a pool and its provisioning sources
    pub fn add_pool(&self, config: PoolConfig) {
        info!(
            "Liquidity pool {} opened with {} available",
            config.currency, config.initial_balance
        );
        self.reserves.insert(config.currency, config.internal_reserve);
        self.emergency.insert(config.currency, config.emergency_line);
        self.pools.insert(
            config.currency,
            Arc::new(Mutex::new(LiquidityPool::from_config(&config))),
        );
    }

    /// Whether a pool exists for the currency
    pub fn has_pool(&self, currency: Currency) -> bool {
        self.pools.contains_key(&currency)
    }

    /// Snapshot of a pool
    pub fn pool(&self, currency: Currency) -> Option<LiquidityPool> {
        self.pool_handle(currency).map(|p| p.lock().clone())
    }

    /// Currencies with a pool
    pub fn currencies(&self) -> Vec<Currency> {
        let mut currencies: Vec<Currency> = self.pools.iter().map(|e| *e.key()).collect();
        currencies.sort();
        currencies
    }

    /// Utilization per currency
    pub fn utilization(&self) -> HashMap<Currency, f64> {
        self.pools
            .iter()
            .map(|entry| (*entry.key(), entry.value().lock().utilization()))
            .collect()
    }

    /// Number of open reservations
    pub fn open_reservations(&self) -> usize {
        self.reservations.len()
    }

    fn pool_handle(&self, currency: Currency) -> Option<Arc<Mutex<LiquidityPool>>> {
        self.pools.get(&currency).map(|p| Arc::clone(p.value()))
    }

    fn counts_inflows(&self, pool: &LiquidityPool) -> bool {
        if pool.pending_inflows <= Decimal::ZERO {
            return false;
        }
        match self.inflow_policy {
            InflowPolicy::Exclude => false,
            InflowPolicy::Include => true,
            InflowPolicy::ConfirmedWithin { horizon_ms } => pool
                .inflow_confirmed_at
                .map(|at| Utc::now() - at <= Duration::milliseconds(horizon_ms as i64))
                .unwrap_or(false),
        }
    }

    fn headroom(&self, pool: &LiquidityPool) -> Decimal {
        if self.counts_inflows(pool) {
            pool.available_balance + pool.pending_inflows
        } else {
            pool.available_balance
        }
    }

    fn recommend(pool: &LiquidityPool, headroom: Decimal, required: Decimal) -> RecommendedAction {
        let after = headroom - required;
        if after < Decimal::ZERO {
            RecommendedAction::Emergency
        } else if after < pool.minimum_balance {
            RecommendedAction::Provision
        } else if after < pool.optimal_balance {
            RecommendedAction::Rebalance
        } else {
            RecommendedAction::None
        }
    }

    /// Check whether the request's pool can cover it
    pub fn check_liquidity(&self, request: &SettlementRequest) -> LiquidityCheck {
        let Some(handle) = self.pool_handle(request.currency) else {
            return LiquidityCheck {
                sufficient: false,
                available: Decimal::ZERO,
                required: request.amount,
                health_score: 0.0,
                recommended_action: RecommendedAction::Emergency,
            };
        };

        let pool = handle.lock();
        let available = self.headroom(&pool);

        LiquidityCheck {
            sufficient: available >= request.amount,
            available,
            required: request.amount,
            health_score: pool.health_score,
            recommended_action: Self::recommend(&pool, available, request.amount),
        }
    }

    /// Move `amount` from available to reserved
    pub fn reserve_liquidity(&self, currency: Currency, amount: Decimal) -> Result<ReservationId> {
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidRequest(format!(
                "Cannot reserve non-positive amount {}",
                amount
            )));
        }

        let handle = self.pool_handle(currency).ok_or(Error::InsufficientLiquidity {
            currency,
            required: amount,
            available: Decimal::ZERO,
        })?;

        let mut pool = handle.lock();
        let headroom = self.headroom(&pool);
        if headroom < amount {
            return Err(Error::InsufficientLiquidity {
                currency,
                required: amount,
                available: headroom,
            });
        }

        // Counted inflows are advanced into the pool only when needed
        if pool.available_balance < amount {
            let advance = amount - pool.available_balance;
            pool.pending_inflows -= advance;
            pool.available_balance += advance;
            pool.total_balance += advance;
            pool.funded_balance += advance;
            debug!("Advanced {} {} of pending inflows", advance, currency);
        }

        pool.available_balance -= amount;
        pool.reserved_balance += amount;
        pool.refresh_health();

        let reservation_id = ReservationId::new();
        self.reservations.insert(
            reservation_id,
            Reservation {
                reservation_id,
                currency,
                amount,
                created_at: Utc::now(),
            },
        );

        debug!("Reserved {} {} as {}", amount, currency, reservation_id);
        Ok(reservation_id)
    }

    /// Finalize a reservation: the reserved amount leaves the pool
    pub fn commit_liquidity(&self, reservation_id: ReservationId) -> Result<()> {
        let (_, reservation) = self
            .reservations
            .remove(&reservation_id)
            .ok_or_else(|| Error::ReservationNotFound(reservation_id.to_string()))?;

        let handle = self.pool_handle(reservation.currency).ok_or_else(|| {
            Error::InvalidState(format!("Pool {} vanished", reservation.currency))
        })?;

        let mut pool = handle.lock();
        pool.reserved_balance -= reservation.amount;
        pool.total_balance -= reservation.amount;
        pool.refresh_health();

        debug!("Committed {}", reservation_id);
        Ok(())
    }

    /// Undo a reservation: the reserved amount returns to available
    pub fn release_liquidity(&self, reservation_id: ReservationId) -> Result<()> {
        let (_, reservation) = self
            .reservations
            .remove(&reservation_id)
            .ok_or_else(|| Error::ReservationNotFound(reservation_id.to_string()))?;

        let handle = self.pool_handle(reservation.currency).ok_or_else(|| {
            Error::InvalidState(format!("Pool {} vanished", reservation.currency))
        })?;

        let mut pool = handle.lock();
        pool.reserved_balance -= reservation.amount;
        pool.available_balance += reservation.amount;
        pool.refresh_health();

        debug!("Released {}", reservation_id);
        Ok(())
    }

    /// Cover the request's shortfall from the first source able to
    pub fn provision_liquidity(&self, request: &SettlementRequest) -> Result<ProvisionOutcome> {
        let currency = request.currency;
        let handle = self.pool_handle(currency).ok_or(Error::InsufficientLiquidity {
            currency,
            required: request.amount,
            available: Decimal::ZERO,
        })?;

        let headroom = self.headroom(&handle.lock());
        let shortfall = request.amount - headroom;
        if shortfall <= Decimal::ZERO {
            return Ok(ProvisionOutcome {
                source: None,
                amount: Decimal::ZERO,
            });
        }

        for source in LiquiditySource::ORDER {
            let covered = match source {
                LiquiditySource::InternalReserve => Self::draw(&self.reserves, currency, shortfall),
                LiquiditySource::EmergencyPool => Self::draw(&self.emergency, currency, shortfall),
                LiquiditySource::CrossCurrencyRebalance => self.rebalance_into(currency, shortfall),
            };

            if covered {
                let mut pool = handle.lock();
                pool.available_balance += shortfall;
                pool.total_balance += shortfall;
                pool.funded_balance += shortfall;
                pool.refresh_health();

                info!(
                    "Provisioned {} {} from {:?} for request {}",
                    shortfall, currency, source, request.request_id
                );
                return Ok(ProvisionOutcome {
                    source: Some(source),
                    amount: shortfall,
                });
            }
        }

        warn!(
            "No liquidity source covers {} {} for request {}",
            shortfall, currency, request.request_id
        );
        Err(Error::InsufficientLiquidity {
            currency,
            required: request.amount,
            available: headroom,
        })
    }

    fn draw(source: &DashMap<Currency, Decimal>, currency: Currency, amount: Decimal) -> bool {
        match source.get_mut(&currency) {
            Some(mut balance) if *balance >= amount => {
                *balance -= amount;
                true
            }
            _ => false,
        }
    }

    /// Take surplus above optimal from another pool, converted at the route rate
    fn rebalance_into(&self, target: Currency, amount: Decimal) -> bool {
        for route in self.rebalance_routes.iter().filter(|r| r.to == target) {
            let Some(handle) = self.pool_handle(route.from) else {
                continue;
            };

            let needed = amount / route.rate;
            let mut source = handle.lock();
            let floor = source.optimal_balance.max(source.minimum_balance);
            let surplus = (source.available_balance - floor).max(Decimal::ZERO);
            if surplus < needed {
                continue;
            }

            source.available_balance -= needed;
            source.total_balance -= needed;
            source.funded_balance -= needed;
            source.last_rebalance = Some(Utc::now());
            source.refresh_health();

            info!(
                "Rebalanced {} {} into {} {} at {}",
                needed, route.from, amount, target, route.rate
            );
            return true;
        }
        false
    }

    fn ensure_positive(amount: Decimal) -> Result<()> {
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidRequest(format!(
                "Amount must be positive, got {}",
                amount
            )));
        }
        Ok(())
    }

    /// Add funds to a pool (treasury top-up)
    pub fn fund_pool(&self, currency: Currency, amount: Decimal) -> Result<()> {
        Self::ensure_positive(amount)?;
        let handle = self
            .pool_handle(currency)
            .ok_or_else(|| Error::InvalidRequest(format!("No pool for {}", currency)))?;
        let mut pool = handle.lock();
        pool.available_balance += amount;
        pool.total_balance += amount;
        pool.funded_balance += amount;
        pool.refresh_health();
        Ok(())
    }

    /// Announce an expected inflow
    pub fn record_pending_inflow(&self, currency: Currency, amount: Decimal) -> Result<()> {
        Self::ensure_positive(amount)?;
        let handle = self
            .pool_handle(currency)
            .ok_or_else(|| Error::InvalidRequest(format!("No pool for {}", currency)))?;
        handle.lock().pending_inflows += amount;
        Ok(())
    }

    /// Announce an expected outflow
    pub fn record_pending_outflow(&self, currency: Currency, amount: Decimal) -> Result<()> {
        Self::ensure_positive(amount)?;
        let handle = self
            .pool_handle(currency)
            .ok_or_else(|| Error::InvalidRequest(format!("No pool for {}", currency)))?;
        handle.lock().pending_outflows += amount;
        Ok(())
    }

    /// Mark the pending inflows as confirmed now
    pub fn confirm_pending_inflow(&self, currency: Currency) -> Result<()> {
        let handle = self
            .pool_handle(currency)
            .ok_or_else(|| Error::InvalidRequest(format!("No pool for {}", currency)))?;
        handle.lock().inflow_confirmed_at = Some(Utc::now());
        Ok(())
    }

    /// An announced inflow arrived; returns the amount moved into the pool
    pub fn settle_pending_inflow(&self, currency: Currency, amount: Decimal) -> Result<Decimal> {
        Self::ensure_positive(amount)?;
        let handle = self
            .pool_handle(currency)
            .ok_or_else(|| Error::InvalidRequest(format!("No pool for {}", currency)))?;
        let mut pool = handle.lock();
        let settled = amount.min(pool.pending_inflows);
        pool.pending_inflows -= settled;
        pool.available_balance += settled;
        pool.total_balance += settled;
        pool.funded_balance += settled;
        pool.refresh_health();
        Ok(settled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pool_config(currency: Currency, balance: Decimal) -> PoolConfig {
        PoolConfig {
            currency,
            initial_balance: balance,
            minimum_balance: Decimal::ZERO,
            optimal_balance: Decimal::ZERO,
            internal_reserve: Decimal::ZERO,
            emergency_line: Decimal::ZERO,
        }
    }

    fn manager_with(pools: Vec<PoolConfig>, policy: InflowPolicy) -> LiquidityManager {
        LiquidityManager::new(&LiquidityConfig {
            pools,
            rebalance_routes: Vec::new(),
            inflow_policy: policy,
        })
    }

    fn usd_request(amount: Decimal) -> SettlementRequest {
        SettlementRequest::new("X", "Y", amount, Currency::USD)
    }

    #[test]
    fn test_reserve_then_release_restores_available() {
        let manager = manager_with(vec![pool_config(Currency::USD, dec!(1000))], InflowPolicy::Exclude);

        let id = manager.reserve_liquidity(Currency::USD, dec!(100)).unwrap();
        let pool = manager.pool(Currency::USD).unwrap();
        assert_eq!(pool.available_balance, dec!(900));
        assert_eq!(pool.reserved_balance, dec!(100));

        manager.release_liquidity(id).unwrap();
        let pool = manager.pool(Currency::USD).unwrap();
        assert_eq!(pool.available_balance, dec!(1000));
        assert_eq!(pool.reserved_balance, Decimal::ZERO);
        assert_eq!(pool.total_balance, dec!(1000));
    }

    #[test]
    fn test_reserve_then_commit_reduces_total_once() {
        let manager = manager_with(vec![pool_config(Currency::USD, dec!(1000))], InflowPolicy::Exclude);

        let id = manager.reserve_liquidity(Currency::USD, dec!(100)).unwrap();
        manager.commit_liquidity(id).unwrap();

        let pool = manager.pool(Currency::USD).unwrap();
        assert_eq!(pool.available_balance, dec!(900));
        assert_eq!(pool.reserved_balance, Decimal::ZERO);
        assert_eq!(pool.total_balance, dec!(900));

        // Exactly once: neither a second commit nor a release is accepted
        assert!(matches!(
            manager.commit_liquidity(id),
            Err(Error::ReservationNotFound(_))
        ));
        assert!(manager.release_liquidity(id).is_err());
        assert_eq!(manager.pool(Currency::USD).unwrap().available_balance, dec!(900));
    }

    #[test]
    fn test_insufficient_reservation() {
        let manager = manager_with(vec![pool_config(Currency::USD, dec!(50))], InflowPolicy::Exclude);

        let err = manager.reserve_liquidity(Currency::USD, dec!(100)).unwrap_err();
        assert!(matches!(err, Error::InsufficientLiquidity { .. }));
        assert_eq!(manager.open_reservations(), 0);

        let check = manager.check_liquidity(&usd_request(dec!(100)));
        assert!(!check.sufficient);
        assert_eq!(check.available, dec!(50));
        assert_eq!(check.recommended_action, RecommendedAction::Emergency);
    }

    #[test]
    fn test_unknown_pool() {
        let manager = manager_with(vec![], InflowPolicy::Exclude);
        let check = manager.check_liquidity(&usd_request(dec!(1)));
        assert!(!check.sufficient);
        assert!(manager.reserve_liquidity(Currency::USD, dec!(1)).is_err());
    }

    #[test]
    fn test_provisioning_sources_in_order() {
        let mut usd = pool_config(Currency::USD, dec!(50));
        usd.internal_reserve = dec!(30);
        usd.emergency_line = dec!(100);
        let manager = manager_with(vec![usd], InflowPolicy::Exclude);

        // Shortfall of 50 exceeds the reserve (30), so the emergency line covers it
        let outcome = manager.provision_liquidity(&usd_request(dec!(100))).unwrap();
        assert_eq!(outcome.source, Some(LiquiditySource::EmergencyPool));
        assert_eq!(outcome.amount, dec!(50));
        assert_eq!(manager.pool(Currency::USD).unwrap().available_balance, dec!(100));

        // Reserve covers a small shortfall next time
        manager.reserve_liquidity(Currency::USD, dec!(100)).unwrap();
        let outcome = manager.provision_liquidity(&usd_request(dec!(20))).unwrap();
        assert_eq!(outcome.source, Some(LiquiditySource::InternalReserve));
    }

    #[test]
    fn test_provisioning_without_sources_fails() {
        let manager = manager_with(vec![pool_config(Currency::USD, dec!(50))], InflowPolicy::Exclude);
        let err = manager.provision_liquidity(&usd_request(dec!(100))).unwrap_err();
        assert!(matches!(err, Error::InsufficientLiquidity { .. }));
        assert_eq!(manager.pool(Currency::USD).unwrap().available_balance, dec!(50));
    }

    #[test]
    fn test_cross_currency_rebalance() {
        let mut eur = pool_config(Currency::EUR, dec!(1000));
        eur.optimal_balance = dec!(500);
        let manager = LiquidityManager::new(&LiquidityConfig {
            pools: vec![pool_config(Currency::USD, Decimal::ZERO), eur],
            rebalance_routes: vec![RebalanceRouteConfig {
                from: Currency::EUR,
                to: Currency::USD,
                rate: dec!(2),
            }],
            inflow_policy: InflowPolicy::Exclude,
        });

        let outcome = manager.provision_liquidity(&usd_request(dec!(200))).unwrap();
        assert_eq!(outcome.source, Some(LiquiditySource::CrossCurrencyRebalance));
        assert_eq!(manager.pool(Currency::USD).unwrap().available_balance, dec!(200));
        assert_eq!(manager.pool(Currency::EUR).unwrap().available_balance, dec!(900));

        // Surplus above optimal is only 400 EUR now = 800 USD
        assert!(manager.provision_liquidity(&usd_request(dec!(2000))).is_err());
    }

    #[test]
    fn test_confirmed_inflows_count_and_advance() {
        let manager = manager_with(
            vec![pool_config(Currency::USD, dec!(50))],
            InflowPolicy::ConfirmedWithin { horizon_ms: 60_000 },
        );
        manager.record_pending_inflow(Currency::USD, dec!(100)).unwrap();

        // Unconfirmed inflows do not count
        assert!(!manager.check_liquidity(&usd_request(dec!(120))).sufficient);

        manager.confirm_pending_inflow(Currency::USD).unwrap();
        let check = manager.check_liquidity(&usd_request(dec!(120)));
        assert!(check.sufficient);
        assert_eq!(check.available, dec!(150));

        manager.reserve_liquidity(Currency::USD, dec!(120)).unwrap();
        let pool = manager.pool(Currency::USD).unwrap();
        assert_eq!(pool.available_balance, Decimal::ZERO);
        assert_eq!(pool.pending_inflows, dec!(30));
        assert_eq!(pool.reserved_balance, dec!(120));
        assert_eq!(pool.total_balance, dec!(120));
    }

    #[test]
    fn test_settle_pending_inflow() {
        let manager = manager_with(vec![pool_config(Currency::INR, dec!(10))], InflowPolicy::Exclude);
        manager.record_pending_inflow(Currency::INR, dec!(40)).unwrap();

        let settled = manager.settle_pending_inflow(Currency::INR, dec!(100)).unwrap();
        assert_eq!(settled, dec!(40));

        let pool = manager.pool(Currency::INR).unwrap();
        assert_eq!(pool.available_balance, dec!(50));
        assert_eq!(pool.pending_inflows, Decimal::ZERO);
    }

    #[test]
    fn test_health_and_utilization() {
        let mut usd = pool_config(Currency::USD, dec!(1000));
        usd.optimal_balance = dec!(2000);
        usd.minimum_balance = dec!(500);
        let manager = manager_with(vec![usd], InflowPolicy::Exclude);

        let pool = manager.pool(Currency::USD).unwrap();
        assert!((pool.health_score - 0.5).abs() < f64::EPSILON);

        let check = manager.check_liquidity(&usd_request(dec!(600)));
        assert_eq!(check.recommended_action, RecommendedAction::Provision);

        let id = manager.reserve_liquidity(Currency::USD, dec!(250)).unwrap();
        let utilization = manager.utilization()[&Currency::USD];
        assert!((utilization - 0.25).abs() < 1e-9);

        // Spent liquidity still counts once the reservation commits
        manager.commit_liquidity(id).unwrap();
        let utilization = manager.utilization()[&Currency::USD];
        assert!((utilization - 0.25).abs() < 1e-9);

        manager.fund_pool(Currency::USD, dec!(250)).unwrap();
        let utilization = manager.utilization()[&Currency::USD];
        assert!((utilization - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_non_positive_amounts_rejected() {
        let manager = manager_with(vec![pool_config(Currency::USD, dec!(100))], InflowPolicy::Include);

        for amount in [Decimal::ZERO, dec!(-500)] {
            assert!(matches!(
                manager.fund_pool(Currency::USD, amount),
                Err(Error::InvalidRequest(_))
            ));
            assert!(matches!(
                manager.record_pending_inflow(Currency::USD, amount),
                Err(Error::InvalidRequest(_))
            ));
            assert!(manager.record_pending_outflow(Currency::USD, amount).is_err());
            assert!(manager.settle_pending_inflow(Currency::USD, amount).is_err());
        }

        let pool = manager.pool(Currency::USD).unwrap();
        assert_eq!(pool.available_balance, dec!(100));
        assert_eq!(pool.total_balance, dec!(100));
        assert_eq!(pool.pending_inflows, Decimal::ZERO);
    }
}

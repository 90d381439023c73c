//! Configuration for settlement engine

use crate::types::Currency;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Settlement engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service identity
    pub service: ServiceConfig,

    /// Orchestrator configuration
    pub engine: EngineConfig,

    /// Liquidity pools and provisioning sources
    pub liquidity: LiquidityConfig,

    /// Netting cycle policy
    pub netting: NettingConfig,

    /// Recovery, retry and circuit breaking
    pub failover: FailoverConfig,

    /// Scheduling hints
    pub optimizer: OptimizerConfig,
}

/// Service identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Interval of the maintenance loop (cycle ageing, queue draining)
    pub maintenance_interval_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: "settlement-engine".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            maintenance_interval_ms: 1_000,
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Settlements processed concurrently before backpressure kicks in
    pub processing_capacity: usize,

    /// Deadline for a queued request (milliseconds)
    pub processing_deadline_ms: u64,

    /// Maximum queued requests
    pub queue_capacity: usize,

    /// Concurrent groups in a batch run
    pub batch_workers: usize,

    /// Lock acquisition budget (milliseconds)
    pub lock_timeout_ms: u64,

    /// Event channel capacity (oldest events are dropped when full)
    pub event_channel_capacity: usize,

    /// Terminal results kept for lookup; older ones are pruned by maintenance
    pub result_retention: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            processing_capacity: 1_000,
            processing_deadline_ms: 30_000,
            queue_capacity: 100_000,
            batch_workers: 4,
            lock_timeout_ms: 5_000,
            event_channel_capacity: 1_024,
            result_retention: 100_000,
        }
    }
}

/// Liquidity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiquidityConfig {
    /// Pools created at startup
    pub pools: Vec<PoolConfig>,

    /// Cross-currency rebalancing routes
    pub rebalance_routes: Vec<RebalanceRouteConfig>,

    /// Whether pending inflows count towards available liquidity
    pub inflow_policy: InflowPolicy,
}

impl Default for LiquidityConfig {
    fn default() -> Self {
        Self {
            pools: Vec::new(),
            rebalance_routes: Vec::new(),
            inflow_policy: InflowPolicy::ConfirmedWithin { horizon_ms: 60_000 },
        }
    }
}

/// One liquidity pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Pool currency
    pub currency: Currency,

    /// Opening balance
    pub initial_balance: Decimal,

    /// Balance below which provisioning is recommended
    #[serde(default)]
    pub minimum_balance: Decimal,

    /// Target balance
    #[serde(default)]
    pub optimal_balance: Decimal,

    /// Internal reserve available to top up the pool
    #[serde(default)]
    pub internal_reserve: Decimal,

    /// Emergency credit line
    #[serde(default)]
    pub emergency_line: Decimal,
}

/// Cross-currency rebalancing route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceRouteConfig {
    /// Pool giving up surplus
    pub from: Currency,

    /// Pool receiving liquidity
    pub to: Currency,

    /// Units of `to` per unit of `from`
    pub rate: Decimal,
}

/// Pending-inflow inclusion policy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum InflowPolicy {
    /// Never count pending inflows
    Exclude,
    /// Always count pending inflows
    Include,
    /// Count pending inflows confirmed within the horizon
    ConfirmedWithin {
        /// Confirmation horizon (milliseconds)
        horizon_ms: u64,
    },
}

/// Netting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NettingConfig {
    /// Default hub account net positions settle against
    pub hub_account: String,

    /// Per-group hub overrides
    pub group_hubs: Vec<GroupHubConfig>,

    /// Close a cycle once it holds this many members
    pub max_members: usize,

    /// Close a cycle once it is this old (milliseconds)
    pub max_cycle_age_ms: u64,

    /// Pay hub → participant for negative positions
    pub settle_receivables: bool,

    /// Completed cycles kept for inspection
    pub archive_size: usize,
}

impl Default for NettingConfig {
    fn default() -> Self {
        Self {
            hub_account: "NETTING-HUB".to_string(),
            group_hubs: Vec::new(),
            max_members: 50,
            max_cycle_age_ms: 60_000,
            settle_receivables: false,
            archive_size: 256,
        }
    }
}

impl NettingConfig {
    /// Hub account for a netting group (override, else the default hub)
    pub fn hub_for_group(&self, group: &str) -> String {
        self.group_hubs
            .iter()
            .find(|h| h.group == group)
            .map(|h| h.hub_account.clone())
            .unwrap_or_else(|| self.hub_account.clone())
    }
}

/// Hub override for one netting group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupHubConfig {
    /// Netting group
    pub group: String,

    /// Hub account
    pub hub_account: String,
}

/// Failover configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// First backoff delay (milliseconds)
    pub base_backoff_ms: u64,

    /// Backoff cap (milliseconds)
    pub max_backoff_ms: u64,

    /// Randomise backoff delays
    pub jitter: bool,

    /// Circuit breaker policy per dependency
    pub circuit_breaker: CircuitBreakerConfig,

    /// Fallback routes per currency, tried in order
    pub fallback_routes: Vec<FallbackRouteConfig>,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff_ms: 50,
            max_backoff_ms: 2_000,
            jitter: true,
            circuit_breaker: CircuitBreakerConfig::default(),
            fallback_routes: Vec::new(),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,

    /// Cool-down before half-opening (milliseconds)
    pub cooldown_ms: u64,

    /// Successful probes before closing again
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 30_000,
            success_threshold: 2,
        }
    }
}

/// Fallback routes for one currency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackRouteConfig {
    /// Currency
    pub currency: Currency,

    /// Route names, in preference order
    pub routes: Vec<String>,
}

/// Optimizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Routing cache entry lifetime (milliseconds)
    pub cache_ttl_ms: u64,

    /// Routing cache size bound
    pub cache_capacity: usize,

    /// Load ratio up to which the standard path is used
    pub moderate_load: f64,

    /// Parallelism granted to the fast path
    pub max_parallelism: usize,

    /// Smallest batch handed to the batch path
    pub min_batch_size: usize,

    /// Largest batch handed to the batch path
    pub max_batch_size: usize,

    /// Load ratio from which admissions are rate limited
    pub saturation_threshold: f64,

    /// Smallest rate-limit delay (milliseconds)
    pub min_rate_limit_delay_ms: u64,

    /// Largest rate-limit delay (milliseconds)
    pub max_rate_limit_delay_ms: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 5_000,
            cache_capacity: 10_000,
            moderate_load: 0.7,
            max_parallelism: 8,
            min_batch_size: 10,
            max_batch_size: 500,
            saturation_threshold: 0.9,
            min_rate_limit_delay_ms: 1,
            max_rate_limit_delay_ms: 250,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(capacity) = std::env::var("SETTLEMENT_PROCESSING_CAPACITY") {
            config.engine.processing_capacity =
                parse_env("SETTLEMENT_PROCESSING_CAPACITY", &capacity)?;
        }

        if let Ok(deadline) = std::env::var("SETTLEMENT_DEADLINE_MS") {
            config.engine.processing_deadline_ms =
                parse_env("SETTLEMENT_DEADLINE_MS", &deadline)?;
        }

        if let Ok(workers) = std::env::var("SETTLEMENT_BATCH_WORKERS") {
            config.engine.batch_workers = parse_env("SETTLEMENT_BATCH_WORKERS", &workers)?;
        }

        if let Ok(hub) = std::env::var("SETTLEMENT_HUB_ACCOUNT") {
            config.netting.hub_account = hub;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject inconsistent settings
    pub fn validate(&self) -> crate::Result<()> {
        let invalid = |msg: &str| Err(crate::Error::Config(msg.to_string()));

        if self.engine.processing_capacity == 0 {
            return invalid("engine.processing_capacity must be at least 1");
        }
        if self.engine.batch_workers == 0 {
            return invalid("engine.batch_workers must be at least 1");
        }
        if self.engine.event_channel_capacity == 0 {
            return invalid("engine.event_channel_capacity must be at least 1");
        }
        if self.netting.hub_account.trim().is_empty() {
            return invalid("netting.hub_account must not be blank");
        }
        if self.netting.max_members == 0 {
            return invalid("netting.max_members must be at least 1");
        }
        if self.failover.circuit_breaker.failure_threshold == 0 {
            return invalid("failover.circuit_breaker.failure_threshold must be at least 1");
        }
        if self.failover.base_backoff_ms > self.failover.max_backoff_ms {
            return invalid("failover.base_backoff_ms exceeds failover.max_backoff_ms");
        }
        if !(0.0..=1.0).contains(&self.optimizer.moderate_load)
            || !(0.0..=1.0).contains(&self.optimizer.saturation_threshold)
        {
            return invalid("optimizer load thresholds must be within 0.0..=1.0");
        }
        if self.optimizer.min_batch_size == 0
            || self.optimizer.min_batch_size > self.optimizer.max_batch_size
        {
            return invalid("optimizer batch size bounds are inconsistent");
        }
        if self.optimizer.min_rate_limit_delay_ms > self.optimizer.max_rate_limit_delay_ms {
            return invalid(
                "optimizer.min_rate_limit_delay_ms exceeds optimizer.max_rate_limit_delay_ms",
            );
        }
        if self.optimizer.max_parallelism == 0 {
            return invalid("optimizer.max_parallelism must be at least 1");
        }
        if self.engine.result_retention == 0 {
            return invalid("engine.result_retention must be at least 1");
        }
        for pool in &self.liquidity.pools {
            if pool.initial_balance < Decimal::ZERO {
                return Err(crate::Error::Config(format!(
                    "pool {} has a negative initial balance",
                    pool.currency
                )));
            }
        }
        for route in &self.liquidity.rebalance_routes {
            if route.rate <= Decimal::ZERO || route.from == route.to {
                return Err(crate::Error::Config(format!(
                    "rebalance route {} -> {} is invalid",
                    route.from, route.to
                )));
            }
        }

        Ok(())
    }

    /// Hub account for a netting group
    pub fn hub_for_group(&self, group: &str) -> String {
        self.netting.hub_for_group(group)
    }

    /// Fallback routes for a currency
    pub fn fallback_routes(&self, currency: Currency) -> Vec<String> {
        self.failover
            .fallback_routes
            .iter()
            .filter(|r| r.currency == currency)
            .flat_map(|r| r.routes.iter().cloned())
            .collect()
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> crate::Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| crate::Error::Config(format!("{} has invalid value '{}'", name, value)))
}

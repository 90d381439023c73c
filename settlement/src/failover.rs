//! Failure detection, circuit breaking and recovery
//!
//! Recovery is chosen per [`FailureKind`]:
//!
//! | Failure                 | Strategy                               |
//! |-------------------------|----------------------------------------|
//! | InvalidRequest          | give up                                |
//! | InsufficientLiquidity   | give up (provisioning already tried)   |
//! | ComplianceFailure       | give up                                |
//! | TechnicalFailure        | retry with exponential backoff         |
//! | NetworkFailure          | retry with exponential backoff         |
//! | CounterpartyFailure     | reroute over fallback routes           |

use crate::{
    config::{CircuitBreakerConfig, FailoverConfig},
    types::{Currency, FailureKind, SettlementRequest},
    Error, Result,
};
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Dependency name of the account ledger
pub const LEDGER_DEPENDENCY: &str = "ledger";

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Closed (normal operation)
    Closed,
    /// Open (failing fast)
    Open,
    /// Half-open (probing)
    HalfOpen,
}

/// Circuit breaker for one dependency
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: CircuitState,
    /// Consecutive failures
    failure_count: u32,
    /// Successful probes while half-open
    success_count: u32,
    opened_at: Option<Instant>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create new circuit breaker
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
            config,
        }
    }

    /// Check if a call is allowed
    pub fn is_request_allowed(&mut self, dependency: &str) -> Result<()> {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let cooldown = Duration::from_millis(self.config.cooldown_ms);
                let elapsed = self.opened_at.map(|at| at.elapsed()).unwrap_or_default();

                if elapsed >= cooldown {
                    info!("Circuit breaker half-opening for {}", dependency);
                    self.state = CircuitState::HalfOpen;
                    self.success_count = 0;
                    Ok(())
                } else {
                    Err(Error::CircuitOpen {
                        dependency: dependency.to_string(),
                        reason: format!("retry in {}ms", (cooldown - elapsed).as_millis()),
                    })
                }
            }
        }
    }

    /// Record success
    pub fn record_success(&mut self, dependency: &str) {
        match self.state {
            CircuitState::Closed => self.failure_count = 0,
            CircuitState::HalfOpen => {
                self.success_count += 1;
                if self.success_count >= self.config.success_threshold {
                    info!("Circuit breaker closing for {}", dependency);
                    self.state = CircuitState::Closed;
                    self.failure_count = 0;
                    self.success_count = 0;
                    self.opened_at = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record failure
    pub fn record_failure(&mut self, dependency: &str) {
        self.failure_count += 1;

        match self.state {
            CircuitState::Closed => {
                if self.failure_count >= self.config.failure_threshold {
                    warn!(
                        "Circuit breaker opening for {} after {} failures",
                        dependency, self.failure_count
                    );
                    self.state = CircuitState::Open;
                    self.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                warn!("Circuit breaker re-opening for {}", dependency);
                self.state = CircuitState::Open;
                self.success_count = 0;
                self.opened_at = Some(Instant::now());
            }
            CircuitState::Open => {}
        }
    }

    /// Current state
    pub fn state(&self) -> CircuitState {
        self.state
    }
}

/// Circuit breakers keyed by dependency
#[derive(Debug)]
pub struct CircuitBreakers {
    breakers: DashMap<String, CircuitBreaker>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakers {
    /// Create registry; breakers are created on first use
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    /// Fail fast if the dependency's breaker is open
    pub fn check(&self, dependency: &str) -> Result<()> {
        self.breakers
            .entry(dependency.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.config.clone()))
            .is_request_allowed(dependency)
    }

    /// Record a successful call
    pub fn record_success(&self, dependency: &str) {
        if let Some(mut breaker) = self.breakers.get_mut(dependency) {
            breaker.record_success(dependency);
        }
    }

    /// Record a failed call
    pub fn record_failure(&self, dependency: &str) {
        self.breakers
            .entry(dependency.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.config.clone()))
            .record_failure(dependency);
    }

    /// State of a dependency (Closed if never used)
    pub fn state(&self, dependency: &str) -> CircuitState {
        self.breakers
            .get(dependency)
            .map(|b| b.state())
            .unwrap_or(CircuitState::Closed)
    }

    /// Manually close a breaker
    pub fn reset(&self, dependency: &str) {
        info!("Manually resetting circuit breaker for {}", dependency);
        self.breakers.remove(dependency);
    }
}

/// Failure counts per kind
#[derive(Debug, Default)]
pub struct FailureDetector {
    counts: DashMap<FailureKind, u64>,
}

impl FailureDetector {
    /// Record one failure
    pub fn record(&self, kind: FailureKind) {
        *self.counts.entry(kind).or_insert(0) += 1;
    }

    /// Failures seen of one kind
    pub fn count(&self, kind: FailureKind) -> u64 {
        self.counts.get(&kind).map(|c| *c).unwrap_or(0)
    }

    /// All counts
    pub fn counts(&self) -> HashMap<FailureKind, u64> {
        self.counts.iter().map(|e| (*e.key(), *e.value())).collect()
    }
}

/// Exponential backoff with optional jitter
#[derive(Debug, Clone)]
pub struct RetryManager {
    max_retries: u32,
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl RetryManager {
    /// Create from failover configuration
    pub fn new(config: &FailoverConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base: Duration::from_millis(config.base_backoff_ms),
            max: Duration::from_millis(config.max_backoff_ms),
            jitter: config.jitter,
        }
    }

    /// Retries allowed after the first attempt
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `retry` (0-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(16));
        let delay = self.base.saturating_mul(factor).min(self.max);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        // Uniform in [delay / 2, delay]
        let half = delay / 2;
        let spread = rand::thread_rng().gen_range(0..=half.as_micros() as u64);
        half + Duration::from_micros(spread)
    }
}

/// Recovery strategy, dispatched by failure kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Return the failure as terminal
    GiveUp,
    /// Re-run the settlement after a backoff
    Retry {
        /// Retries after the first attempt
        max_retries: u32,
    },
    /// Re-run the settlement on each fallback route's ledger in turn
    Reroute {
        /// Route names, in preference order
        routes: Vec<String>,
    },
}

/// Outcome of a recovery attempt
#[derive(Debug)]
pub struct Recovery<T> {
    /// Strategy applied
    pub strategy: RecoveryStrategy,

    /// Final value or the last error
    pub outcome: Result<T>,

    /// Extra attempts made
    pub attempts: u32,

    /// Route that succeeded
    pub route: Option<String>,
}

/// Failover manager
#[derive(Debug)]
pub struct FailoverManager {
    breakers: CircuitBreakers,
    detector: FailureDetector,
    retry: RetryManager,
    config: FailoverConfig,
}

impl FailoverManager {
    /// Create from configuration
    pub fn new(config: FailoverConfig) -> Self {
        Self {
            breakers: CircuitBreakers::new(config.circuit_breaker.clone()),
            detector: FailureDetector::default(),
            retry: RetryManager::new(&config),
            config,
        }
    }

    /// Circuit breakers
    pub fn breakers(&self) -> &CircuitBreakers {
        &self.breakers
    }

    /// Failure counts
    pub fn detector(&self) -> &FailureDetector {
        &self.detector
    }

    /// Fallback routes for a currency
    pub fn fallback_routes(&self, currency: Currency) -> Vec<String> {
        self.config
            .fallback_routes
            .iter()
            .filter(|r| r.currency == currency)
            .flat_map(|r| r.routes.iter().cloned())
            .collect()
    }

    /// Strategy for a failure kind
    pub fn strategy_for(&self, kind: FailureKind, currency: Currency) -> RecoveryStrategy {
        match kind {
            FailureKind::InvalidRequest
            | FailureKind::InsufficientLiquidity
            | FailureKind::ComplianceFailure => RecoveryStrategy::GiveUp,
            FailureKind::TechnicalFailure | FailureKind::NetworkFailure => {
                RecoveryStrategy::Retry {
                    max_retries: self.retry.max_retries(),
                }
            }
            FailureKind::CounterpartyFailure => {
                let routes = self.fallback_routes(currency);
                if routes.is_empty() {
                    RecoveryStrategy::GiveUp
                } else {
                    RecoveryStrategy::Reroute { routes }
                }
            }
        }
    }

    /// Recover from `failure` by re-running `attempt` per the strategy
    ///
    /// `attempt` receives the fallback route to use (`None` for the primary).
    pub async fn attempt_recovery<T, F, Fut>(
        &self,
        request: &SettlementRequest,
        failure: Error,
        mut attempt: F,
    ) -> Recovery<T>
    where
        F: FnMut(Option<String>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let kind = failure.kind();
        self.detector.record(kind);
        let strategy = self.strategy_for(kind, request.currency);

        match &strategy {
            RecoveryStrategy::GiveUp => Recovery {
                strategy,
                outcome: Err(failure),
                attempts: 0,
                route: None,
            },

            RecoveryStrategy::Retry { max_retries } => {
                let max_retries = *max_retries;
                let mut last = failure;
                let mut attempts = 0;

                for retry in 0..max_retries {
                    if let Err(open) = self.breakers.check(LEDGER_DEPENDENCY) {
                        last = open;
                        break;
                    }

                    tokio::time::sleep(self.retry.backoff(retry)).await;
                    attempts += 1;
                    warn!(
                        "Retrying request {} (attempt {}/{}) after {}",
                        request.request_id, attempts, max_retries, last
                    );

                    match attempt(None).await {
                        Ok(value) => {
                            return Recovery {
                                strategy,
                                outcome: Ok(value),
                                attempts,
                                route: None,
                            }
                        }
                        Err(e) if matches!(
                            e.kind(),
                            FailureKind::TechnicalFailure | FailureKind::NetworkFailure
                        ) =>
                        {
                            self.detector.record(e.kind());
                            last = e;
                        }
                        Err(e) => {
                            self.detector.record(e.kind());
                            last = e;
                            break;
                        }
                    }
                }

                Recovery {
                    strategy,
                    outcome: Err(last),
                    attempts,
                    route: None,
                }
            }

            RecoveryStrategy::Reroute { routes } => {
                let routes = routes.clone();
                let mut last = failure;
                let mut attempts = 0;

                for route in routes {
                    let dependency = format!("route:{}", route);
                    if let Err(open) = self.breakers.check(&dependency) {
                        last = open;
                        continue;
                    }

                    attempts += 1;
                    warn!(
                        "Rerouting request {} over {} after {}",
                        request.request_id, route, last
                    );

                    match attempt(Some(route.clone())).await {
                        Ok(value) => {
                            self.breakers.record_success(&dependency);
                            return Recovery {
                                strategy,
                                outcome: Ok(value),
                                attempts,
                                route: Some(route),
                            };
                        }
                        Err(e) => {
                            self.breakers.record_failure(&dependency);
                            self.detector.record(e.kind());
                            last = e;
                        }
                    }
                }

                Recovery {
                    strategy,
                    outcome: Err(last),
                    attempts,
                    route: None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FallbackRouteConfig;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config() -> FailoverConfig {
        FailoverConfig {
            max_retries: 3,
            base_backoff_ms: 1,
            max_backoff_ms: 4,
            jitter: false,
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 2,
                cooldown_ms: 60_000,
                success_threshold: 1,
            },
            fallback_routes: vec![FallbackRouteConfig {
                currency: Currency::EUR,
                routes: vec!["TARGET2".into(), "SWIFT".into()],
            }],
        }
    }

    fn request(currency: Currency) -> SettlementRequest {
        SettlementRequest::new("X", "Y", dec!(10), currency)
    }

    #[test]
    fn test_circuit_breaker_transitions() {
        let mut cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            cooldown_ms: 0,
            success_threshold: 2,
        });

        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure("ledger");
        cb.record_failure("ledger");
        cb.record_failure("ledger");
        assert_eq!(cb.state(), CircuitState::Open);

        // Zero cool-down: next check half-opens
        assert!(cb.is_request_allowed("ledger").is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success("ledger");
        cb.record_success("ledger");
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_open_breaker_fails_fast() {
        let breakers = CircuitBreakers::new(config().circuit_breaker);
        breakers.record_failure("ledger");
        breakers.record_failure("ledger");

        assert_eq!(breakers.state("ledger"), CircuitState::Open);
        assert!(matches!(
            breakers.check("ledger"),
            Err(Error::CircuitOpen { .. })
        ));
        assert!(breakers.check("other").is_ok());

        breakers.reset("ledger");
        assert!(breakers.check("ledger").is_ok());
    }

    #[test]
    fn test_backoff_is_capped() {
        let retry = RetryManager::new(&config());
        assert_eq!(retry.backoff(0), Duration::from_millis(1));
        assert_eq!(retry.backoff(1), Duration::from_millis(2));
        assert_eq!(retry.backoff(10), Duration::from_millis(4));

        let jittered = RetryManager::new(&FailoverConfig {
            jitter: true,
            ..config()
        });
        let delay = jittered.backoff(2);
        assert!(delay >= Duration::from_millis(2) && delay <= Duration::from_millis(4));
    }

    #[test]
    fn test_strategy_selection() {
        let manager = FailoverManager::new(config());
        assert_eq!(
            manager.strategy_for(FailureKind::ComplianceFailure, Currency::USD),
            RecoveryStrategy::GiveUp
        );
        assert_eq!(
            manager.strategy_for(FailureKind::NetworkFailure, Currency::USD),
            RecoveryStrategy::Retry { max_retries: 3 }
        );
        assert_eq!(
            manager.strategy_for(FailureKind::CounterpartyFailure, Currency::USD),
            RecoveryStrategy::GiveUp
        );
        assert!(matches!(
            manager.strategy_for(FailureKind::CounterpartyFailure, Currency::EUR),
            RecoveryStrategy::Reroute { .. }
        ));
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let manager = FailoverManager::new(config());
        let calls = AtomicU32::new(0);

        let recovery = manager
            .attempt_recovery(
                &request(Currency::USD),
                Error::Technical("flaky".into()),
                |_| {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            Err(Error::Network("still down".into()))
                        } else {
                            Ok(n)
                        }
                    }
                },
            )
            .await;

        assert_eq!(recovery.outcome.unwrap(), 1);
        assert_eq!(recovery.attempts, 2);
        assert_eq!(manager.detector().count(FailureKind::TechnicalFailure), 1);
        assert_eq!(manager.detector().count(FailureKind::NetworkFailure), 1);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_budget() {
        let manager = FailoverManager::new(config());

        let recovery: Recovery<()> = manager
            .attempt_recovery(
                &request(Currency::USD),
                Error::Technical("down".into()),
                |_| async { Err(Error::Technical("down".into())) },
            )
            .await;

        assert!(recovery.outcome.is_err());
        assert_eq!(recovery.attempts, 3);
    }

    #[tokio::test]
    async fn test_retry_stops_when_ledger_breaker_open() {
        let manager = FailoverManager::new(config());
        manager.breakers().record_failure(LEDGER_DEPENDENCY);
        manager.breakers().record_failure(LEDGER_DEPENDENCY);

        let recovery: Recovery<()> = manager
            .attempt_recovery(
                &request(Currency::USD),
                Error::Technical("down".into()),
                |_| async { Ok(()) },
            )
            .await;

        assert!(matches!(recovery.outcome, Err(Error::CircuitOpen { .. })));
        assert_eq!(recovery.attempts, 0);
    }

    #[tokio::test]
    async fn test_reroute_over_fallbacks() {
        let manager = FailoverManager::new(config());

        let recovery = manager
            .attempt_recovery(
                &request(Currency::EUR),
                Error::Counterparty("refused".into()),
                |route| async move {
                    match route.as_deref() {
                        Some("SWIFT") => Ok("settled"),
                        _ => Err(Error::Counterparty("refused".into())),
                    }
                },
            )
            .await;

        assert_eq!(recovery.outcome.unwrap(), "settled");
        assert_eq!(recovery.route.as_deref(), Some("SWIFT"));
        assert_eq!(recovery.attempts, 2);
    }

    #[tokio::test]
    async fn test_give_up_is_terminal() {
        let manager = FailoverManager::new(config());
        let recovery: Recovery<()> = manager
            .attempt_recovery(
                &request(Currency::USD),
                Error::Compliance("blocked".into()),
                |_| async { Err(Error::Other("must not re-run".into())) },
            )
            .await;

        assert_eq!(recovery.strategy, RecoveryStrategy::GiveUp);
        assert_eq!(recovery.attempts, 0);
        assert!(matches!(recovery.outcome, Err(Error::Compliance(_))));
    }
}

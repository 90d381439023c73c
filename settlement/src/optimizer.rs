//! Scheduling hints
//!
//! The optimizer picks a processing path and parallelism for a request and
//! slows admissions down near saturation. It never changes the outcome of a
//! settlement, only when and how wide it runs.

use crate::{
    config::OptimizerConfig,
    types::{Currency, ProcessingPath, SettlementPriority, SettlementRequest, SettlementType},
};
use dashmap::DashMap;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Weight of the newest sample in the latency average
const LATENCY_EWMA_ALPHA: f64 = 0.2;

/// Cache key for similar settlements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteFingerprint {
    /// Settlement type
    pub settlement_type: SettlementType,
    /// Priority
    pub priority: SettlementPriority,
    /// Currency
    pub currency: Currency,
    /// Digits in the integer part of the amount
    pub amount_band: u32,
}

impl RouteFingerprint {
    /// Fingerprint of a request
    pub fn of(request: &SettlementRequest) -> Self {
        let units = request.amount.trunc().abs().to_u128().unwrap_or(u128::MAX);
        let amount_band = if units == 0 { 0 } else { units.ilog10() + 1 };
        Self {
            settlement_type: request.settlement_type,
            priority: request.priority,
            currency: request.currency,
            amount_band,
        }
    }
}

/// Scheduling decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationDecision {
    /// Path
    pub path: ProcessingPath,
    /// Concurrent settlements allowed on the path
    pub parallelism: usize,
    /// Batch size (batch path only)
    pub batch_size: Option<usize>,
    /// Delay to apply before dispatch
    pub rate_limit_delay: Duration,
    /// Decision came from the cache
    pub cache_hit: bool,
}

#[derive(Debug, Clone)]
struct CachedRoute {
    path: ProcessingPath,
    parallelism: usize,
    batch_size: Option<usize>,
    cached_at: Instant,
}

/// Performance optimizer
#[derive(Debug)]
pub struct PerformanceOptimizer {
    config: OptimizerConfig,
    cache: DashMap<RouteFingerprint, CachedRoute>,
    /// f64 bits of the latency average (milliseconds)
    latency_ewma: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PerformanceOptimizer {
    /// Create optimizer
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            config,
            cache: DashMap::new(),
            latency_ewma: AtomicU64::new(0f64.to_bits()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Choose a path for `request` at the given load ratio (0.0 - 1.0)
    pub fn optimize_settlement(&self, request: &SettlementRequest, load: f64) -> OptimizationDecision {
        let fingerprint = RouteFingerprint::of(request);
        let ttl = Duration::from_millis(self.config.cache_ttl_ms);
        let rate_limit_delay = self.rate_limit_delay(load);

        if let Some(cached) = self.cache.get(&fingerprint) {
            if cached.cached_at.elapsed() < ttl {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return OptimizationDecision {
                    path: cached.path,
                    parallelism: cached.parallelism,
                    batch_size: cached.batch_size,
                    rate_limit_delay,
                    cache_hit: true,
                };
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let (path, parallelism, batch_size) = self.select_path(request.priority, load);
        self.remember(
            fingerprint,
            CachedRoute {
                path,
                parallelism,
                batch_size,
                cached_at: Instant::now(),
            },
        );

        debug!(
            "Request {} routed to {:?} (load {:.2}, parallelism {})",
            request.request_id, path, load, parallelism
        );

        OptimizationDecision {
            path,
            parallelism,
            batch_size,
            rate_limit_delay,
            cache_hit: false,
        }
    }

    /// Width and size of the next batch run at the given load
    ///
    /// `parallelism` bounds concurrent groups; `batch_size`, set on the batch
    /// path only, bounds how many queued requests one drain takes.
    pub fn plan_batch(&self, load: f64) -> OptimizationDecision {
        let (path, parallelism, batch_size) = self.select_path(SettlementPriority::Normal, load);
        OptimizationDecision {
            path,
            parallelism,
            batch_size,
            rate_limit_delay: self.rate_limit_delay(load),
            cache_hit: false,
        }
    }

    fn select_path(&self, priority: SettlementPriority, load: f64) -> (ProcessingPath, usize, Option<usize>) {
        let max_parallelism = self.config.max_parallelism.max(1);

        if priority == SettlementPriority::Critical {
            return (ProcessingPath::FastPath, max_parallelism, None);
        }
        if load < self.config.moderate_load {
            return (ProcessingPath::StandardPath, max_parallelism.min(2), None);
        }

        let span = (1.0 - self.config.moderate_load).max(f64::EPSILON);
        let pressure = ((load - self.config.moderate_load) / span).clamp(0.0, 1.0);
        let min = self.config.min_batch_size;
        let max = self.config.max_batch_size.max(min);
        let batch_size = min + ((max - min) as f64 * pressure).round() as usize;

        (ProcessingPath::BatchPath, max_parallelism, Some(batch_size))
    }

    fn remember(&self, fingerprint: RouteFingerprint, route: CachedRoute) {
        if self.cache.len() >= self.config.cache_capacity {
            let ttl = Duration::from_millis(self.config.cache_ttl_ms);
            self.cache.retain(|_, cached| cached.cached_at.elapsed() < ttl);
        }
        if self.cache.len() < self.config.cache_capacity {
            self.cache.insert(fingerprint, route);
        }
    }

    /// Delay for admissions at the given load; zero below saturation
    pub fn rate_limit_delay(&self, load: f64) -> Duration {
        let saturation = self.config.saturation_threshold;
        if load < saturation {
            return Duration::ZERO;
        }

        let span = (1.0 - saturation).max(f64::EPSILON);
        let pressure = ((load - saturation) / span).clamp(0.0, 1.0);
        // Slow settlements push the delay further up
        let latency_factor = 1.0 + (self.average_latency_ms() / 1_000.0).min(1.0);

        let (min, max) = {
            let a = self.config.min_rate_limit_delay_ms as f64;
            let b = self.config.max_rate_limit_delay_ms as f64;
            (a.min(b), a.max(b))
        };
        let delay = ((min + (max - min) * pressure) * latency_factor).clamp(min, max);
        Duration::from_micros((delay * 1_000.0) as u64)
    }

    /// Feed a settlement latency into the moving average
    pub fn record_latency(&self, latency_ms: f64) {
        let _ = self
            .latency_ewma
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                let current = f64::from_bits(bits);
                let next = if current == 0.0 {
                    latency_ms
                } else {
                    LATENCY_EWMA_ALPHA * latency_ms + (1.0 - LATENCY_EWMA_ALPHA) * current
                };
                Some(next.to_bits())
            });
    }

    /// Moving average of settlement latency (milliseconds)
    pub fn average_latency_ms(&self) -> f64 {
        f64::from_bits(self.latency_ewma.load(Ordering::Relaxed))
    }

    /// Cache hits and misses
    pub fn cache_stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn optimizer() -> PerformanceOptimizer {
        PerformanceOptimizer::new(OptimizerConfig {
            cache_ttl_ms: 60_000,
            ..Default::default()
        })
    }

    #[test]
    fn test_critical_takes_fast_path() {
        let optimizer = optimizer();
        let request = SettlementRequest::new("X", "Y", dec!(10), Currency::USD)
            .with_priority(SettlementPriority::Critical);

        let decision = optimizer.optimize_settlement(&request, 0.95);
        assert_eq!(decision.path, ProcessingPath::FastPath);
        assert_eq!(decision.parallelism, 8);
        assert!(decision.rate_limit_delay > Duration::ZERO);
    }

    #[test]
    fn test_load_selects_path() {
        let optimizer = PerformanceOptimizer::new(OptimizerConfig {
            cache_ttl_ms: 0,
            ..Default::default()
        });
        let request = SettlementRequest::new("X", "Y", dec!(10), Currency::USD);

        let light = optimizer.optimize_settlement(&request, 0.1);
        assert_eq!(light.path, ProcessingPath::StandardPath);
        assert_eq!(light.rate_limit_delay, Duration::ZERO);

        let heavy = optimizer.optimize_settlement(&request, 1.0);
        assert_eq!(heavy.path, ProcessingPath::BatchPath);
        assert_eq!(heavy.batch_size, Some(500));

        let moderate = optimizer.optimize_settlement(&request, 0.7);
        assert_eq!(moderate.batch_size, Some(10));
    }

    #[test]
    fn test_batch_plan_narrows_with_load() {
        let optimizer = optimizer();

        let light = optimizer.plan_batch(0.2);
        assert_eq!(light.path, ProcessingPath::StandardPath);
        assert_eq!(light.parallelism, 2);
        assert_eq!(light.batch_size, None);

        let heavy = optimizer.plan_batch(0.85);
        assert_eq!(heavy.path, ProcessingPath::BatchPath);
        assert_eq!(heavy.parallelism, 8);
        assert_eq!(heavy.batch_size, Some(255));
        assert_eq!(optimizer.cache_stats(), (0, 0));
    }

    #[test]
    fn test_similar_requests_hit_cache() {
        let optimizer = optimizer();
        let first = SettlementRequest::new("X", "Y", dec!(120), Currency::EUR);
        let similar = SettlementRequest::new("P", "Q", dec!(450), Currency::EUR);
        let different = SettlementRequest::new("P", "Q", dec!(4500), Currency::EUR);

        assert!(!optimizer.optimize_settlement(&first, 0.1).cache_hit);
        assert!(optimizer.optimize_settlement(&similar, 0.1).cache_hit);
        assert!(!optimizer.optimize_settlement(&different, 0.1).cache_hit);
        assert_eq!(optimizer.cache_stats(), (1, 2));
    }

    #[test]
    fn test_latency_average() {
        let optimizer = optimizer();
        optimizer.record_latency(10.0);
        optimizer.record_latency(20.0);
        assert!((optimizer.average_latency_ms() - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_rate_limit_bounds() {
        let optimizer = optimizer();
        assert_eq!(optimizer.rate_limit_delay(0.5), Duration::ZERO);
        assert_eq!(optimizer.rate_limit_delay(0.9), Duration::from_millis(1));
        assert_eq!(optimizer.rate_limit_delay(1.0), Duration::from_millis(250));
    }

    #[test]
    fn test_rate_limit_with_inverted_bounds() {
        let optimizer = PerformanceOptimizer::new(OptimizerConfig {
            min_rate_limit_delay_ms: 300,
            max_rate_limit_delay_ms: 10,
            ..Default::default()
        });
        assert_eq!(optimizer.rate_limit_delay(0.9), Duration::from_millis(10));
        assert_eq!(optimizer.rate_limit_delay(1.0), Duration::from_millis(300));
    }
}

//! Settlement metrics
//!
//! Prometheus collectors in a private registry, so several engines can live
//! in one process (tests, drills) without clashing on the default registry.
//!
//! # Metrics
//!
//! - `settlement_total` - Settlements admitted
//! - `settlement_success_total` - Settlements completed
//! - `settlement_failure_total` - Settlements failed
//! - `settlement_queued_total` - Settlements deferred to the queue
//! - `settlement_reversed_total` - Settlements reversed
//! - `settlement_latency_seconds` - Histogram of settlement latencies
//! - `settlement_liquidity_utilization` - Pool utilization per currency

use crate::types::Currency;
use prometheus::{
    Encoder, GaugeVec, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Point-in-time view of the settlement metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Settlements admitted
    pub total: u64,

    /// Completed
    pub successful: u64,

    /// Failed
    pub failed: u64,

    /// Deferred to the queue
    pub queued: u64,

    /// Reversed
    pub reversed: u64,

    /// Mean latency of terminal settlements (milliseconds)
    pub average_latency_ms: f64,

    /// Completed settlements per second since start
    pub throughput_per_sec: f64,

    /// Pool utilization per currency
    pub liquidity_utilization: HashMap<Currency, f64>,
}

/// Metrics collector
#[derive(Debug, Clone)]
pub struct SettlementMetrics {
    /// Settlements admitted
    pub total: IntCounter,

    /// Completed
    pub successful: IntCounter,

    /// Failed
    pub failed: IntCounter,

    /// Deferred to the queue
    pub queued: IntCounter,

    /// Reversed
    pub reversed: IntCounter,

    /// Latency histogram (seconds)
    pub latency: Histogram,

    /// Pool utilization per currency
    pub liquidity_utilization: GaugeVec,

    /// Latency sum in microseconds, for the exact mean
    latency_sum_us: Arc<AtomicU64>,

    started_at: Instant,

    registry: Arc<Registry>,
}

impl SettlementMetrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let total = IntCounter::new("settlement_total", "Settlements admitted")?;
        registry.register(Box::new(total.clone()))?;

        let successful = IntCounter::new("settlement_success_total", "Settlements completed")?;
        registry.register(Box::new(successful.clone()))?;

        let failed = IntCounter::new("settlement_failure_total", "Settlements failed")?;
        registry.register(Box::new(failed.clone()))?;

        let queued = IntCounter::new("settlement_queued_total", "Settlements deferred to the queue")?;
        registry.register(Box::new(queued.clone()))?;

        let reversed = IntCounter::new("settlement_reversed_total", "Settlements reversed")?;
        registry.register(Box::new(reversed.clone()))?;

        let latency = Histogram::with_opts(
            HistogramOpts::new("settlement_latency_seconds", "Histogram of settlement latencies")
                .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(latency.clone()))?;

        let liquidity_utilization = GaugeVec::new(
            Opts::new(
                "settlement_liquidity_utilization",
                "Fraction of each pool not available",
            ),
            &["currency"],
        )?;
        registry.register(Box::new(liquidity_utilization.clone()))?;

        Ok(Self {
            total,
            successful,
            failed,
            queued,
            reversed,
            latency,
            liquidity_utilization,
            latency_sum_us: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
            registry,
        })
    }

    /// Record an admitted settlement
    pub fn record_admitted(&self) {
        self.total.inc();
    }

    /// Record a deferred settlement
    pub fn record_queued(&self) {
        self.queued.inc();
    }

    /// Record a terminal outcome
    pub fn record_outcome(&self, success: bool, latency_ms: f64) {
        if success {
            self.successful.inc();
        } else {
            self.failed.inc();
        }
        self.latency.observe(latency_ms / 1_000.0);
        self.latency_sum_us
            .fetch_add((latency_ms * 1_000.0).max(0.0) as u64, Ordering::Relaxed);
    }

    /// Record a reversal
    pub fn record_reversed(&self) {
        self.reversed.inc();
    }

    /// Publish pool utilization
    pub fn record_liquidity_utilization(&self, utilization: &HashMap<Currency, f64>) {
        for (currency, value) in utilization {
            self.liquidity_utilization
                .with_label_values(&[currency.code()])
                .set(*value);
        }
    }

    /// Snapshot, with the given pool utilization
    pub fn snapshot(&self, liquidity_utilization: HashMap<Currency, f64>) -> MetricsSnapshot {
        self.record_liquidity_utilization(&liquidity_utilization);

        let successful = self.successful.get();
        let failed = self.failed.get();
        let terminal = successful + failed;
        let average_latency_ms = if terminal > 0 {
            self.latency_sum_us.load(Ordering::Relaxed) as f64 / terminal as f64 / 1_000.0
        } else {
            0.0
        };

        let elapsed = self.started_at.elapsed().as_secs_f64();
        let throughput_per_sec = if elapsed > 0.0 {
            successful as f64 / elapsed
        } else {
            0.0
        };

        MetricsSnapshot {
            total: self.total.get(),
            successful,
            failed,
            queued: self.queued.get(),
            reversed: self.reversed.get(),
            average_latency_ms,
            throughput_per_sec,
            liquidity_utilization,
        }
    }

    /// Prometheus text exposition
    pub fn gather_text(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = SettlementMetrics::new().unwrap();
        assert_eq!(metrics.total.get(), 0);

        // Private registries: a second collector does not clash
        assert!(SettlementMetrics::new().is_ok());
    }

    #[test]
    fn test_outcomes_and_mean_latency() {
        let metrics = SettlementMetrics::new().unwrap();
        metrics.record_admitted();
        metrics.record_admitted();
        metrics.record_outcome(true, 2.0);
        metrics.record_outcome(false, 4.0);

        let snapshot = metrics.snapshot(HashMap::new());
        assert_eq!(snapshot.total, 2);
        assert_eq!(snapshot.successful, 1);
        assert_eq!(snapshot.failed, 1);
        assert!((snapshot.average_latency_ms - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_gather_text() {
        let metrics = SettlementMetrics::new().unwrap();
        metrics.record_queued();
        let utilization = HashMap::from([(Currency::USD, 0.25)]);
        let snapshot = metrics.snapshot(utilization);
        assert_eq!(snapshot.queued, 1);

        let text = metrics.gather_text();
        assert!(text.contains("settlement_queued_total 1"));
        assert!(text.contains("settlement_liquidity_utilization{currency=\"USD\"} 0.25"));
    }
}

//! Batch processing
//!
//! Requests are grouped by (currency, settlement type). Groups run
//! concurrently, bounded by `engine.batch_workers` and the parallelism the
//! optimizer plans for the current load; items inside a group run
//! one after another so they contend on the same pool in arrival order.
//! Results come back in input order whatever the completion order.

use crate::{
    engine::SettlementEngine,
    types::*,
    Error,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

type Indexed = Vec<(usize, SettlementResult, SettlementRequest)>;

impl SettlementEngine {
    /// Settle many requests as one batch
    ///
    /// Every request is screened on its own; one failure never affects the
    /// others. Net requests join their netting cycle and may stay Pending.
    #[instrument(skip(self, requests), fields(count = requests.len()))]
    pub async fn process_settlement_batch(&self, requests: Vec<SettlementRequest>) -> BatchResult {
        let items = requests
            .into_iter()
            .map(|request| {
                self.metrics_handle().record_admitted();
                (SettlementResult::pending(&request), request)
            })
            .collect();

        self.run_batch(items).await
    }

    /// Run admitted items grouped by currency and type
    pub(crate) async fn run_batch(&self, items: Vec<(SettlementResult, SettlementRequest)>) -> BatchResult {
        let batch_id = Uuid::now_v7();
        let started_at = Utc::now();
        let total = items.len();

        // Groups in first-seen order
        let mut order: Vec<(Currency, SettlementType)> = Vec::new();
        let mut groups: HashMap<(Currency, SettlementType), Indexed> = HashMap::new();
        let mut requests = Vec::with_capacity(total);

        for (index, (result, request)) in items.into_iter().enumerate() {
            let key = (request.currency, request.settlement_type);
            if !groups.contains_key(&key) {
                order.push(key);
            }
            requests.push(request.clone());
            groups.entry(key).or_default().push((index, result, request));
        }

        let plan = self.optimizer().plan_batch(self.load_ratio());
        let width = self.config().engine.batch_workers.min(plan.parallelism).max(1);
        debug!("Batch {} runs {:?} with {} workers", batch_id, plan.path, width);
        let workers = Arc::new(Semaphore::new(width));
        let mut tasks = JoinSet::new();

        for key in order {
            let Some(group) = groups.remove(&key) else {
                continue;
            };
            let engine = self.clone();
            let workers = Arc::clone(&workers);

            tasks.spawn(async move {
                let _permit = workers.acquire_owned().await;
                let mut settled = Vec::with_capacity(group.len());
                for (index, result, request) in group {
                    settled.push((index, engine.run_batch_item(result, request).await));
                }
                settled
            });
        }

        let mut slots: Vec<Option<SettlementResult>> = vec![None; total];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(settled) => {
                    for (index, result) in settled {
                        slots[index] = Some(result);
                    }
                }
                Err(e) => warn!("Batch {} worker failed: {}", batch_id, e),
            }
        }

        let results: Vec<SettlementResult> = slots
            .into_iter()
            .zip(requests)
            .map(|(slot, request)| {
                slot.unwrap_or_else(|| {
                    let mut lost = SettlementResult::pending(&request);
                    lost.fail(&Error::Technical("Batch worker aborted".to_string()));
                    lost
                })
            })
            .collect();

        let success_count = results
            .iter()
            .filter(|r| r.status == SettlementStatus::Completed)
            .count();
        let failure_count = results
            .iter()
            .filter(|r| r.status == SettlementStatus::Failed)
            .count();

        let errors = results
            .iter()
            .filter(|r| r.status == SettlementStatus::Failed)
            .map(|r| BatchItemError {
                request_id: r.request_id,
                kind: r.failure_kind.unwrap_or(FailureKind::TechnicalFailure),
                message: r.failure_reason.clone().unwrap_or_default(),
            })
            .collect();

        let finished_at = Utc::now();
        let processing_time_ms = (finished_at - started_at)
            .num_microseconds()
            .map(|us| us as f64 / 1000.0)
            .unwrap_or(0.0);
        let terminal = success_count + failure_count;
        let average_latency_ms = if terminal > 0 {
            results
                .iter()
                .filter(|r| r.status.is_terminal())
                .map(|r| r.latency_ms)
                .sum::<f64>()
                / terminal as f64
        } else {
            0.0
        };

        info!(
            "Batch {}: {} settlements, {} ok, {} failed in {:.2}ms",
            batch_id, total, success_count, failure_count, processing_time_ms
        );

        BatchResult {
            batch_id,
            total_settlements: total,
            success_count,
            failure_count,
            pending_count: total - success_count - failure_count,
            started_at,
            finished_at,
            processing_time_ms,
            average_latency_ms,
            results,
            errors,
        }
    }

    async fn run_batch_item(&self, mut result: SettlementResult, request: SettlementRequest) -> SettlementResult {
        if let Err(e) = self.screen(&request).await {
            result.fail(&e);
            return self.record(result, &request);
        }
        self.process_admitted(result, request).await
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{Config, PoolConfig};
    use crate::types::*;
    use crate::SettlementEngine;
    use ledger_core::InMemoryLedger;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn engine() -> (Arc<InMemoryLedger>, SettlementEngine) {
        let mut config = Config::default();
        for (currency, balance) in [(Currency::USD, dec!(100)), (Currency::EUR, dec!(1000))] {
            config.liquidity.pools.push(PoolConfig {
                currency,
                initial_balance: balance,
                minimum_balance: Decimal::ZERO,
                optimal_balance: Decimal::ZERO,
                internal_reserve: Decimal::ZERO,
                emergency_line: Decimal::ZERO,
            });
        }
        config.engine.batch_workers = 2;
        let ledger = Arc::new(InMemoryLedger::new());
        let engine = SettlementEngine::new(config, ledger.clone()).unwrap();
        (ledger, engine)
    }

    #[tokio::test]
    async fn test_batch_isolates_failures_and_keeps_order() {
        let (ledger, engine) = engine();

        let requests = vec![
            SettlementRequest::new("A", "B", dec!(60), Currency::USD).with_reference("usd-1"),
            SettlementRequest::new("C", "D", dec!(500), Currency::EUR).with_reference("eur-1"),
            // USD pool has 40 left
            SettlementRequest::new("A", "B", dec!(60), Currency::USD).with_reference("usd-2"),
            SettlementRequest::new("A", "A", dec!(1), Currency::EUR).with_reference("bad"),
            SettlementRequest::new("C", "D", dec!(500), Currency::EUR).with_reference("eur-2"),
        ];
        let ids: Vec<_> = requests.iter().map(|r| r.request_id).collect();

        let batch = engine.process_settlement_batch(requests).await;

        assert_eq!(batch.total_settlements, 5);
        assert_eq!(batch.success_count, 3);
        assert_eq!(batch.failure_count, 2);
        assert_eq!(batch.pending_count, 0);
        assert_eq!(batch.errors.len(), 2);

        let order: Vec<_> = batch.results.iter().map(|r| r.request_id).collect();
        assert_eq!(order, ids);
        assert_eq!(
            batch.results[2].failure_kind,
            Some(FailureKind::InsufficientLiquidity)
        );
        assert_eq!(batch.results[3].failure_kind, Some(FailureKind::InvalidRequest));

        assert_eq!(ledger.balance(&AccountId::new("B"), Currency::USD), dec!(60));
        assert_eq!(ledger.balance(&AccountId::new("D"), Currency::EUR), dec!(1000));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let (_, engine) = engine();
        let batch = engine.process_settlement_batch(Vec::new()).await;

        assert_eq!(batch.total_settlements, 0);
        assert!(batch.results.is_empty());
        assert_eq!(batch.average_latency_ms, 0.0);
    }

    #[tokio::test]
    async fn test_net_requests_stay_pending_in_batch() {
        let (_, engine) = engine();
        let requests = vec![
            SettlementRequest::new("A", "B", dec!(10), Currency::EUR).with_netting_group("G"),
            SettlementRequest::new("B", "A", dec!(4), Currency::EUR).with_netting_group("G"),
        ];

        let batch = engine.process_settlement_batch(requests).await;
        assert_eq!(batch.pending_count, 2);
        assert_eq!(engine.netting().open_cycles(), 1);

        let settled = engine.flush_cycles().await;
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].net_amount, dec!(6));
        for result in &batch.results {
            assert_eq!(
                engine.get_result(result.settlement_id).unwrap().status,
                SettlementStatus::Completed
            );
        }
    }
}

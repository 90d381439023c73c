//! Main settlement engine
//!
//! Orchestrates admission, liquidity, atomic execution, netting and
//! recovery. The engine is a cheap-to-clone handle: every clone shares the
//! same pools, locks, cycles, queue and result store.
//!
//! # Instant pipeline
//!
//! ```text
//! screen ─▶ capacity ─▶ lock keys ─▶ check/provision ─▶ begin tx
//!        ─▶ reserve ─▶ update balances ─▶ commit tx ─▶ commit liquidity
//! ```
//!
//! Any failure after the reservation releases it and rolls the transaction
//! back; the failure is then handed to the failover manager. A reroute runs
//! the same pipeline against the ledger bound to the fallback route.
//!
//! Net requests pass the same lock and liquidity gate before they join a
//! netting cycle; their net positions later settle through the pipeline above.

use crate::{
    atomic::{AtomicSettlementProcessor, LockSet, Transaction},
    compliance::{AllowAll, ComplianceGate, ComplianceVerdict},
    config::Config,
    events::{EventPublisher, SettlementEvent},
    failover::{FailoverManager, LEDGER_DEPENDENCY},
    liquidity::{LiquidityManager, ReservationId},
    metrics::{MetricsSnapshot, SettlementMetrics},
    netting::{NettingCycle, NettingEngine},
    optimizer::PerformanceOptimizer,
    queue::SettlementQueue,
    types::*,
    Error, Result,
};
use dashmap::{DashMap, DashSet};
use ledger_core::{AccountLedger, BalanceUpdate};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Decrements the in-flight counter on drop
#[derive(Debug)]
struct LoadGuard(Arc<AtomicUsize>);

impl Drop for LoadGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Settlement engine
#[derive(Debug, Clone)]
pub struct SettlementEngine {
    /// Configuration
    config: Arc<Config>,

    /// Balance mutations and key locks
    processor: AtomicSettlementProcessor,

    /// Liquidity pools
    liquidity: Arc<LiquidityManager>,

    /// Netting cycles
    netting: Arc<NettingEngine>,

    /// Recovery and circuit breaking
    failover: Arc<FailoverManager>,

    /// Scheduling hints
    optimizer: Arc<PerformanceOptimizer>,

    /// Deferred requests
    queue: Arc<SettlementQueue>,

    /// Admission screening
    compliance: Arc<dyn ComplianceGate>,

    /// Completion and failure events
    events: EventPublisher,

    /// Counters and histograms
    metrics: SettlementMetrics,

    /// Every result, by settlement ID
    results: Arc<DashMap<SettlementId, SettlementResult>>,

    /// Request behind each result
    requests: Arc<DashMap<SettlementId, SettlementRequest>>,

    /// Settlements with a reversal started or done
    reversals: Arc<DashSet<SettlementId>>,

    /// Terminal settlements, oldest first, for retention pruning
    terminal: Arc<Mutex<VecDeque<SettlementId>>>,

    /// Settlements in flight
    current_load: Arc<AtomicUsize>,
}

impl SettlementEngine {
    /// Create new settlement engine over a ledger
    pub fn new(config: Config, ledger: Arc<dyn AccountLedger>) -> Result<Self> {
        config.validate()?;
        let metrics = SettlementMetrics::new()
            .map_err(|e| Error::Other(format!("Failed to create metrics: {}", e)))?;

        info!(
            "Creating settlement engine {} v{} (capacity {})",
            config.service.service_name,
            config.service.service_version,
            config.engine.processing_capacity
        );

        Ok(Self {
            processor: AtomicSettlementProcessor::new(
                ledger,
                Duration::from_millis(config.engine.lock_timeout_ms),
            ),
            liquidity: Arc::new(LiquidityManager::new(&config.liquidity)),
            netting: Arc::new(NettingEngine::new(config.netting.clone())),
            failover: Arc::new(FailoverManager::new(config.failover.clone())),
            optimizer: Arc::new(PerformanceOptimizer::new(config.optimizer.clone())),
            queue: Arc::new(SettlementQueue::new(
                config.engine.queue_capacity,
                config.engine.processing_deadline_ms,
            )),
            compliance: Arc::new(AllowAll),
            events: EventPublisher::new(config.engine.event_channel_capacity),
            metrics,
            results: Arc::new(DashMap::new()),
            requests: Arc::new(DashMap::new()),
            reversals: Arc::new(DashSet::new()),
            terminal: Arc::new(Mutex::new(VecDeque::new())),
            current_load: Arc::new(AtomicUsize::new(0)),
            config: Arc::new(config),
        })
    }

    /// Replace the compliance gate
    pub fn with_compliance(mut self, gate: Arc<dyn ComplianceGate>) -> Self {
        self.compliance = gate;
        self
    }

    /// Bind a fallback route to the ledger it settles on
    pub fn with_route(self, route: impl Into<String>, ledger: Arc<dyn AccountLedger>) -> Self {
        self.processor.bind_route(route, ledger);
        self
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Liquidity manager
    pub fn liquidity(&self) -> &LiquidityManager {
        &self.liquidity
    }

    /// Netting engine
    pub fn netting(&self) -> &NettingEngine {
        &self.netting
    }

    /// Failover manager
    pub fn failover(&self) -> &FailoverManager {
        &self.failover
    }

    /// Performance optimizer
    pub fn optimizer(&self) -> &PerformanceOptimizer {
        &self.optimizer
    }

    /// Atomic processor
    pub fn processor(&self) -> &AtomicSettlementProcessor {
        &self.processor
    }

    pub(crate) fn metrics_handle(&self) -> &SettlementMetrics {
        &self.metrics
    }

    /// Settlements in flight
    pub fn current_load(&self) -> usize {
        self.current_load.load(Ordering::SeqCst)
    }

    /// In-flight settlements relative to capacity
    pub fn load_ratio(&self) -> f64 {
        self.current_load() as f64 / self.config.engine.processing_capacity as f64
    }

    /// Room for another in-flight settlement
    pub fn has_capacity(&self) -> bool {
        self.current_load() < self.config.engine.processing_capacity
    }

    /// Requests waiting in the queue
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn try_acquire_load(&self) -> Option<LoadGuard> {
        let capacity = self.config.engine.processing_capacity;
        self.current_load
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |load| {
                (load < capacity).then_some(load + 1)
            })
            .ok()
            .map(|_| LoadGuard(Arc::clone(&self.current_load)))
    }

    /// Settle one request
    ///
    /// Never fails: every outcome, including rejection, is a result.
    #[instrument(skip(self, request), fields(request_id = %request.request_id))]
    pub async fn process_realtime_settlement(&self, request: SettlementRequest) -> SettlementResult {
        let mut result = SettlementResult::pending(&request);
        self.metrics.record_admitted();

        if let Err(e) = self.screen(&request).await {
            warn!("Request {} rejected at admission: {}", request.request_id, e);
            result.fail(&e);
            return self.record(result, &request);
        }

        match request.settlement_type {
            SettlementType::Batch | SettlementType::Deferred => {
                return self.enqueue(result, request);
            }
            SettlementType::Instant | SettlementType::Net => {}
        }

        let Some(_load) = self.try_acquire_load() else {
            debug!("At capacity, deferring request {}", request.request_id);
            return self.enqueue(result, request);
        };

        let decision = self
            .optimizer
            .optimize_settlement(&request, self.load_ratio());
        result.processing_path = Some(decision.path);
        if !decision.rate_limit_delay.is_zero() {
            tokio::time::sleep(decision.rate_limit_delay).await;
        }

        self.process_admitted(result, request).await
    }

    /// Validate, check the currency and consult the compliance gate
    pub(crate) async fn screen(&self, request: &SettlementRequest) -> Result<()> {
        request.validate()?;

        if !self.liquidity.has_pool(request.currency) {
            return Err(Error::InvalidRequest(format!(
                "Unknown currency {}",
                request.currency
            )));
        }

        match self.compliance.screen(request).await {
            ComplianceVerdict::Allow => Ok(()),
            ComplianceVerdict::Block(reason) | ComplianceVerdict::Review(reason) => {
                Err(Error::Compliance(reason))
            }
        }
    }

    /// Run a screened request on its path
    pub(crate) async fn process_admitted(
        &self,
        mut result: SettlementResult,
        request: SettlementRequest,
    ) -> SettlementResult {
        match request.settlement_type {
            SettlementType::Net => match self.lock_and_provision(&request).await {
                Ok(locks) => {
                    self.processor.unlock(locks);
                    self.submit_net(result, request).await
                }
                Err(e) => {
                    warn!("Net request {} refused: {}", request.request_id, e);
                    result.fail(&e);
                    self.record(result, &request)
                }
            },
            SettlementType::Instant | SettlementType::Batch | SettlementType::Deferred => {
                self.settle_instant(result, &request).await
            }
        }
    }

    fn enqueue(&self, mut result: SettlementResult, request: SettlementRequest) -> SettlementResult {
        match self.queue.push(result.settlement_id, request.clone()) {
            Ok(deadline) => {
                result.transition(SettlementStatus::Queued);
                self.metrics.record_queued();
                debug!(
                    "Settlement {} queued until {}",
                    result.settlement_id, deadline
                );
            }
            Err(e) => {
                warn!("Cannot queue settlement {}: {}", result.settlement_id, e);
                result.fail(&e);
            }
        }
        self.record(result, &request)
    }

    /// Store a result; terminal results feed metrics and events
    pub(crate) fn record(&self, result: SettlementResult, request: &SettlementRequest) -> SettlementResult {
        self.requests
            .entry(result.settlement_id)
            .or_insert_with(|| request.clone());
        self.results.insert(result.settlement_id, result.clone());
        self.observe(&result);
        result
    }

    fn observe(&self, result: &SettlementResult) {
        if matches!(
            result.status,
            SettlementStatus::Completed | SettlementStatus::Failed
        ) {
            self.terminal.lock().push_back(result.settlement_id);
            self.metrics
                .record_outcome(result.status == SettlementStatus::Completed, result.latency_ms);
            self.optimizer.record_latency(result.latency_ms);
            self.events.publish(result);
        }
    }

    /// Fail a stored result in place
    pub(crate) fn fail_stored(&self, settlement_id: SettlementId, request: &SettlementRequest, error: &Error) {
        let failed = match self.results.get_mut(&settlement_id) {
            Some(mut stored) => {
                stored.fail(error);
                stored.clone()
            }
            None => {
                let mut result = SettlementResult::pending(request);
                result.settlement_id = settlement_id;
                result.fail(error);
                self.results.insert(settlement_id, result.clone());
                result
            }
        };
        self.observe(&failed);
    }

    /// Execute a gross settlement, recovering per failure type
    pub(crate) async fn settle_instant(
        &self,
        mut result: SettlementResult,
        request: &SettlementRequest,
    ) -> SettlementResult {
        result.transition(SettlementStatus::Processing);
        result.attempts = 1;

        let outcome = match self.execute_instant(request, None).await {
            Ok(reference) => Ok((reference, None)),
            Err(failure) => {
                warn!(
                    "Settlement {} failed ({}): {}",
                    result.settlement_id,
                    failure.kind(),
                    failure
                );
                let recovery = self
                    .failover
                    .attempt_recovery(request, failure, |route| {
                        let engine = self.clone();
                        let request = request.clone();
                        async move { engine.execute_instant(&request, route.as_deref()).await }
                    })
                    .await;

                result.attempts += recovery.attempts;
                let route = recovery.route;
                recovery.outcome.map(|reference| (reference, route))
            }
        };

        match outcome {
            Ok((reference, route)) => {
                result.transfer_reference = Some(reference);
                result.route = route;
                result.complete();
            }
            Err(e) => result.fail(&e),
        }

        debug!(
            "Settlement {} finished {:?} in {:.3}ms",
            result.settlement_id, result.status, result.latency_ms
        );
        self.record(result, request)
    }

    /// One attempt of the instant pipeline; returns the transfer reference
    async fn execute_instant(&self, request: &SettlementRequest, route: Option<&str>) -> Result<String> {
        let locks = self.lock_and_provision(request).await?;

        let tx = self.processor.begin_routed_transaction(route)?;
        let reservation = match self.stage(&tx, request).await {
            Ok(reservation) => reservation,
            Err(e) => {
                if let Err(rollback) = self.processor.rollback_transaction(tx).await {
                    warn!("Rollback failed: {}", rollback);
                }
                return Err(e);
            }
        };

        let tx_id = tx.id();
        if let Err(e) = self.processor.commit_transaction(tx).await {
            self.note_ledger_failure(route, &e);
            self.release(reservation);
            return Err(e);
        }
        if route.is_none() {
            self.failover.breakers().record_success(LEDGER_DEPENDENCY);
        }

        if let Err(e) = self.liquidity.commit_liquidity(reservation) {
            warn!("Ledger committed {} but liquidity commit failed: {}", tx_id, e);
        }
        self.processor.unlock(locks);

        Ok(match route {
            Some(route) => format!("{}:{}", route, tx_id),
            None => tx_id.to_string(),
        })
    }

    /// Lock the request's keys and make sure its pool can cover it
    async fn lock_and_provision(&self, request: &SettlementRequest) -> Result<LockSet> {
        let locks = self.processor.lock(&request.resource_keys()).await?;

        let check = self.liquidity.check_liquidity(request);
        if !check.sufficient {
            debug!(
                "Pool {} short for {} (available {}, action {:?})",
                request.currency, request.amount, check.available, check.recommended_action
            );
            self.liquidity.provision_liquidity(request)?;
        }
        Ok(locks)
    }

    /// Reserve liquidity and stage the balanced update pair
    async fn stage(&self, tx: &Transaction, request: &SettlementRequest) -> Result<ReservationId> {
        let reservation = self
            .liquidity
            .reserve_liquidity(request.currency, request.amount)?;

        let staged = async {
            // Route breakers are checked by the failover manager
            if tx.route().is_none() {
                self.failover.breakers().check(LEDGER_DEPENDENCY)?;
            }
            let reference = if request.reference.is_empty() {
                request.request_id.to_string()
            } else {
                request.reference.clone()
            };
            let updates = BalanceUpdate::transfer_pair(
                &request.debit_account,
                &request.credit_account,
                request.currency,
                request.amount,
                &reference,
            );
            self.processor.update_balances(tx, &updates).await
        }
        .await;

        if let Err(e) = staged {
            self.note_ledger_failure(tx.route(), &e);
            self.release(reservation);
            return Err(e);
        }
        Ok(reservation)
    }

    fn release(&self, reservation: ReservationId) {
        if let Err(e) = self.liquidity.release_liquidity(reservation) {
            warn!("Failed to release {}: {}", reservation, e);
        }
    }

    fn note_ledger_failure(&self, route: Option<&str>, error: &Error) {
        if route.is_some() {
            return;
        }
        if let Error::Ledger(inner) = error {
            if inner.is_transient() {
                self.failover.breakers().record_failure(LEDGER_DEPENDENCY);
            }
        }
    }

    /// Admit a Net request into its cycle; settle the cycle if it closed
    async fn submit_net(&self, result: SettlementResult, request: SettlementRequest) -> SettlementResult {
        let settlement_id = result.settlement_id;
        let result = self.record(result, &request);

        let admission = match self.netting.admit(settlement_id, request.clone()) {
            Ok(admission) => admission,
            Err(e) => {
                warn!("Request {} not admitted to netting: {}", request.request_id, e);
                self.fail_stored(settlement_id, &request, &e);
                return self.get_result(settlement_id).unwrap_or(result);
            }
        };

        debug!(
            "Request {} joined cycle {} ({} members)",
            request.request_id, admission.cycle_id, admission.member_count
        );

        let Some(cycle) = admission.closed else {
            return result;
        };

        let netting = self.settle_cycle(cycle).await;
        let mut latest = self.get_result(settlement_id).unwrap_or(result);
        latest.netting = Some(netting);
        self.results.insert(settlement_id, latest.clone());
        latest
    }

    /// Settle a closed cycle's net positions and finalize its members
    #[instrument(skip(self, cycle), fields(cycle_id = %cycle.cycle_id))]
    async fn settle_cycle(&self, cycle: NettingCycle) -> NettingResult {
        let positions = self.netting.calculate_net_positions(&cycle);
        let gross_amount = cycle.gross_amount();
        let net_amount = self.netting.net_amount(&cycle, &positions);
        let efficiency_ratio = self.netting.get_efficiency_ratio(&cycle);

        info!(
            "Netting cycle {}: {} gross → {} net ({:.1}% efficiency)",
            cycle.cycle_id,
            gross_amount,
            net_amount,
            efficiency_ratio * 100.0
        );

        let mut net_settlements = Vec::new();
        let mut failures: HashMap<AccountId, (FailureKind, String)> = HashMap::new();

        // Each participant settles on its own; one failure does not undo others
        for (position, request) in self.netting.net_settlement_requests(&cycle, &positions) {
            self.metrics.record_admitted();
            let settled = self
                .settle_instant(SettlementResult::pending(&request), &request)
                .await;

            if settled.status != SettlementStatus::Completed {
                failures.insert(
                    position.participant.clone(),
                    (
                        settled.failure_kind.unwrap_or(FailureKind::TechnicalFailure),
                        settled.failure_reason.clone().unwrap_or_default(),
                    ),
                );
            }

            net_settlements.push(NetSettlementOutcome {
                participant: position.participant,
                amount: request.amount,
                settlement_id: settled.settlement_id,
                status: settled.status,
                failure_reason: settled.failure_reason,
            });
        }

        for member in &cycle.members {
            let accounts = [&member.request.debit_account, &member.request.credit_account];
            let failure = accounts
                .into_iter()
                .find_map(|account| failures.get(account).map(|f| (account.clone(), f.clone())));

            let updated = self.results.get_mut(&member.settlement_id).map(|mut stored| {
                stored.transition(SettlementStatus::Processing);
                match &failure {
                    Some((account, (kind, reason))) => stored.fail_with(
                        *kind,
                        format!("Net settlement of {} failed: {}", account, reason),
                    ),
                    None => stored.complete(),
                }
                stored.clone()
            });

            if let Some(updated) = updated {
                self.observe(&updated);
            }
        }

        let participant_count = positions
            .iter()
            .filter(|p| p.participant != cycle.hub_account)
            .count();
        let cycle_id = cycle.cycle_id;
        let netting_group = cycle.netting_group.clone();

        if let Err(e) = self.netting.complete_cycle(cycle) {
            warn!("Cycle {} not archived: {}", cycle_id, e);
        }

        NettingResult {
            cycle_id,
            netting_group,
            gross_amount,
            net_amount,
            efficiency_ratio,
            participant_count,
            positions,
            net_settlements,
        }
    }

    /// Close and settle every cycle past its member or age threshold
    pub async fn close_due_cycles(&self) -> Vec<NettingResult> {
        let mut settled = Vec::new();
        for cycle in self.netting.close_due_cycles() {
            settled.push(self.settle_cycle(cycle).await);
        }
        settled
    }

    /// Close and settle every open cycle now
    pub async fn flush_cycles(&self) -> Vec<NettingResult> {
        let mut settled = Vec::new();
        for group in self.netting.open_groups() {
            if let Some(cycle) = self.netting.close_cycle(&group) {
                settled.push(self.settle_cycle(cycle).await);
            }
        }
        settled
    }

    /// Drain the queue: expired entries fail, the rest run as a batch
    ///
    /// Under heavy load one pass takes at most the planned batch size; the
    /// rest waits for the next pass.
    pub async fn process_queued(&self) -> BatchResult {
        let plan = self.optimizer.plan_batch(self.load_ratio());
        let limit = plan.batch_size.unwrap_or_else(|| self.queue.len());
        let drained = self.queue.drain(limit);

        for entry in drained.expired {
            let error = Error::DeadlineExceeded(format!(
                "request {} expired in queue at {}",
                entry.request.request_id, entry.deadline
            ));
            warn!("Settlement {} {}", entry.settlement_id, error);
            self.fail_stored(entry.settlement_id, &entry.request, &error);
        }

        let items = drained
            .ready
            .into_iter()
            .map(|entry| {
                let result = self.get_result(entry.settlement_id).unwrap_or_else(|| {
                    let mut result = SettlementResult::pending(&entry.request);
                    result.settlement_id = entry.settlement_id;
                    result
                });
                (result, entry.request)
            })
            .collect();

        self.run_batch(items).await
    }

    /// Reverse a completed settlement with a compensating transfer
    ///
    /// The original is marked Reversed only if the compensation completes.
    #[instrument(skip(self, reason))]
    pub async fn reverse_settlement(
        &self,
        settlement_id: SettlementId,
        reason: &str,
    ) -> Result<SettlementResult> {
        let original = self
            .get_result(settlement_id)
            .ok_or_else(|| Error::InvalidRequest(format!("Unknown settlement {}", settlement_id)))?;

        if original.status != SettlementStatus::Completed {
            return Err(Error::InvalidState(format!(
                "Settlement {} is {:?}, only Completed settlements can be reversed",
                settlement_id, original.status
            )));
        }
        if original.settlement_type == SettlementType::Net {
            return Err(Error::InvalidState(format!(
                "Settlement {} was settled through a netting cycle",
                settlement_id
            )));
        }

        let request = self
            .requests
            .get(&settlement_id)
            .map(|r| r.clone())
            .ok_or_else(|| Error::InvalidState(format!("No request for {}", settlement_id)))?;

        if !self.reversals.insert(settlement_id) {
            return Err(Error::InvalidState(format!(
                "Settlement {} already has a reversal",
                settlement_id
            )));
        }

        let compensating = SettlementRequest::new(
            request.credit_account.as_str(),
            request.debit_account.as_str(),
            request.amount,
            request.currency,
        )
        .with_priority(SettlementPriority::High)
        .with_reference(format!("reversal-{}", settlement_id))
        .with_metadata("reversal_of", settlement_id.to_string())
        .with_metadata("reason", reason);

        let mut result = SettlementResult::pending(&compensating);
        result.reversal_of = Some(settlement_id);
        self.metrics.record_admitted();

        let result = self.settle_instant(result, &compensating).await;

        if result.status == SettlementStatus::Completed {
            let reversed = self.results.get_mut(&settlement_id).map(|mut stored| {
                stored.transition(SettlementStatus::Reversed);
                stored.clone()
            });
            self.metrics.record_reversed();
            if let Some(reversed) = reversed {
                self.events.publish(&reversed);
            }
            info!("Settlement {} reversed by {}", settlement_id, result.settlement_id);
        } else {
            self.reversals.remove(&settlement_id);
        }

        Ok(result)
    }

    /// Look up a result
    pub fn get_result(&self, settlement_id: SettlementId) -> Option<SettlementResult> {
        self.results.get(&settlement_id).map(|r| r.clone())
    }

    /// Results currently held for lookup
    pub fn retained_results(&self) -> usize {
        self.results.len()
    }

    /// Forget the oldest terminal results beyond `engine.result_retention`
    pub fn prune_results(&self) -> usize {
        let expired: Vec<SettlementId> = {
            let mut terminal = self.terminal.lock();
            let excess = terminal
                .len()
                .saturating_sub(self.config.engine.result_retention);
            terminal.drain(..excess).collect()
        };

        for settlement_id in &expired {
            self.results.remove(settlement_id);
            self.requests.remove(settlement_id);
            self.reversals.remove(settlement_id);
        }
        expired.len()
    }

    /// Metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.liquidity.utilization())
    }

    /// Prometheus text exposition
    pub fn metrics_text(&self) -> String {
        self.metrics
            .record_liquidity_utilization(&self.liquidity.utilization());
        self.metrics.gather_text()
    }

    /// Subscribe to settlement events
    pub fn subscribe(&self) -> broadcast::Receiver<SettlementEvent> {
        self.events.subscribe()
    }

    /// One maintenance pass
    pub async fn maintain(&self) {
        let cycles = self.close_due_cycles().await;
        if !cycles.is_empty() {
            info!("Maintenance settled {} netting cycles", cycles.len());
        }

        if !self.queue.is_empty() {
            let batch = self.process_queued().await;
            info!(
                "Maintenance drained {} queued settlements ({} ok, {} failed)",
                batch.total_settlements, batch.success_count, batch.failure_count
            );
        }

        let locks = self.processor.prune_locks();
        let transactions = self.processor.prune_transactions();
        let results = self.prune_results();
        debug!(
            "Pruned {} idle locks, {} finished transactions and {} results",
            locks, transactions, results
        );
    }

    /// Start the maintenance loop
    pub fn run_maintenance(&self, interval: Duration) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            info!("Starting settlement maintenance loop every {:?}", interval);
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;
                engine.maintain().await;
            }
        })
    }
}

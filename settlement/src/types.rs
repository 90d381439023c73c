//! Core types for settlement engine

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

pub use ledger_core::{AccountId, Currency};

/// Settlement identifier
pub type SettlementId = Uuid;

/// How a request should be settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettlementType {
    /// Gross, immediately
    Instant,
    /// Through the batch queue
    Batch,
    /// Through the batch queue, no urgency
    Deferred,
    /// Accumulated into a netting cycle
    Net,
}

/// Request priority (Critical is served first)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettlementPriority {
    /// Payment-system critical
    Critical,
    /// High
    High,
    /// Normal
    Normal,
    /// Low
    Low,
}

impl SettlementPriority {
    /// Scheduling rank, higher runs first
    pub fn rank(&self) -> u8 {
        match self {
            SettlementPriority::Critical => 3,
            SettlementPriority::High => 2,
            SettlementPriority::Normal => 1,
            SettlementPriority::Low => 0,
        }
    }
}

/// Settlement lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettlementStatus {
    /// Admitted, not yet processed (also: accepted into an open netting cycle)
    Pending,
    /// Parked in the batch queue
    Queued,
    /// Being processed
    Processing,
    /// Settled
    Completed,
    /// Failed
    Failed,
    /// Undone by a compensating settlement
    Reversed,
}

impl SettlementStatus {
    /// Terminal states never transition further, except Completed → Reversed
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SettlementStatus::Completed | SettlementStatus::Failed | SettlementStatus::Reversed
        )
    }

    /// Whether `self → next` is a legal transition
    pub fn can_transition_to(&self, next: SettlementStatus) -> bool {
        use SettlementStatus::*;
        matches!(
            (self, next),
            (Pending, Queued)
                | (Pending, Processing)
                | (Pending, Failed)
                | (Queued, Processing)
                | (Queued, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Completed, Reversed)
        )
    }
}

/// Failure taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Malformed input, never retried
    InvalidRequest,
    /// Liquidity shortfall that provisioning could not cover
    InsufficientLiquidity,
    /// Ledger or infrastructure failure
    TechnicalFailure,
    /// Compliance block, never retried
    ComplianceFailure,
    /// Counterparty refused the posting
    CounterpartyFailure,
    /// Transport failure
    NetworkFailure,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::InvalidRequest => "InvalidRequest",
            FailureKind::InsufficientLiquidity => "InsufficientLiquidity",
            FailureKind::TechnicalFailure => "TechnicalFailure",
            FailureKind::ComplianceFailure => "ComplianceFailure",
            FailureKind::CounterpartyFailure => "CounterpartyFailure",
            FailureKind::NetworkFailure => "NetworkFailure",
        };
        write!(f, "{}", name)
    }
}

/// Scheduling path chosen by the optimizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessingPath {
    /// Critical traffic, maximum parallelism
    FastPath,
    /// Moderate load
    StandardPath,
    /// High load, grouped execution
    BatchPath,
}

/// Lock key: one account in one currency
///
/// Field order defines the canonical lock order (account, then currency).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    /// Account
    pub account: AccountId,
    /// Currency
    pub currency: Currency,
}

impl ResourceKey {
    /// Create new key
    pub fn new(account: AccountId, currency: Currency) -> Self {
        Self { account, currency }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account, self.currency)
    }
}

/// Settlement request (immutable once admitted)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRequest {
    /// Request ID
    pub request_id: Uuid,

    /// Settlement type
    pub settlement_type: SettlementType,

    /// Priority
    pub priority: SettlementPriority,

    /// Account debited
    pub debit_account: AccountId,

    /// Account credited
    pub credit_account: AccountId,

    /// Amount (strictly positive)
    pub amount: Decimal,

    /// Currency
    pub currency: Currency,

    /// Netting group (Net requests only)
    pub netting_group: Option<String>,

    /// Payment reference
    pub reference: String,

    /// Free-form metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl SettlementRequest {
    /// Instant, normal-priority request
    pub fn new(
        debit_account: impl Into<String>,
        credit_account: impl Into<String>,
        amount: Decimal,
        currency: Currency,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            settlement_type: SettlementType::Instant,
            priority: SettlementPriority::Normal,
            debit_account: AccountId::new(debit_account),
            credit_account: AccountId::new(credit_account),
            amount,
            currency,
            netting_group: None,
            reference: String::new(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Set settlement type
    pub fn with_type(mut self, settlement_type: SettlementType) -> Self {
        self.settlement_type = settlement_type;
        self
    }

    /// Set priority
    pub fn with_priority(mut self, priority: SettlementPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Route into a netting group (implies `SettlementType::Net`)
    pub fn with_netting_group(mut self, group: impl Into<String>) -> Self {
        self.settlement_type = SettlementType::Net;
        self.netting_group = Some(group.into());
        self
    }

    /// Set payment reference
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    /// Attach metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Check request invariants
    pub fn validate(&self) -> Result<()> {
        if self.amount <= Decimal::ZERO {
            return Err(Error::InvalidRequest(format!(
                "Amount must be positive, got {}",
                self.amount
            )));
        }
        if self.debit_account.is_empty() || self.credit_account.is_empty() {
            return Err(Error::InvalidRequest("Account reference is blank".to_string()));
        }
        if self.debit_account == self.credit_account {
            return Err(Error::InvalidRequest(format!(
                "Debit and credit account are both {}",
                self.debit_account
            )));
        }
        if let Some(group) = &self.netting_group {
            if group.trim().is_empty() {
                return Err(Error::InvalidRequest("Netting group is blank".to_string()));
            }
        }
        Ok(())
    }

    /// Netting group key (explicit group, else one group per currency)
    pub fn netting_group_key(&self) -> String {
        self.netting_group
            .clone()
            .unwrap_or_else(|| format!("default-{}", self.currency))
    }

    /// Resource keys touched, in canonical lock order
    pub fn resource_keys(&self) -> Vec<ResourceKey> {
        let mut keys = vec![
            ResourceKey::new(self.debit_account.clone(), self.currency),
            ResourceKey::new(self.credit_account.clone(), self.currency),
        ];
        keys.sort();
        keys.dedup();
        keys
    }
}

/// Net position of one participant in a closed cycle
///
/// Positive `net_amount` means the participant owes the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetPosition {
    /// Participant account
    pub participant: AccountId,

    /// Currency
    pub currency: Currency,

    /// Signed net amount
    pub net_amount: Decimal,
}

impl NetPosition {
    /// Participant must pay the hub
    pub fn is_net_payer(&self) -> bool {
        self.net_amount > Decimal::ZERO
    }

    /// Hub owes the participant
    pub fn is_net_receiver(&self) -> bool {
        self.net_amount < Decimal::ZERO
    }
}

/// Outcome of one participant's net settlement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetSettlementOutcome {
    /// Participant account
    pub participant: AccountId,

    /// Net amount settled (always positive)
    pub amount: Decimal,

    /// Settlement carrying the net movement
    pub settlement_id: SettlementId,

    /// Final status
    pub status: SettlementStatus,

    /// Failure reason, if any
    pub failure_reason: Option<String>,
}

/// Netting detail attached to the result that closed a cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NettingResult {
    /// Cycle ID
    pub cycle_id: Uuid,

    /// Netting group
    pub netting_group: String,

    /// Σ|amount| over the cycle members
    pub gross_amount: Decimal,

    /// Σ positive net positions
    pub net_amount: Decimal,

    /// 1 − net / gross
    pub efficiency_ratio: f64,

    /// Number of participants with a position
    pub participant_count: usize,

    /// Every position, hub included
    pub positions: Vec<NetPosition>,

    /// Per-participant outcomes
    pub net_settlements: Vec<NetSettlementOutcome>,
}

/// Result of one settlement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementResult {
    /// Settlement ID
    pub settlement_id: SettlementId,

    /// Originating request ID
    pub request_id: Uuid,

    /// Settlement type
    pub settlement_type: SettlementType,

    /// Status
    pub status: SettlementStatus,

    /// Amount requested
    pub amount: Decimal,

    /// Currency
    pub currency: Currency,

    /// Admission time
    pub started_at: DateTime<Utc>,

    /// Terminal time
    pub finished_at: Option<DateTime<Utc>>,

    /// Wall-clock latency in milliseconds
    pub latency_ms: f64,

    /// Failure classification
    pub failure_kind: Option<FailureKind>,

    /// Failure reason (empty when Completed)
    pub failure_reason: Option<String>,

    /// Ledger transfer reference
    pub transfer_reference: Option<String>,

    /// Scheduling path chosen for the request
    pub processing_path: Option<ProcessingPath>,

    /// Fallback route used, if any
    pub route: Option<String>,

    /// Execution attempts made
    pub attempts: u32,

    /// Netting detail (set on the request that closed a cycle)
    pub netting: Option<NettingResult>,

    /// Settlement this one compensates
    pub reversal_of: Option<SettlementId>,
}

impl SettlementResult {
    /// Fresh Pending result for an admitted request
    pub fn pending(request: &SettlementRequest) -> Self {
        Self {
            settlement_id: Uuid::now_v7(),
            request_id: request.request_id,
            settlement_type: request.settlement_type,
            status: SettlementStatus::Pending,
            amount: request.amount,
            currency: request.currency,
            started_at: Utc::now(),
            finished_at: None,
            latency_ms: 0.0,
            failure_kind: None,
            failure_reason: None,
            transfer_reference: None,
            processing_path: None,
            route: None,
            attempts: 0,
            netting: None,
            reversal_of: None,
        }
    }

    /// Move to a new status, ignoring illegal transitions
    pub fn transition(&mut self, next: SettlementStatus) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                "Ignoring illegal transition {:?} -> {:?} for settlement {}",
                self.status,
                next,
                self.settlement_id
            );
            return false;
        }
        self.status = next;
        true
    }

    /// Mark Completed and stamp the end time
    pub fn complete(&mut self) {
        if self.transition(SettlementStatus::Completed) {
            self.failure_kind = None;
            self.failure_reason = None;
            self.finish();
        }
    }

    /// Mark Failed with a classified reason
    pub fn fail(&mut self, error: &Error) {
        self.fail_with(error.kind(), error.to_string());
    }

    /// Mark Failed with an explicit classification
    pub fn fail_with(&mut self, kind: FailureKind, reason: impl Into<String>) {
        if self.transition(SettlementStatus::Failed) {
            self.failure_kind = Some(kind);
            self.failure_reason = Some(reason.into());
            self.finish();
        }
    }

    /// Stamp the end time; never earlier than the start time
    fn finish(&mut self) {
        let now = Utc::now().max(self.started_at);
        self.latency_ms = (now - self.started_at)
            .num_microseconds()
            .map(|us| us as f64 / 1000.0)
            .unwrap_or(0.0);
        self.finished_at = Some(now);
    }
}

/// Per-item failure detail in a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItemError {
    /// Request ID
    pub request_id: Uuid,

    /// Failure classification
    pub kind: FailureKind,

    /// Human-readable reason
    pub message: String,
}

/// Result of a batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    /// Batch ID
    pub batch_id: Uuid,

    /// Requests submitted
    pub total_settlements: usize,

    /// Completed settlements
    pub success_count: usize,

    /// Failed settlements
    pub failure_count: usize,

    /// Accepted but not yet terminal (open netting cycles)
    pub pending_count: usize,

    /// Start time
    pub started_at: DateTime<Utc>,

    /// End time
    pub finished_at: DateTime<Utc>,

    /// Wall-clock processing time in milliseconds
    pub processing_time_ms: f64,

    /// Mean per-settlement latency in milliseconds
    pub average_latency_ms: f64,

    /// Per-item results, in input order
    pub results: Vec<SettlementResult>,

    /// Per-item errors
    pub errors: Vec<BatchItemError>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_request_validation() {
        let ok = SettlementRequest::new("X", "Y", dec!(100), Currency::USD);
        assert!(ok.validate().is_ok());

        let zero = SettlementRequest::new("X", "Y", Decimal::ZERO, Currency::USD);
        assert!(matches!(zero.validate(), Err(Error::InvalidRequest(_))));

        let negative = SettlementRequest::new("X", "Y", dec!(-1), Currency::USD);
        assert!(negative.validate().is_err());

        let same = SettlementRequest::new("X", "X", dec!(1), Currency::USD);
        assert!(same.validate().is_err());

        let blank = SettlementRequest::new("", "Y", dec!(1), Currency::USD);
        assert!(blank.validate().is_err());

        let blank_group =
            SettlementRequest::new("X", "Y", dec!(1), Currency::USD).with_netting_group(" ");
        assert!(blank_group.validate().is_err());
    }

    #[test]
    fn test_resource_keys_are_canonical() {
        let ab = SettlementRequest::new("A", "B", dec!(1), Currency::EUR);
        let ba = SettlementRequest::new("B", "A", dec!(1), Currency::EUR);

        assert_eq!(ab.resource_keys(), ba.resource_keys());
        assert_eq!(ab.resource_keys()[0].account.as_str(), "A");
    }

    #[test]
    fn test_status_transitions() {
        use SettlementStatus::*;

        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Completed.can_transition_to(Reversed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Reversed.can_transition_to(Completed));
        assert!(Failed.is_terminal());
        assert!(!Queued.is_terminal());
    }

    #[test]
    fn test_result_lifecycle() {
        let request = SettlementRequest::new("X", "Y", dec!(5), Currency::GBP);
        let mut result = SettlementResult::pending(&request);
        assert_eq!(result.status, SettlementStatus::Pending);

        result.transition(SettlementStatus::Processing);
        result.complete();

        assert_eq!(result.status, SettlementStatus::Completed);
        assert!(result.failure_reason.is_none());
        assert!(result.finished_at.unwrap() >= result.started_at);

        // Terminal: a late failure is ignored
        result.fail(&Error::Technical("late".into()));
        assert_eq!(result.status, SettlementStatus::Completed);
    }

    #[test]
    fn test_default_netting_group() {
        let request = SettlementRequest::new("X", "HUB", dec!(5), Currency::AED)
            .with_type(SettlementType::Net);
        assert_eq!(request.netting_group_key(), "default-AED");
    }
}

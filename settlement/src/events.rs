//! Settlement events
//!
//! Completion and failure events go out on a broadcast channel. Publishing
//! never blocks: without subscribers the event is dropped, and a slow
//! subscriber loses the oldest events.

use crate::types::{Currency, FailureKind, SettlementId, SettlementResult, SettlementStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

/// Event emitted when a settlement changes state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementEvent {
    /// Settlement ID
    pub settlement_id: SettlementId,

    /// Request ID
    pub request_id: Uuid,

    /// Status reached
    pub status: SettlementStatus,

    /// Amount
    pub amount: Decimal,

    /// Currency
    pub currency: Currency,

    /// Latency in milliseconds
    pub latency_ms: f64,

    /// Failure classification
    pub failure_kind: Option<FailureKind>,

    /// Emitted at
    pub emitted_at: DateTime<Utc>,
}

impl From<&SettlementResult> for SettlementEvent {
    fn from(result: &SettlementResult) -> Self {
        Self {
            settlement_id: result.settlement_id,
            request_id: result.request_id,
            status: result.status,
            amount: result.amount,
            currency: result.currency,
            latency_ms: result.latency_ms,
            failure_kind: result.failure_kind,
            emitted_at: Utc::now(),
        }
    }
}

/// Best-effort event publisher
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<SettlementEvent>,
}

impl EventPublisher {
    /// Create publisher with a bounded channel
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SettlementEvent> {
        self.sender.subscribe()
    }

    /// Publish a result; returns the number of subscribers reached
    pub fn publish(&self, result: &SettlementResult) -> usize {
        match self.sender.send(SettlementEvent::from(result)) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!("No subscribers for settlement {}", result.settlement_id);
                0
            }
        }
    }
}

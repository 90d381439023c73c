//! Settlement queue
//!
//! Holds requests deferred by backpressure or submitted as Batch/Deferred.
//! Entries drain by priority, FIFO within a priority, and expire at their
//! processing deadline.

use crate::{
    types::{SettlementId, SettlementRequest},
    Error, Result,
};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use tracing::debug;

/// Queued request
#[derive(Debug, Clone)]
pub struct QueuedSettlement {
    /// Settlement tracking the request
    pub settlement_id: SettlementId,

    /// Request
    pub request: SettlementRequest,

    /// Enqueued at
    pub enqueued_at: DateTime<Utc>,

    /// Processing deadline
    pub deadline: DateTime<Utc>,

    /// Arrival order
    sequence: u64,
}

impl QueuedSettlement {
    /// Deadline passed at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }
}

impl PartialEq for QueuedSettlement {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}

impl Eq for QueuedSettlement {}

impl PartialOrd for QueuedSettlement {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedSettlement {
    // Max-heap: higher priority first, then earlier arrival
    fn cmp(&self, other: &Self) -> Ordering {
        self.request
            .priority
            .rank()
            .cmp(&other.request.priority.rank())
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Drained entries
#[derive(Debug, Default)]
pub struct Drained {
    /// Still within their deadline, in processing order
    pub ready: Vec<QueuedSettlement>,

    /// Past their deadline
    pub expired: Vec<QueuedSettlement>,
}

/// Bounded priority queue
#[derive(Debug)]
pub struct SettlementQueue {
    heap: Mutex<BinaryHeap<QueuedSettlement>>,
    capacity: usize,
    deadline: Duration,
    sequence: AtomicU64,
}

impl SettlementQueue {
    /// Create queue
    pub fn new(capacity: usize, deadline_ms: u64) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            capacity,
            deadline: Duration::milliseconds(deadline_ms as i64),
            sequence: AtomicU64::new(0),
        }
    }

    /// Enqueue; fails when the queue is full
    pub fn push(&self, settlement_id: SettlementId, request: SettlementRequest) -> Result<DateTime<Utc>> {
        let mut heap = self.heap.lock();
        if heap.len() >= self.capacity {
            return Err(Error::Technical(format!(
                "Settlement queue full ({} entries)",
                self.capacity
            )));
        }

        let enqueued_at = Utc::now();
        let deadline = enqueued_at + self.deadline;
        heap.push(QueuedSettlement {
            settlement_id,
            request,
            enqueued_at,
            deadline,
            sequence: self.sequence.fetch_add(1, AtomicOrdering::Relaxed),
        });

        debug!("Queued settlement {} ({} waiting)", settlement_id, heap.len());
        Ok(deadline)
    }

    /// Take up to `max` entries, splitting off the expired ones
    pub fn drain(&self, max: usize) -> Drained {
        let now = Utc::now();
        let mut heap = self.heap.lock();
        let mut drained = Drained::default();

        while drained.ready.len() + drained.expired.len() < max {
            let Some(entry) = heap.pop() else {
                break;
            };
            if entry.is_expired(now) {
                drained.expired.push(entry);
            } else {
                drained.ready.push(entry);
            }
        }

        drained
    }

    /// Entries waiting
    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    /// No entries waiting
    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Currency, SettlementPriority};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn request(priority: SettlementPriority, reference: &str) -> SettlementRequest {
        SettlementRequest::new("X", "Y", dec!(1), Currency::USD)
            .with_priority(priority)
            .with_reference(reference)
    }

    #[test]
    fn test_priority_then_fifo() {
        let queue = SettlementQueue::new(10, 60_000);
        queue.push(Uuid::new_v4(), request(SettlementPriority::Low, "low")).unwrap();
        queue.push(Uuid::new_v4(), request(SettlementPriority::Normal, "n1")).unwrap();
        queue.push(Uuid::new_v4(), request(SettlementPriority::Critical, "crit")).unwrap();
        queue.push(Uuid::new_v4(), request(SettlementPriority::Normal, "n2")).unwrap();

        let drained = queue.drain(10);
        let order: Vec<&str> = drained.ready.iter().map(|q| q.request.reference.as_str()).collect();
        assert_eq!(order, vec!["crit", "n1", "n2", "low"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_capacity() {
        let queue = SettlementQueue::new(1, 60_000);
        queue.push(Uuid::new_v4(), request(SettlementPriority::Normal, "a")).unwrap();
        assert!(queue.push(Uuid::new_v4(), request(SettlementPriority::Normal, "b")).is_err());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_expired_entries_split_off() {
        let queue = SettlementQueue::new(10, 0);
        queue.push(Uuid::new_v4(), request(SettlementPriority::Normal, "a")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));

        let drained = queue.drain(10);
        assert!(drained.ready.is_empty());
        assert_eq!(drained.expired.len(), 1);
    }

    #[test]
    fn test_drain_respects_max() {
        let queue = SettlementQueue::new(10, 60_000);
        for i in 0..5 {
            queue
                .push(Uuid::new_v4(), request(SettlementPriority::Normal, &i.to_string()))
                .unwrap();
        }
        assert_eq!(queue.drain(2).ready.len(), 2);
        assert_eq!(queue.len(), 3);
    }
}

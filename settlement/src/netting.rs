//! Multilateral netting through a hub account
//!
//! Net requests accumulate in one open cycle per netting group. When a cycle
//! reaches its member or age threshold it is closed, net positions are
//! computed, and every participant with a positive position settles once
//! against the group's hub.
//!
//! # Example
//!
//! ```text
//! Gross obligations:
//!   A owes B: $100
//!   B owes C: $80
//!   C owes A: $50
//!
//! Net positions (positive = owes the hub):
//!   A: +$50
//!   B: -$20
//!   C: -$30
//!
//! Net settlements:
//!   A pays HUB: $50
//!
//! Efficiency: 1 - 50 / 230 = 78%
//! ```

use crate::{
    config::NettingConfig,
    types::{AccountId, Currency, NetPosition, SettlementId, SettlementRequest, SettlementType},
    Error, Result,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Cycle lifecycle (monotonic)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleStatus {
    /// Accepting members
    Open,
    /// Closed, net settlements running
    Processing,
    /// Net settlements done
    Completed,
}

/// Request admitted into a cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleMember {
    /// Settlement tracking this member
    pub settlement_id: SettlementId,

    /// Original request
    pub request: SettlementRequest,
}

/// Netting cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NettingCycle {
    /// Cycle ID
    pub cycle_id: Uuid,

    /// Netting group
    pub netting_group: String,

    /// Hub account positions settle against
    pub hub_account: AccountId,

    /// Status
    pub status: CycleStatus,

    /// Members, in admission order
    pub members: Vec<CycleMember>,

    /// Opened at
    pub started_at: DateTime<Utc>,

    /// Closed at
    pub closed_at: Option<DateTime<Utc>>,

    /// Completed at
    pub completed_at: Option<DateTime<Utc>>,
}

impl NettingCycle {
    fn open(group: &str, hub_account: AccountId) -> Self {
        Self {
            cycle_id: Uuid::now_v7(),
            netting_group: group.to_string(),
            hub_account,
            status: CycleStatus::Open,
            members: Vec::new(),
            started_at: Utc::now(),
            closed_at: None,
            completed_at: None,
        }
    }

    /// Σ|amount| over the members
    pub fn gross_amount(&self) -> Decimal {
        self.members.iter().map(|m| m.request.amount.abs()).sum()
    }
}

/// Outcome of admitting a request
#[derive(Debug)]
pub struct Admission {
    /// Cycle the request joined
    pub cycle_id: Uuid,

    /// Members after admission
    pub member_count: usize,

    /// The cycle, if admission closed it
    pub closed: Option<NettingCycle>,
}

/// Netting engine
#[derive(Debug)]
pub struct NettingEngine {
    /// Open cycle per group, each behind its own mutex
    cycles: DashMap<String, Arc<Mutex<NettingCycle>>>,

    /// Completed cycles, oldest first
    archive: Mutex<VecDeque<NettingCycle>>,

    /// Policy
    config: NettingConfig,
}

impl NettingEngine {
    /// Create new netting engine
    pub fn new(config: NettingConfig) -> Self {
        Self {
            cycles: DashMap::new(),
            archive: Mutex::new(VecDeque::new()),
            config,
        }
    }

    /// Policy in force
    pub fn config(&self) -> &NettingConfig {
        &self.config
    }

    /// Snapshot of the open cycle for a group
    pub fn get_current_cycle(&self, group: &str) -> Option<NettingCycle> {
        let handle = self.cycles.get(group).map(|c| Arc::clone(c.value()))?;
        let cycle = handle.lock().clone();
        Some(cycle)
    }

    /// Open a cycle for the group unless one is already open
    pub fn create_netting_cycle(&self, group: &str) -> Uuid {
        let cycle = self
            .cycles
            .entry(group.to_string())
            .or_insert_with(|| {
                let hub = AccountId::new(self.config.hub_for_group(group));
                let cycle = NettingCycle::open(group, hub);
                info!(
                    "Netting cycle {} opened for group {} (hub {})",
                    cycle.cycle_id, group, cycle.hub_account
                );
                Arc::new(Mutex::new(cycle))
            })
            .value()
            .clone();
        let cycle_id = cycle.lock().cycle_id;
        cycle_id
    }

    /// Append a member to the group's open cycle `cycle_id`
    pub fn add_settlement(
        &self,
        group: &str,
        cycle_id: Uuid,
        settlement_id: SettlementId,
        request: SettlementRequest,
    ) -> Result<usize> {
        let cycle = self
            .cycles
            .get(group)
            .map(|c| Arc::clone(c.value()))
            .ok_or_else(|| Error::InvalidState(format!("No open cycle for group {}", group)))?;

        let mut cycle = cycle.lock();
        if cycle.cycle_id != cycle_id || cycle.status != CycleStatus::Open {
            return Err(Error::InvalidState(format!(
                "Cycle {} is not open for new members",
                cycle_id
            )));
        }

        cycle.members.push(CycleMember {
            settlement_id,
            request,
        });
        debug!(
            "Cycle {} now holds {} members",
            cycle.cycle_id,
            cycle.members.len()
        );
        Ok(cycle.members.len())
    }

    /// Member-count or age threshold reached
    pub fn should_process(&self, cycle: &NettingCycle) -> bool {
        if cycle.status != CycleStatus::Open || cycle.members.is_empty() {
            return false;
        }
        let age = Utc::now() - cycle.started_at;
        cycle.members.len() >= self.config.max_members
            || age >= Duration::milliseconds(self.config.max_cycle_age_ms as i64)
    }

    /// Admit a request into its group's cycle, closing the cycle if due
    ///
    /// Membership change and the close decision happen under the cycle's
    /// mutex, so a member is never added to a cycle that is being closed.
    pub fn admit(&self, settlement_id: SettlementId, request: SettlementRequest) -> Result<Admission> {
        if request.settlement_type != SettlementType::Net {
            return Err(Error::InvalidRequest(format!(
                "Request {} is not a net settlement",
                request.request_id
            )));
        }

        let group = request.netting_group_key();
        loop {
            self.create_netting_cycle(&group);
            let Some(handle) = self.cycles.get(&group).map(|c| Arc::clone(c.value())) else {
                continue;
            };

            let mut cycle = handle.lock();
            if cycle.status != CycleStatus::Open {
                // Lost a race with a close; the next pass opens a fresh cycle
                drop(cycle);
                self.cycles
                    .remove_if(&group, |_, current| Arc::ptr_eq(current, &handle));
                continue;
            }

            cycle.members.push(CycleMember {
                settlement_id,
                request: request.clone(),
            });
            let cycle_id = cycle.cycle_id;
            let member_count = cycle.members.len();

            let closed = if self.should_process(&cycle) {
                Some(self.close_locked(&group, &handle, &mut cycle))
            } else {
                None
            };

            return Ok(Admission {
                cycle_id,
                member_count,
                closed,
            });
        }
    }

    fn close_locked(
        &self,
        group: &str,
        handle: &Arc<Mutex<NettingCycle>>,
        cycle: &mut NettingCycle,
    ) -> NettingCycle {
        cycle.status = CycleStatus::Processing;
        cycle.closed_at = Some(Utc::now());
        self.cycles
            .remove_if(group, |_, current| Arc::ptr_eq(current, handle));

        info!(
            "Netting cycle {} closed with {} members (gross {})",
            cycle.cycle_id,
            cycle.members.len(),
            cycle.gross_amount()
        );
        cycle.clone()
    }

    /// Close the group's open cycle regardless of thresholds
    pub fn close_cycle(&self, group: &str) -> Option<NettingCycle> {
        let handle = self.cycles.get(group).map(|c| Arc::clone(c.value()))?;
        let mut cycle = handle.lock();
        if cycle.status != CycleStatus::Open || cycle.members.is_empty() {
            return None;
        }
        Some(self.close_locked(group, &handle, &mut cycle))
    }

    /// Close every open cycle whose threshold is reached
    pub fn close_due_cycles(&self) -> Vec<NettingCycle> {
        let mut closed = Vec::new();

        for group in self.open_groups() {
            let Some(handle) = self.cycles.get(&group).map(|c| Arc::clone(c.value())) else {
                continue;
            };
            let mut cycle = handle.lock();
            if self.should_process(&cycle) {
                closed.push(self.close_locked(&group, &handle, &mut cycle));
            }
        }

        closed
    }

    /// Net position per participant and currency, hub included
    ///
    /// Positive means the participant owes the hub. Positions sum to zero.
    pub fn calculate_net_positions(&self, cycle: &NettingCycle) -> Vec<NetPosition> {
        let mut positions: BTreeMap<(AccountId, Currency), Decimal> = BTreeMap::new();

        for member in &cycle.members {
            let request = &member.request;
            *positions
                .entry((request.debit_account.clone(), request.currency))
                .or_insert(Decimal::ZERO) += request.amount;
            *positions
                .entry((request.credit_account.clone(), request.currency))
                .or_insert(Decimal::ZERO) -= request.amount;
        }

        positions
            .into_iter()
            .map(|((participant, currency), net_amount)| NetPosition {
                participant,
                currency,
                net_amount,
            })
            .collect()
    }

    /// Σ positive positions, hub excluded
    pub fn net_amount(&self, cycle: &NettingCycle, positions: &[NetPosition]) -> Decimal {
        positions
            .iter()
            .filter(|p| p.participant != cycle.hub_account && p.is_net_payer())
            .map(|p| p.net_amount)
            .sum()
    }

    /// 1 − net / gross
    pub fn get_efficiency_ratio(&self, cycle: &NettingCycle) -> f64 {
        let gross = cycle.gross_amount();
        if gross <= Decimal::ZERO {
            return 0.0;
        }
        let positions = self.calculate_net_positions(cycle);
        let net = self.net_amount(cycle, &positions);
        (Decimal::ONE - net / gross).to_f64().unwrap_or(0.0)
    }

    /// Instant requests carrying the net movements of a closed cycle
    ///
    /// Payers settle participant → hub. Receivables (hub → participant)
    /// are included only when configured, after every payer.
    pub fn net_settlement_requests(
        &self,
        cycle: &NettingCycle,
        positions: &[NetPosition],
    ) -> Vec<(NetPosition, SettlementRequest)> {
        let to_request = |debit: &AccountId, credit: &AccountId, position: &NetPosition| {
            SettlementRequest::new(
                debit.as_str(),
                credit.as_str(),
                position.net_amount.abs(),
                position.currency,
            )
            .with_reference(format!("net-{}", cycle.cycle_id))
            .with_metadata("netting_cycle", cycle.cycle_id.to_string())
            .with_metadata("netting_group", cycle.netting_group.clone())
        };

        let participants = positions
            .iter()
            .filter(|p| p.participant != cycle.hub_account);

        let mut requests: Vec<(NetPosition, SettlementRequest)> = participants
            .clone()
            .filter(|p| p.is_net_payer())
            .map(|p| (p.clone(), to_request(&p.participant, &cycle.hub_account, p)))
            .collect();

        if self.config.settle_receivables {
            requests.extend(
                participants
                    .filter(|p| p.is_net_receiver())
                    .map(|p| (p.clone(), to_request(&cycle.hub_account, &p.participant, p))),
            );
        }

        requests
    }

    /// Mark a closed cycle Completed and archive it
    pub fn complete_cycle(&self, mut cycle: NettingCycle) -> Result<NettingCycle> {
        if cycle.status != CycleStatus::Processing {
            return Err(Error::InvalidState(format!(
                "Cycle {} is {:?}, expected Processing",
                cycle.cycle_id, cycle.status
            )));
        }
        cycle.status = CycleStatus::Completed;
        cycle.completed_at = Some(Utc::now());

        let mut archive = self.archive.lock();
        archive.push_back(cycle.clone());
        while archive.len() > self.config.archive_size {
            archive.pop_front();
        }

        info!("Netting cycle {} completed", cycle.cycle_id);
        Ok(cycle)
    }

    /// Completed cycles, oldest first
    pub fn completed_cycles(&self) -> Vec<NettingCycle> {
        self.archive.lock().iter().cloned().collect()
    }

    /// Number of open cycles
    pub fn open_cycles(&self) -> usize {
        self.cycles.len()
    }

    /// Groups with an open cycle
    pub fn open_groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = self.cycles.iter().map(|e| e.key().clone()).collect();
        groups.sort();
        groups
    }
}

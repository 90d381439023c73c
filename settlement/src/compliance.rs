//! Compliance gate consulted at admission
//!
//! Screening itself (sanctions, KYC) lives outside the settlement core; the
//! core only needs a verdict. Anything but [`ComplianceVerdict::Allow`]
//! fails the settlement as a compliance failure.

use crate::types::{AccountId, SettlementRequest};
use async_trait::async_trait;
use dashmap::DashSet;
use serde::{Deserialize, Serialize};

/// Screening verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComplianceVerdict {
    /// Cleared
    Allow,
    /// Refused
    Block(String),
    /// Held for manual review
    Review(String),
}

impl ComplianceVerdict {
    /// Cleared for settlement
    pub fn is_allowed(&self) -> bool {
        matches!(self, ComplianceVerdict::Allow)
    }
}

/// Compliance gate
#[async_trait]
pub trait ComplianceGate: Send + Sync + std::fmt::Debug {
    /// Screen a request
    async fn screen(&self, request: &SettlementRequest) -> ComplianceVerdict;
}

/// Gate that clears everything
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl ComplianceGate for AllowAll {
    async fn screen(&self, _request: &SettlementRequest) -> ComplianceVerdict {
        ComplianceVerdict::Allow
    }
}

/// Gate screening accounts against block and review lists
#[derive(Debug, Default)]
pub struct BlocklistGate {
    blocked: DashSet<AccountId>,
    review: DashSet<AccountId>,
}

impl BlocklistGate {
    /// Empty lists
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse settlements touching `account`
    pub fn block(&self, account: impl Into<String>) {
        self.blocked.insert(AccountId::new(account));
    }

    /// Hold settlements touching `account` for review
    pub fn hold_for_review(&self, account: impl Into<String>) {
        self.review.insert(AccountId::new(account));
    }

    /// Clear `account` from both lists
    pub fn clear(&self, account: &AccountId) {
        self.blocked.remove(account);
        self.review.remove(account);
    }
}

#[async_trait]
impl ComplianceGate for BlocklistGate {
    async fn screen(&self, request: &SettlementRequest) -> ComplianceVerdict {
        for account in [&request.debit_account, &request.credit_account] {
            if self.blocked.contains(account) {
                return ComplianceVerdict::Block(format!("Account {} is blocked", account));
            }
        }
        for account in [&request.debit_account, &request.credit_account] {
            if self.review.contains(account) {
                return ComplianceVerdict::Review(format!("Account {} is under review", account));
            }
        }
        ComplianceVerdict::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Currency;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_blocklist_verdicts() {
        let gate = BlocklistGate::new();
        gate.block("SANCTIONED");
        gate.hold_for_review("NEW-CLIENT");

        let blocked = SettlementRequest::new("X", "SANCTIONED", dec!(1), Currency::USD);
        let review = SettlementRequest::new("NEW-CLIENT", "Y", dec!(1), Currency::USD);
        let clean = SettlementRequest::new("X", "Y", dec!(1), Currency::USD);

        assert!(matches!(gate.screen(&blocked).await, ComplianceVerdict::Block(_)));
        assert!(matches!(gate.screen(&review).await, ComplianceVerdict::Review(_)));
        assert!(gate.screen(&clean).await.is_allowed());

        gate.clear(&AccountId::new("SANCTIONED"));
        assert!(gate.screen(&blocked).await.is_allowed());
    }

    #[tokio::test]
    async fn test_allow_all() {
        let request = SettlementRequest::new("X", "Y", dec!(1), Currency::USD);
        assert_eq!(AllowAll.screen(&request).await, ComplianceVerdict::Allow);
    }
}

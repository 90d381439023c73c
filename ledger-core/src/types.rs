//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic ordering (resource keys sort by account, then currency)
//! - Memory safety (no unsafe code)
//! - Exact arithmetic (Decimal for money)

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Account identifier (IBAN, account number, hub account, etc.)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the identifier is blank
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// ISO 4217 currency code
///
/// Variant order is the canonical currency order used when sorting
/// lock keys, so it must never be reshuffled.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[non_exhaustive]
pub enum Currency {
    /// US Dollar
    USD,
    /// Euro
    EUR,
    /// British Pound
    GBP,
    /// UAE Dirham
    AED,
    /// Indian Rupee
    INR,
}

impl Currency {
    /// Every supported currency
    pub const ALL: [Currency; 5] = [
        Currency::USD,
        Currency::EUR,
        Currency::GBP,
        Currency::AED,
        Currency::INR,
    ];

    /// ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
            Currency::AED => "AED",
            Currency::INR => "INR",
        }
    }
}

impl FromStr for Currency {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::USD),
            "EUR" => Ok(Currency::EUR),
            "GBP" => Ok(Currency::GBP),
            "AED" => Ok(Currency::AED),
            "INR" => Ok(Currency::INR),
            other => Err(crate::Error::InvalidUpdate(format!(
                "Unknown currency code '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Ledger transaction identifier
///
/// Updates staged under a transaction stay invisible until the
/// transaction commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Allocate a fresh, time-ordered transaction ID
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Signed balance delta against one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceUpdate {
    /// Account to mutate
    pub account: AccountId,

    /// Currency of the delta
    pub currency: Currency,

    /// Signed amount (negative = debit, positive = credit)
    pub amount: Decimal,

    /// Settlement reference the delta belongs to
    pub reference: String,
}

impl BalanceUpdate {
    /// Debit `amount` from `account`
    pub fn debit(
        account: AccountId,
        currency: Currency,
        amount: Decimal,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            account,
            currency,
            amount: -amount,
            reference: reference.into(),
        }
    }

    /// Credit `amount` to `account`
    pub fn credit(
        account: AccountId,
        currency: Currency,
        amount: Decimal,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            account,
            currency,
            amount,
            reference: reference.into(),
        }
    }

    /// Balanced debit/credit pair for a transfer
    pub fn transfer_pair(
        debit: &AccountId,
        credit: &AccountId,
        currency: Currency,
        amount: Decimal,
        reference: &str,
    ) -> [BalanceUpdate; 2] {
        [
            Self::debit(debit.clone(), currency, amount, reference),
            Self::credit(credit.clone(), currency, amount, reference),
        ]
    }
}

/// Net sum of a set of updates per currency (zero for a balanced set)
pub fn net_delta(updates: &[BalanceUpdate], currency: Currency) -> Decimal {
    updates
        .iter()
        .filter(|u| u.currency == currency)
        .map(|u| u.amount)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_parse() {
        assert_eq!("usd".parse::<Currency>().unwrap(), Currency::USD);
        assert_eq!(" EUR ".parse::<Currency>().unwrap(), Currency::EUR);
        assert!("XYZ".parse::<Currency>().is_err());
        assert!("".parse::<Currency>().is_err());
    }

    #[test]
    fn test_currency_order_is_stable() {
        let mut currencies = vec![Currency::INR, Currency::USD, Currency::GBP];
        currencies.sort();
        assert_eq!(currencies, vec![Currency::USD, Currency::GBP, Currency::INR]);
    }

    #[test]
    fn test_transfer_pair_is_balanced() {
        let pair = BalanceUpdate::transfer_pair(
            &AccountId::new("X"),
            &AccountId::new("Y"),
            Currency::USD,
            Decimal::new(10000, 2),
            "ref-1",
        );

        assert_eq!(pair[0].amount, Decimal::new(-10000, 2));
        assert_eq!(pair[1].amount, Decimal::new(10000, 2));
        assert_eq!(net_delta(&pair, Currency::USD), Decimal::ZERO);
    }

    #[test]
    fn test_account_id_blank() {
        assert!(AccountId::new("  ").is_empty());
        assert!(!AccountId::new("GB00HUB").is_empty());
    }
}

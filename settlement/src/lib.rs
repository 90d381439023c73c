//! Settlement Engine
//!
//! Real-time settlement core for cross-border payments: gross settlement of
//! individual requests and multilateral netting, on top of an account
//! ledger with transactional staging.
//!
//! # Architecture
//!
//! 1. **Admission**: validate, check the currency, consult the compliance gate
//! 2. **Scheduling**: backpressure into a priority queue, optimizer hints
//! 3. **Liquidity**: check, provision and reserve against per-currency pools
//! 4. **Execution**: ordered resource locks, balanced updates, commit or roll back
//! 5. **Recovery**: retry, reroute or give up depending on the failure kind
//!
//! # Invariants
//!
//! - Money conservation: every committed update set sums to zero per currency
//! - Atomicity: a failed settlement leaves no partial balance change
//! - No deadlock: resource keys are always locked in canonical order
//! - Liquidity: reserved + available never exceeds the pool total
//!
//! # Example
//!
//! ```no_run
//! use ledger_core::InMemoryLedger;
//! use rust_decimal::Decimal;
//! use settlement::{Config, Currency, SettlementEngine, SettlementRequest};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> settlement::Result<()> {
//!     let config = Config::from_file("settlement.toml")?;
//!     let engine = SettlementEngine::new(config, Arc::new(InMemoryLedger::new()))?;
//!
//!     let request = SettlementRequest::new("BANK-A", "BANK-B", Decimal::new(10_000, 2), Currency::USD);
//!     let result = engine.process_realtime_settlement(request).await;
//!     println!("{} -> {:?}", result.settlement_id, result.status);
//!
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod atomic;
pub mod batch;
pub mod compliance;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod failover;
pub mod liquidity;
pub mod metrics;
pub mod netting;
pub mod optimizer;
pub mod queue;
pub mod types;

// Re-exports
pub use compliance::{AllowAll, BlocklistGate, ComplianceGate, ComplianceVerdict};
pub use config::Config;
pub use engine::SettlementEngine;
pub use error::{Error, Result};
pub use events::SettlementEvent;
pub use metrics::MetricsSnapshot;
pub use types::*;

//! Settlement node binary
//!
//! Runs the settlement engine over an in-process ledger with the
//! maintenance loop (cycle ageing, queue draining) until Ctrl-C.

use ledger_core::InMemoryLedger;
use settlement::{Config, SettlementEngine};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("SETTLEMENT_LOG_JSON").is_ok() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Starting settlement node");

    // Load configuration
    let config = if let Ok(config_path) = std::env::var("SETTLEMENT_CONFIG") {
        info!("Loading config from: {}", config_path);
        Config::from_file(&config_path)?
    } else {
        info!("Loading config from environment variables");
        Config::from_env()?
    };

    let interval = Duration::from_millis(config.service.maintenance_interval_ms);
    let pools: Vec<_> = config.liquidity.pools.iter().map(|p| p.currency).collect();

    let mut routes: Vec<String> = config
        .failover
        .fallback_routes
        .iter()
        .flat_map(|r| r.routes.iter().cloned())
        .collect();
    routes.sort();
    routes.dedup();

    let ledger = Arc::new(InMemoryLedger::new());
    let mut engine = SettlementEngine::new(config, ledger)?;
    // Each fallback route settles on its own in-process ledger
    for route in &routes {
        engine = engine.with_route(route.as_str(), Arc::new(InMemoryLedger::new()));
    }
    info!(
        "Settlement engine ready with pools {:?} and fallback routes {:?}",
        pools, routes
    );

    let maintenance = engine.run_maintenance(interval);

    signal::ctrl_c().await?;
    info!("Shutting down settlement node");

    maintenance.abort();
    let flushed = engine.flush_cycles().await;
    let snapshot = engine.get_metrics();
    info!(
        "Flushed {} netting cycles; final metrics: {}",
        flushed.len(),
        serde_json::to_string(&snapshot)?
    );

    Ok(())
}

//! Order monitor daemon.
//!
//! Wires the broker gateway, risk manager, and group store together and runs
//! the reconciliation loop until interrupted.

use anyhow::Result;
use kite_core::broker::KiteClient;
use kite_core::config::Config;
use kite_core::db::{self, OrderGroupRepository};
use order_monitor::OrderMonitor;
use risk_manager::RiskManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trading_engine::GroupStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "order_monitor=info,kite_core=info,hyper=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Order Monitor");

    let config = Config::from_env()?;

    let broker = Arc::new(KiteClient::new(&config.kite));

    let store = match &config.database {
        Some(db_config) => {
            let pool = db::create_pool(db_config).await?;
            db::run_migrations(&pool).await?;
            info!("Database persistence enabled");
            Arc::new(GroupStore::with_repository(OrderGroupRepository::new(pool)))
        }
        None => {
            info!("No DATABASE_URL set, running in-memory only");
            Arc::new(GroupStore::new())
        }
    };

    let risk = Arc::new(RiskManager::new(config.risk.clone()));

    let monitor = OrderMonitor::new(
        broker,
        store,
        risk,
        Duration::from_secs(config.monitor.poll_secs),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { monitor.run(shutdown_rx).await });

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, shutting down");
    shutdown_tx.send(true)?;
    handle.await??;

    Ok(())
}

//! pulsewatch - HTTP uptime watchdog.
//!
//! Probes a fixed set of targets on their own intervals, appends every
//! outcome to a SQLite store, and serves current and historical status
//! over an HTTP API.

mod config;
mod db;
mod probe;
mod scheduler;
mod status;
mod web;

use config::Config;
use db::Store;
use probe::HttpProber;
use scheduler::Scheduler;
use status::StatusService;
use web::Server;

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pulsewatch=info".parse()?),
        )
        .init();

    // Load configuration; any problem here is fatal
    let cfg = Arc::new(Config::load()?);
    tracing::info!("starting pulsewatch on port {}", cfg.http_port);
    tracing::info!(
        "monitoring {} targets from {}",
        cfg.targets.len(),
        cfg.targets_path
    );

    // Initialize storage
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("database initialized at {}", cfg.db_path);

    // Earlier runs may have recorded targets the current config dropped;
    // their history stays readable but is no longer extended.
    let recorded = store.all_targets_with_results()?;
    let stale = recorded
        .iter()
        .filter(|id| !cfg.targets.iter().any(|t| t.id == **id))
        .count();
    if stale > 0 {
        tracing::info!("store holds history for {} unconfigured targets", stale);
    }

    let status = Arc::new(StatusService::new(store.clone(), cfg.status_window));
    let prober = Arc::new(HttpProber::new()?);

    // Start the scheduler
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let scheduler = Scheduler::new(
        store.clone(),
        prober,
        cfg.targets.clone(),
        cfg.shutdown_grace,
    );
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

    // Serve the API until interrupted
    let server = Server::new(cfg, store, status);
    server
        .start(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    // Server is down; let the scheduler drain within its grace period
    let _ = shutdown_tx.send(());
    scheduler_task.await?;

    Ok(())
}

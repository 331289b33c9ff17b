//! Engine daemon: polls the search database and runs extractions until
//! interrupted.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rateshopper::config::EngineConfig;
use rateshopper::store::SqliteStore;
use rateshopper::supervisor::{BrowserSourceFactory, ExtractionSupervisor};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(EngineConfig::from_env());
    info!(
        database = %config.database_path().display(),
        poll_secs = config.poll_interval().as_secs(),
        headless = config.headless(),
        "starting rateshopper engine"
    );

    let store = Arc::new(
        SqliteStore::open(config.database_path())
            .await
            .context("failed to open search database")?,
    );
    let factory = Arc::new(BrowserSourceFactory::new(config.clone()));
    let supervisor = Arc::new(ExtractionSupervisor::new(
        config,
        store.clone(),
        store,
        factory,
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {e}");
            return;
        }
        info!("interrupt received, shutting down");
        let _ = shutdown_tx.send(true);
    });

    supervisor.run(shutdown_rx).await;
    info!("engine stopped");
    Ok(())
}

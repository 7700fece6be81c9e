//! rocd - real-time audio streaming daemon.
//!
//! Reconciles declared virtual audio stream devices against the host
//! audio subsystem and exposes them over a REST/event-stream API.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use rocd_daemon::config;
use rocd_daemon::server::{self, AppState};
use rocd_daemon::signals;
use rocd_daemon::streams::StreamManager;
use rocd_devices::DeviceManager;
use rocd_events::EventDispatcher;
use rocd_store::PersistStore;

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.daemon.log_level)),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "initializing daemon");

    let store = match &config.store.path {
        Some(path) => PersistStore::open_at(path.clone()),
        None => PersistStore::open(),
    }
    .context("failed to initialize storage")?;
    let store = Arc::new(store);

    let edisp = Arc::new(EventDispatcher::new());

    let shutdown = signals::shutdown_token()?;

    // No backend means no daemon; the HTTP listener is not opened.
    let devices = DeviceManager::open(
        Arc::clone(&store),
        Arc::clone(&edisp),
        shutdown.clone(),
    )
    .await
    .context("failed to initialize devices")?;

    let streams = Arc::new(StreamManager::new(
        Arc::clone(&store),
        Arc::clone(&devices),
    ));

    let state = AppState {
        devices,
        streams,
        edisp,
    };

    server::serve(state, &config.http.listen, shutdown).await?;

    info!("daemon stopped");
    Ok(())
}

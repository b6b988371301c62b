//! # beaconkit-server
//!
//! HTTP server for the beaconkit beacon proximity system.
//!
//! This binary provides:
//! - The proximity engine on the BlueZ radio (or the recording radio without
//!   the `bluetooth` feature)
//! - REST API for the proximity view, engine status and the watch list
//! - OpenAPI documentation via Swagger UI
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development, no Bluetooth hardware
//! cargo run --package beaconkit-server
//!
//! # Production on a BlueZ host
//! cargo build --release --package beaconkit-server --features bluetooth
//! BEACONKIT_ENV=production ./target/release/beaconkit-server
//! ```
//!
//! The configuration file is read from `BEACONKIT_CONFIG` if set, otherwise
//! from the platform default path.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::path::PathBuf;

use anyhow::Context;
use beaconkit_core::{default_config_path, spawn_engine, Config, EngineHandle, ProximityEngine};
use beaconkit_server::{api, logging, state::AppState};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    logging::init(logging::is_production())?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting beaconkit-server");

    let config_path = std::env::var_os("BEACONKIT_CONFIG")
        .map_or_else(default_config_path, PathBuf::from);
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    config.validate()?;
    info!(path = %config_path.display(), watch = config.watch.len(), "Configuration loaded");

    let engine = start_engine(&config).await?;
    engine.configure().await?;
    for constraint in &config.watch {
        let outcome = engine.watch(*constraint).await?;
        info!(region = %constraint, ?outcome, "Watching configured region");
    }

    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    info!("Listening on {}", listener.local_addr()?);

    let app = api::create_router(AppState::new(config, engine.clone()).shared());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down engine");
    if let Err(e) = engine.stop().await {
        warn!(error = %e, "Engine already stopped");
    }
    Ok(())
}

/// Start the engine on the BlueZ adapter.
#[cfg(feature = "bluetooth")]
async fn start_engine(config: &Config) -> anyhow::Result<EngineHandle> {
    use beaconkit_core::BluezRadio;

    let (radio, driver) = BluezRadio::connect(&config.radio).await?;
    let engine = ProximityEngine::new(config.beacon.clone(), radio);
    let (handle, sink, _task) = spawn_engine(engine, config.radio.event_queue_capacity);
    driver.spawn(sink);
    Ok(handle)
}

/// Start the engine on the recording radio, reported as powered on.
#[cfg(not(feature = "bluetooth"))]
async fn start_engine(config: &Config) -> anyhow::Result<EngineHandle> {
    use beaconkit_core::{MockRadio, PowerState, RadioEvent};

    warn!("Built without Bluetooth support, using the recording radio");
    let engine = ProximityEngine::new(config.beacon.clone(), MockRadio::authorized());
    let (handle, sink, _task) = spawn_engine(engine, config.radio.event_queue_capacity);
    sink.send(RadioEvent::PowerStateChanged(PowerState::PoweredOn))
        .await?;
    Ok(handle)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Ctrl-C received");
}

//! # Huddle Server
//!
//! Signaling server for multi-party WebRTC rooms.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! huddle
//!
//! # Run with a config file (huddle.toml in ./, /etc/huddle/ or ~/.config/huddle/)
//! huddle
//!
//! # Run with environment variables
//! HUDDLE_PORT=3000 HUDDLE_MEDIA__ANNOUNCED_IP=203.0.113.7 huddle
//!
//! # Signaling only, without a mediasoup worker
//! HUDDLE_MEDIA__ENGINE=loopback huddle
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::{Context, Result};
use crate::config::EngineKind;
use huddle_core::{LoopbackEngine, MediaEngine, MediasoupEngine, SessionManager};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle=debug,huddle_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    info!("Starting Huddle server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the media worker
    let engine: Arc<dyn MediaEngine> = match config.media.engine {
        EngineKind::Mediasoup => Arc::new(
            MediasoupEngine::new(config.mediasoup_config())
                .await
                .context("Failed to start the mediasoup worker")?,
        ),
        EngineKind::Loopback => {
            warn!("Loopback media engine selected, media will not flow");
            Arc::new(LoopbackEngine::new(config.loopback_config()))
        }
    };
    info!(worker = %engine.worker_id(), "Media worker created");
    supervise_worker(Arc::clone(&engine), config.worker_death_grace());

    let sessions = SessionManager::new(engine, config.session_config());
    let state = Arc::new(handlers::AppState::new(config, sessions));

    // Start the server
    handlers::run_server(state).await?;

    Ok(())
}

/// Exit the process once the media worker dies. Rooms cannot outlive their worker.
fn supervise_worker(engine: Arc<dyn MediaEngine>, grace: Duration) {
    tokio::spawn(async move {
        let reason = engine.died().await;
        error!(
            worker = %engine.worker_id(),
            reason = %reason,
            "Media worker died, exiting in {} ms",
            grace.as_millis()
        );
        tokio::time::sleep(grace).await;
        std::process::exit(1);
    });
}

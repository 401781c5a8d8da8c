//! Parla Server - Main Entry Point
//!
//! Room signaling relay and translated caption fan-out for two-party calls.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use parla_server::{api, captions, config, session::SessionHub};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parla_server=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        max_room_members = config.max_room_members,
        translator = config.has_translator(),
        "Starting Parla Server"
    );

    // Translation provider (falls back to pass-through only)
    let translator = captions::translator::from_config(&config)
        .context("Failed to build translation client")?;

    let hub = Arc::new(SessionHub::new(&config, translator));

    // Idle connection reaper
    let shutdown = CancellationToken::new();
    let sweep_interval = (config.idle_timeout / 4).max(Duration::from_secs(1));
    let reaper = hub
        .clone()
        .spawn_reaper(sweep_interval, config.idle_timeout, shutdown.clone());

    // Build router
    let state = api::AppState::new(config.clone(), hub);
    let app = api::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(address = %config.bind_address, "Server listening");

    // Graceful shutdown handler
    let shutdown_signal = {
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Received shutdown signal, cleaning up...");
            shutdown.cancel();
        }
    };

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await?;

    shutdown.cancel();
    let _ = reaper.await;

    info!("Server shutdown complete");

    Ok(())
}

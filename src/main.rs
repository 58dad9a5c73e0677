//! Flight Arena Server - Authoritative multiplayer flight simulation server
//!
//! This is the main entry point for the server. It handles:
//! - Loading the arena heightmap
//! - Running the fixed-rate arena tick loop
//! - WebSocket connections carrying binary control input and snapshots
//! - HTTP health endpoint

mod app;
mod config;
mod game;
mod http;
mod math;
mod util;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::game::{Arena, ArenaSettings, Terrain};
use crate::http::build_router;
use crate::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Flight Arena Server");
    info!("Server address: {}", config.server_addr);

    // Terrain is required, there is no degraded mode without it
    let terrain = Terrain::load_file(&config.terrain_path).with_context(|| {
        format!("failed to load terrain from {}", config.terrain_path.display())
    })?;
    info!(
        width = terrain.width(),
        depth = terrain.depth(),
        distance = terrain.distance(),
        "Terrain loaded"
    );

    // Spawn the arena task
    let (arena, arena_handle) = Arena::new(Arc::new(terrain), ArenaSettings::from_config(&config));
    let arena_task = tokio::spawn(arena.run());

    // Create application state
    let state = AppState::new(config.clone(), arena_handle.clone());

    // Build router
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the tick loop once connections are drained
    arena_handle.shutdown();
    arena_task.await.context("arena task panicked")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}

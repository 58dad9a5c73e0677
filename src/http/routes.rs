//! HTTP route definitions

use axum::{extract::State, response::Json, routing::get, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::app::AppState;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    players: usize,
    tick: u32,
    bullets: usize,
    snapshots_sent: u64,
    snapshot_bytes: u64,
    avg_players_per_snapshot: f32,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.arena.stats();

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        players: stats.players,
        tick: stats.tick,
        bullets: stats.bullets,
        snapshots_sent: stats.snapshots_sent,
        snapshot_bytes: stats.snapshot_bytes,
        avg_players_per_snapshot: stats.avg_players_per_snapshot,
    })
}

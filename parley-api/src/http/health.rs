//! Health check and status endpoints
//!
//! Provides simple health check for load balancers and monitors.

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;

use crate::http::AppState;

/// Service status with live room counters
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub rooms: usize,
    pub participants: usize,
}

/// Health check router
pub fn create_health_router() -> Router<AppState> {
    Router::new()
        .route("/", get(status))
        .route("/health", get(health_check))
}

/// Basic health check (always returns OK if server is running)
pub async fn health_check() -> impl IntoResponse {
    "OK"
}

pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let stats = state.registry.get_stats();
    Json(StatusResponse {
        status: "ok",
        message: "Parley API is running",
        rooms: stats.rooms,
        participants: stats.participants,
    })
}

// Module: http
// Status, health and websocket signaling routes

pub mod error;
pub mod health;
pub mod websocket;

use axum::{
    http::{HeaderValue, Method},
    routing::get,
    Router,
};
use parley_core::config::{ServerConfig, SignalingConfig};
use parley_core::Config;
use parley_sfu::RoomRegistry;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RoomRegistry>,
    pub signaling: SignalingConfig,
}

/// CORS policy for the configured origins
fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = server
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_credentials(true)
}

/// Create the HTTP router with all routes
pub fn create_router(registry: Arc<RoomRegistry>, config: &Config) -> axum::Router {
    let state = AppState {
        registry,
        signaling: config.signaling.clone(),
    };

    let router = Router::new()
        // Status and health check endpoints
        .merge(health::create_health_router())
        // WebSocket endpoint for signaling
        .route("/ws", get(websocket::websocket_handler));

    // Apply layers before state
    let router = router
        .layer(cors_layer(&config.server))
        .layer(TraceLayer::new_for_http());

    // Apply state to all routes (must be last)
    router.with_state(state)
}

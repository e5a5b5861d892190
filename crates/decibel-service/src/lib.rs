//! Ingestion server and HTTP API for ESP32 sound-level meters.
//!
//! This crate provides a service that:
//! - Accepts readings posted by sensors and replies with their LED state
//! - Switches a device's LED on when a reading exceeds its threshold
//! - Exposes a REST API for browsing, renaming and clearing devices
//! - Streams accepted readings over WebSocket
//! - Optional API key authentication and rate limiting
//!
//! # Endpoints
//!
//! - `POST /dados` - Sensor ingestion (no auth required)
//! - `GET /api/health` - Service health check (no auth required)
//! - `GET /api/dados` - List devices
//! - `GET /api/dados/{id}` - Most recent readings of a device
//! - `GET /api/devices/{id}/stats` - Record count and activity bounds
//! - `GET|POST /api/devices/{id}/led` - LED state
//! - `GET|POST /api/devices/{id}/threshold` - Auto-trigger threshold
//! - `PUT /api/devices/{id}` - Rename a device
//! - `DELETE /api/devices/{id}` - Delete a device
//! - `DELETE /api/devices/{id}/data` - Clear readings, keep control state
//! - `GET /api/devices/{id}/readings` - Paginated readings in a time window
//! - `GET /api/devices/{id}/export` - CSV export
//! - `WS /api/ws` - Real-time readings stream
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/decibel/server.toml`:
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:3333"
//!
//! [storage]
//! path = "~/.local/share/decibel/readings.db"
//! max_entries = 500
//!
//! [security]
//! # Require X-API-Key on dashboard endpoints
//! api_key_enabled = true
//! api_key = "your-secure-random-key-at-least-16-chars"
//!
//! # Rate limit requests per IP address
//! rate_limit_enabled = true
//! rate_limit_requests = 100
//! rate_limit_window_secs = 60
//! ```

pub mod api;
pub mod config;
pub mod middleware;
pub mod simulate;
pub mod state;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::{Config, ConfigError, SecurityConfig, ServerConfig, StorageConfig};
pub use state::{AppState, ReadingEvent};

/// Build the full application: API, WebSocket and security layers.
pub fn app(state: Arc<AppState>) -> Router {
    let security = Arc::clone(&state.security);

    Router::new()
        .merge(api::router())
        .merge(ws::router())
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&security),
            middleware::api_key_auth,
        ))
        .layer(axum::middleware::from_fn_with_state(
            security,
            middleware::rate_limit,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

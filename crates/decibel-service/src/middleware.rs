//! Security middleware for the HTTP API.
//!
//! - API key authentication for the dashboard endpoints
//! - Per-IP rate limiting
//!
//! Sensor ingestion (`POST /dados`) is exempt from both: ESP32 firmware
//! cannot carry a key and a dropped reading is lost for good.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use tracing::warn;

use crate::config::SecurityConfig;

/// Path the sensors post readings to.
pub const INGEST_PATH: &str = "/dados";
/// Health check path, open for monitoring.
pub const HEALTH_PATH: &str = "/api/health";

/// Security settings plus the rate limiter they drive.
#[derive(Debug)]
pub struct SecurityState {
    pub config: SecurityConfig,
    pub limiter: RateLimitState,
}

impl SecurityState {
    pub fn new(config: SecurityConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            limiter: RateLimitState::new(),
        })
    }
}

/// State for rate limiting.
#[derive(Debug, Default)]
pub struct RateLimitState {
    /// Request counts per IP address.
    requests: RwLock<HashMap<IpAddr, RateLimitEntry>>,
}

#[derive(Debug, Clone)]
struct RateLimitEntry {
    count: u32,
    window_start: Instant,
}

impl RateLimitState {
    /// Create a new rate limit state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a request from `ip`.
    ///
    /// Returns `Err((limit, retry_after_secs))` once the window is used up.
    pub async fn check_rate_limit(
        &self,
        ip: IpAddr,
        max_requests: u32,
        window_secs: u64,
    ) -> Result<(), (u32, u64)> {
        let window = Duration::from_secs(window_secs);
        let now = Instant::now();

        let mut requests = self.requests.write().await;
        let entry = requests.entry(ip).or_insert_with(|| RateLimitEntry {
            count: 0,
            window_start: now,
        });

        if now.duration_since(entry.window_start) >= window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count = entry.count.saturating_add(1);

        if entry.count > max_requests {
            let retry_after = window
                .checked_sub(now.duration_since(entry.window_start))
                .map(|d| d.as_secs())
                .unwrap_or(0);
            Err((max_requests, retry_after))
        } else {
            Ok(())
        }
    }

    /// Drop entries whose window expired long ago.
    pub async fn cleanup(&self, window_secs: u64) {
        let window = Duration::from_secs(window_secs);
        let now = Instant::now();

        let mut requests = self.requests.write().await;
        requests.retain(|_, entry| now.duration_since(entry.window_start) < window * 2);
    }

    /// Number of tracked client addresses.
    pub async fn tracked(&self) -> usize {
        self.requests.read().await.len()
    }
}

/// API key authentication middleware.
///
/// Accepts the key in the `X-API-Key` header, or as a `token` query
/// parameter for WebSocket upgrades, which browsers cannot add headers to.
/// Returns 401 when the key is missing or wrong.
pub async fn api_key_auth(
    State(security): State<Arc<SecurityState>>,
    request: Request,
    next: Next,
) -> Response {
    let config = &security.config;
    if !config.api_key_enabled || is_exempt(request.uri().path()) {
        return next.run(request).await;
    }

    let provided = request
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| request.uri().query().and_then(token_from_query));

    let valid = match (&config.api_key, provided) {
        (Some(expected), Some(provided)) => keys_match(expected, provided),
        _ => false,
    };

    if valid {
        next.run(request).await
    } else {
        warn!("API key authentication failed for {}", request.uri().path());
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": "Invalid or missing API key",
                "hint": "Provide a valid API key in the X-API-Key header or as a 'token' query parameter"
            })),
        )
            .into_response()
    }
}

/// Rate limiting middleware.
///
/// Requests without connection info (in-process tests) share one bucket.
pub async fn rate_limit(
    State(security): State<Arc<SecurityState>>,
    request: Request,
    next: Next,
) -> Response {
    let config = &security.config;
    if !config.rate_limit_enabled || is_exempt(request.uri().path()) {
        return next.run(request).await;
    }

    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    match security
        .limiter
        .check_rate_limit(
            ip,
            config.rate_limit_requests,
            config.rate_limit_window_secs,
        )
        .await
    {
        Ok(()) => next.run(request).await,
        Err((limit, retry_after)) => {
            warn!("Rate limit exceeded for {} on {}", ip, request.uri().path());
            (
                StatusCode::TOO_MANY_REQUESTS,
                [
                    ("Retry-After", retry_after.to_string()),
                    ("X-RateLimit-Limit", limit.to_string()),
                    ("X-RateLimit-Remaining", "0".to_string()),
                ],
                Json(serde_json::json!({
                    "error": "Too many requests",
                    "retry_after": retry_after
                })),
            )
                .into_response()
        }
    }
}

fn is_exempt(path: &str) -> bool {
    path == INGEST_PATH || path == HEALTH_PATH
}

fn token_from_query(query: &str) -> Option<&str> {
    query.split('&').find_map(|param| match param.split_once('=') {
        Some(("token", value)) => Some(value),
        _ => None,
    })
}

fn keys_match(expected: &str, provided: &str) -> bool {
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

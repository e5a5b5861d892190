//! Application state shared across handlers.
//!
//! # Broadcast Channel Behavior
//!
//! Every accepted ingestion is published on `readings_tx` for WebSocket
//! clients. The buffer size comes from `server.broadcast_buffer` (default
//! 100). Senders never block: a subscriber that falls behind loses the
//! oldest events and is told how many it skipped.
//!
//! # Storage Calls
//!
//! [`Store`] is synchronous. Handlers reach it through
//! [`AppState::with_store`], which runs the call on the blocking pool so a
//! slow query never stalls the async workers. Each call runs to completion
//! even if the client goes away.

use std::sync::Arc;

use decibel_store::Store;
use decibel_types::SoundReading;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::error;

use crate::api::AppError;
use crate::config::Config;
use crate::middleware::SecurityState;

/// Shared application state.
pub struct AppState {
    /// The data store. Internally synchronized.
    pub store: Arc<Store>,
    /// Configuration loaded at startup.
    pub config: Config,
    /// Broadcast channel for real-time reading updates.
    pub readings_tx: broadcast::Sender<ReadingEvent>,
    /// API key settings and rate limiter used by the middleware.
    pub security: Arc<SecurityState>,
}

impl AppState {
    /// Create new application state.
    ///
    /// The broadcast channel buffer size is determined by `config.server.broadcast_buffer`.
    pub fn new(store: Store, config: Config) -> Arc<Self> {
        let buffer_size = config.server.broadcast_buffer.max(1);
        let (readings_tx, _) = broadcast::channel(buffer_size);
        let security = SecurityState::new(config.security.clone());
        Arc::new(Self {
            store: Arc::new(store),
            config,
            readings_tx,
            security,
        })
    }

    /// Run a storage call on the blocking thread pool.
    pub async fn with_store<T, F>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&Store) -> decibel_store::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let result = tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| {
                error!("Storage task failed: {}", e);
                AppError::Internal("storage task failed".to_string())
            })?;
        Ok(result?)
    }

    /// Publish an event to live subscribers.
    ///
    /// Having no subscribers is not an error.
    pub fn publish(&self, event: ReadingEvent) {
        let _ = self.readings_tx.send(event);
    }
}

/// A reading event for WebSocket broadcast.
#[derive(Debug, Clone, Serialize)]
pub struct ReadingEvent {
    /// Device ID.
    pub device_id: String,
    /// The reading as stored.
    pub reading: SoundReading,
    /// LED state after the reading was processed.
    pub led: bool,
}

//! ESP32 simulator.
//!
//! Posts random sound levels to a running service the way the firmware
//! does, and logs the LED state each reply carries. Useful for exercising
//! the dashboard and the auto-trigger without hardware.

use std::time::Duration;

use decibel_types::now_millis;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::middleware::INGEST_PATH;

/// Default device id used by the simulator.
pub const DEFAULT_DEVICE_ID: &str = "test_device_simulated";
/// Default delay between posts.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Reading body as the firmware sends it.
#[derive(Debug, Clone, Serialize)]
pub struct SensorPayload {
    pub device_id: String,
    pub db: f64,
    pub timestamp: i64,
}

/// Service reply to a posted reading.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorReply {
    pub message: String,
    pub filename: String,
    pub led: bool,
}

/// Counters reported when the simulator stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulationSummary {
    pub sent: u64,
    pub failed: u64,
}

/// Random level in whole decibels, 0 to 80 inclusive.
pub fn random_level<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    f64::from(rng.random_range(0..=80u8))
}

/// Simulated sensor posting to one service.
#[derive(Debug, Clone)]
pub struct Simulator {
    client: reqwest::Client,
    endpoint: String,
    device_id: String,
    interval: Duration,
}

impl Simulator {
    /// Build a simulator posting to `base_url` (e.g. `http://localhost:3333`).
    pub fn new(base_url: &str, device_id: impl Into<String>, interval: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: ingest_url(base_url),
            device_id: device_id.into(),
            interval,
        }
    }

    /// Full URL readings are posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Post one reading and return the service reply.
    pub async fn send(&self, db: f64) -> Result<SensorReply, reqwest::Error> {
        let payload = SensorPayload {
            device_id: self.device_id.clone(),
            db,
            timestamp: now_millis(),
        };

        self.client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    /// Post readings until `count` is reached or Ctrl+C is pressed.
    ///
    /// Failed posts are logged and do not stop the loop.
    pub async fn run(&self, count: Option<u64>) -> SimulationSummary {
        let mut summary = SimulationSummary::default();
        let mut ticker = tokio::time::interval(self.interval);

        info!(
            "Simulating {} -> {} every {:?}",
            self.device_id, self.endpoint, self.interval
        );

        loop {
            if count.is_some_and(|limit| summary.sent + summary.failed >= limit) {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                    break;
                }
            }

            let db = random_level(&mut rand::rng());
            let attempt = summary.sent + summary.failed + 1;
            match self.send(db).await {
                Ok(reply) => {
                    summary.sent += 1;
                    info!(
                        "[{}] Sent {} dB - LED {} - {}",
                        attempt,
                        db,
                        if reply.led { "on" } else { "off" },
                        reply.message
                    );
                }
                Err(e) if e.is_status() => {
                    summary.failed += 1;
                    warn!("[{}] Service rejected reading: {}", attempt, e);
                }
                Err(e) => {
                    summary.failed += 1;
                    error!("[{}] Request failed: {}", attempt, e);
                }
            }
        }

        info!(
            "Simulation finished: {} sent, {} failed",
            summary.sent, summary.failed
        );
        summary
    }
}

fn ingest_url(base_url: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), INGEST_PATH)
}

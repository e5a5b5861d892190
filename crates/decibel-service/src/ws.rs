//! WebSocket handler for real-time updates.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use decibel_store::Store;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::state::{AppState, ReadingEvent};

/// Create the WebSocket router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/ws", get(ws_handler))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Latest reading of every device, with its LED state.
pub fn snapshot(store: &Store) -> decibel_store::Result<Vec<ReadingEvent>> {
    let mut events = Vec::new();
    for device_id in store.device_ids()? {
        if let Some(latest) = store.latest_reading(&device_id)? {
            events.push(ReadingEvent {
                led: store.led(&device_id)?,
                reading: latest.into(),
                device_id,
            });
        }
    }
    Ok(events)
}

/// Handle a WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the snapshot so nothing ingested meanwhile is missed
    let mut rx = state.readings_tx.subscribe();

    info!("WebSocket client connected");

    match state.with_store(snapshot).await {
        Ok(events) => {
            for event in events {
                let Ok(json) = serde_json::to_string(&event) else {
                    continue;
                };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    info!("WebSocket client disconnected during initial snapshot");
                    return;
                }
            }
            debug!("Sent initial snapshot to WebSocket client");
        }
        Err(e) => warn!("Failed to build WebSocket snapshot: {:?}", e),
    }

    let mut send_task = tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("WebSocket client lagging, skipped {} events", skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(e) => {
                    warn!("Failed to serialize event: {}", e);
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Drain client frames; pongs are answered by axum
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        },
        _ = &mut recv_task => {
            send_task.abort();
        },
    }

    info!("WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use decibel_types::SoundReading;

    #[test]
    fn test_snapshot_empty() {
        let store = Store::open_in_memory().unwrap();
        assert!(snapshot(&store).unwrap().is_empty());
    }

    #[test]
    fn test_snapshot_latest_per_device() {
        let store = Store::open_in_memory().unwrap();
        store.insert_reading(&SoundReading::new("a", 40.0, 1)).unwrap();
        store.insert_reading(&SoundReading::new("a", 80.0, 2)).unwrap();
        store.insert_reading(&SoundReading::new("b", 55.0, 3)).unwrap();
        store.set_led("b", true).unwrap();

        let events = snapshot(&store).unwrap();
        assert_eq!(events.len(), 2);

        assert_eq!(events[0].device_id, "a");
        assert_eq!(events[0].reading.db_level, 80.0);
        assert!(!events[0].led);

        assert_eq!(events[1].device_id, "b");
        assert!(events[1].led);
    }
}

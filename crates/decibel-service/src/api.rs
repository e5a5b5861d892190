//! REST API endpoints.
//!
//! Two audiences share this router. ESP32 sensors post readings to
//! `POST /dados` and read the LED state from the reply. The dashboard uses
//! everything under `/api` to browse devices and to control them.
//!
//! ## Error Handling
//!
//! All endpoints return structured JSON errors via [`AppError`]. Store errors
//! map by kind: invalid input is 400, an unknown device on a detail fetch is
//! 404, a rename onto an existing device is 409 and storage failures are 500.
//!
//! # Example
//!
//! ```ignore
//! use decibel_service::api;
//!
//! let app = api::router().with_state(state);
//! ```

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use decibel_store::{ReadingQuery, StoredReading};
use decibel_types::{DeviceData, DeviceStats, DeviceSummary, IngestRequest};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::middleware::INGEST_PATH;
use crate::state::{AppState, ReadingEvent};

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        // Sensor ingestion
        .route(INGEST_PATH, post(ingest))
        // Dashboard data
        .route("/api/dados", get(list_devices))
        .route("/api/dados/{id}", get(get_device_data))
        .route("/api/devices/{id}/stats", get(get_stats))
        .route("/api/devices/{id}/readings", get(get_readings))
        .route("/api/devices/{id}/export", get(export_readings))
        // Device control
        .route("/api/devices/{id}/led", get(get_led).post(set_led))
        .route(
            "/api/devices/{id}/threshold",
            get(get_threshold).post(set_threshold),
        )
        // Device management
        .route(
            "/api/devices/{id}",
            put(rename_device).delete(delete_device),
        )
        .route("/api/devices/{id}/data", axum::routing::delete(clear_device_data))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Health check endpoint.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Reply sent to a sensor after it posts a reading.
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub message: String,
    pub filename: String,
    /// LED state the sensor should display.
    pub led: bool,
}

/// Store a reading posted by a sensor.
///
/// The body is `{device_id, db?, timestamp?}`. A missing `db` is stored as 0
/// and a missing or zero `timestamp` is replaced with server time.
async fn ingest(
    State(state): State<Arc<AppState>>,
    Json(body): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, AppError> {
    let device_id = body.device_id.clone().unwrap_or_default();

    let outcome = state
        .with_store(move |store| store.ingest(&device_id, body))
        .await?;

    debug!(
        "Reading from {}: {:.1} dB, LED {}",
        outcome.reading.device_id, outcome.reading.db_level, outcome.led
    );

    let filename = outcome.reading.device_id.clone();
    state.publish(ReadingEvent {
        device_id: filename.clone(),
        reading: outcome.reading,
        led: outcome.led,
    });

    Ok(Json(IngestResponse {
        message: format!("Data received and stored for device {}", filename),
        filename,
        led: outcome.led,
    }))
}

/// Device list response.
#[derive(Debug, Serialize)]
pub struct DevicesResponse {
    pub devices: Vec<DeviceSummary>,
}

/// List every device with stored readings.
async fn list_devices(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DevicesResponse>, AppError> {
    let devices = state.with_store(|store| store.list_devices()).await?;
    Ok(Json(DevicesResponse { devices }))
}

/// The retention window of readings for one device, oldest first.
async fn get_device_data(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeviceData>, AppError> {
    let data = state.with_store(move |store| store.device_data(&id)).await?;
    Ok(Json(data))
}

/// Reading count and activity bounds for a device.
async fn get_stats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeviceStats>, AppError> {
    let stats = state.with_store(move |store| store.device_stats(&id)).await?;
    Ok(Json(stats))
}

/// LED state body and response.
#[derive(Debug, Serialize)]
pub struct LedResponse {
    pub led: bool,
}

/// Request to switch the LED.
#[derive(Debug, Deserialize)]
pub struct SetLedRequest {
    pub state: bool,
}

async fn get_led(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<LedResponse>, AppError> {
    let led = state.with_store(move |store| store.led(&id)).await?;
    Ok(Json(LedResponse { led }))
}

async fn set_led(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<SetLedRequest>,
) -> Result<Json<LedResponse>, AppError> {
    let led = body.state;
    state
        .with_store(move |store| store.set_led(&id, led))
        .await?;
    Ok(Json(LedResponse { led }))
}

/// Threshold body and response. `null` disables auto-trigger.
#[derive(Debug, Serialize, Deserialize)]
pub struct ThresholdBody {
    pub threshold: Option<f64>,
}

async fn get_threshold(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ThresholdBody>, AppError> {
    let threshold = state.with_store(move |store| store.threshold(&id)).await?;
    Ok(Json(ThresholdBody { threshold }))
}

async fn set_threshold(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ThresholdBody>,
) -> Result<Json<ThresholdBody>, AppError> {
    let threshold = body.threshold;
    state
        .with_store(move |store| store.set_threshold(&id, threshold))
        .await?;
    Ok(Json(ThresholdBody { threshold }))
}

/// Request to rename a device.
#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    #[serde(rename = "newId")]
    pub new_id: String,
}

/// Rename result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameResponse {
    pub message: String,
    pub updated_count: usize,
}

/// Removal result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovedResponse {
    pub message: String,
    pub removed_count: usize,
}

/// Move every reading and the control state of a device to a new id.
///
/// # Errors
///
/// - 400 if the new id is blank or equal to the old one
/// - 409 if the new id already has readings
async fn rename_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<RenameRequest>,
) -> Result<Json<RenameResponse>, AppError> {
    let new_id = body.new_id;
    let message = format!("Device {} renamed to {}", id, new_id);

    let updated_count = state
        .with_store(move |store| store.rename_device(&id, &new_id))
        .await?;

    Ok(Json(RenameResponse {
        message,
        updated_count,
    }))
}

/// Remove a device entirely. Unknown devices remove nothing.
async fn delete_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RemovedResponse>, AppError> {
    let message = format!("Device {} deleted", id);
    let removed_count = state
        .with_store(move |store| store.delete_device(&id))
        .await?;

    Ok(Json(RemovedResponse {
        message,
        removed_count,
    }))
}

/// Remove the readings of a device, keeping LED and threshold.
async fn clear_device_data(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RemovedResponse>, AppError> {
    let message = format!("Data for device {} cleared", id);
    let removed_count = state
        .with_store(move |store| store.clear_device_data(&id))
        .await?;

    Ok(Json(RemovedResponse {
        message,
        removed_count,
    }))
}

/// Query parameters for readings. Times are epoch milliseconds.
#[derive(Debug, Deserialize, Default)]
pub struct ReadingsQuery {
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl ReadingsQuery {
    /// Validate the query parameters.
    /// Returns an error if `since > until`.
    pub fn validate(&self) -> Result<(), AppError> {
        if let (Some(since), Some(until)) = (self.since, self.until)
            && since > until
        {
            return Err(AppError::BadRequest(format!(
                "Invalid time range: 'since' ({}) must be less than or equal to 'until' ({})",
                since, until
            )));
        }
        Ok(())
    }

    fn to_query(&self, device_id: &str) -> ReadingQuery {
        let mut query = ReadingQuery::new().device(device_id);
        if let Some(since) = self.since {
            query = query.since(since);
        }
        if let Some(until) = self.until {
            query = query.until(until);
        }
        // One extra row tells whether another page exists
        if let Some(limit) = self.limit {
            query = query.limit(limit.saturating_add(1));
        }
        if let Some(offset) = self.offset {
            query = query.offset(offset);
        }
        query
    }
}

/// Paginated response wrapper with metadata.
#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    /// The data items.
    pub data: Vec<T>,
    /// Pagination metadata.
    pub pagination: PaginationMeta,
}

/// Pagination metadata.
#[derive(Debug, Serialize)]
pub struct PaginationMeta {
    /// Number of items returned.
    pub count: usize,
    /// Offset from the beginning.
    pub offset: u32,
    /// Maximum items requested (if specified).
    pub limit: Option<u32>,
    /// Whether there are more items available.
    pub has_more: bool,
}

/// Readings for a device within a time window, newest first.
///
/// Unlike `/api/dados/{id}` this reaches the full history, one page at a
/// time.
async fn get_readings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<ReadingsQuery>,
) -> Result<Json<PaginatedResponse<StoredReading>>, AppError> {
    params.validate()?;

    let query = params.to_query(&id);
    let mut readings = state
        .with_store(move |store| store.query_readings(&query))
        .await?;

    let has_more = params.limit.is_some_and(|l| readings.len() > l as usize);
    if has_more {
        readings.pop();
    }

    Ok(Json(PaginatedResponse {
        pagination: PaginationMeta {
            count: readings.len(),
            offset: params.offset.unwrap_or(0),
            limit: params.limit,
            has_more,
        },
        data: readings,
    }))
}

/// Full reading history of a device as a CSV download.
async fn export_readings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let filename = format!("{}.csv", attachment_name(&id));
    let csv = state.with_store(move |store| store.export_csv(&id)).await?;

    info!("Exported {}", filename);
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        csv,
    )
        .into_response())
}

/// Reduce a device id to characters safe inside a `Content-Disposition`
/// filename.
fn attachment_name(device_id: &str) -> String {
    let name: String = device_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .take(64)
        .collect();

    if name.is_empty() {
        "readings".to_string()
    } else {
        name
    }
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Store(decibel_store::Error),
    Internal(String),
}

impl From<decibel_store::Error> for AppError {
    fn from(e: decibel_store::Error) -> Self {
        AppError::Store(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        use decibel_store::Error;

        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Store(e @ Error::Validation(_)) => (StatusCode::BAD_REQUEST, e.to_string()),
            AppError::Store(e @ Error::NotFound(_)) => (StatusCode::NOT_FOUND, e.to_string()),
            AppError::Store(e @ Error::Conflict(_)) => (StatusCode::CONFLICT, e.to_string()),
            AppError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use decibel_types::SoundReading;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::config::Config;

    fn create_test_state() -> Arc<AppState> {
        let store = decibel_store::Store::open_in_memory().unwrap();
        AppState::new(store, Config::default())
    }

    fn seed(state: &AppState, device_id: &str, timestamps: impl IntoIterator<Item = i64>) {
        for ts in timestamps {
            state
                .store
                .insert_reading(&SoundReading::new(device_id, 50.0, ts))
                .unwrap();
        }
    }

    async fn response_body(response: Response) -> String {
        let body = response.into_body();
        let bytes = body.collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn send(state: &Arc<AppState>, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router()
            .with_state(Arc::clone(state))
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        let body = response_body(response).await;
        let json = serde_json::from_str(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn delete(uri: &str) -> Request<Body> {
        Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let state = create_test_state();
        let (status, json) = send(&state, get("/api/health")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_list_devices_empty() {
        let state = create_test_state();
        let (status, json) = send(&state, get("/api/dados")).await;

        assert_eq!(status, StatusCode::OK);
        assert!(json["devices"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ingest_stores_reading() {
        let state = create_test_state();
        let (status, json) = send(
            &state,
            json_request(
                "POST",
                "/dados",
                serde_json::json!({"device_id": "esp32-sala", "db": 72.5, "timestamp": 1_000}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["filename"], "esp32-sala");
        assert_eq!(json["led"], false);
        assert!(json["message"].as_str().unwrap().contains("esp32-sala"));

        let (_, json) = send(&state, get("/api/dados")).await;
        assert_eq!(json["devices"][0]["device_id"], "esp32-sala");
        assert_eq!(json["devices"][0]["filename"], "esp32-sala");
    }

    #[tokio::test]
    async fn test_ingest_without_device_id() {
        let state = create_test_state();
        let (status, json) = send(
            &state,
            json_request("POST", "/dados", serde_json::json!({"db": 50})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("device_id"));
        assert_eq!(state.store.count_readings(None).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ingest_invalid_json_body() {
        let state = create_test_state();
        let request = Request::builder()
            .method("POST")
            .uri("/dados")
            .header("Content-Type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let (status, _) = send(&state, request).await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn test_ingest_publishes_event() {
        let state = create_test_state();
        let mut rx = state.readings_tx.subscribe();

        send(
            &state,
            json_request("POST", "/dados", serde_json::json!({"device_id": "d", "db": 61.0})),
        )
        .await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.device_id, "d");
        assert_eq!(event.reading.db_level, 61.0);
    }

    #[tokio::test]
    async fn test_ingest_auto_trigger_reported_to_sensor() {
        let state = create_test_state();
        let (status, _) = send(
            &state,
            json_request(
                "POST",
                "/api/devices/d/threshold",
                serde_json::json!({"threshold": 60}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, json) = send(
            &state,
            json_request("POST", "/dados", serde_json::json!({"device_id": "d", "db": 75})),
        )
        .await;
        assert_eq!(json["led"], true);

        let (_, json) = send(
            &state,
            json_request("POST", "/dados", serde_json::json!({"device_id": "d", "db": 10})),
        )
        .await;
        assert_eq!(json["led"], true);

        let (_, json) = send(&state, get("/api/devices/d/led")).await;
        assert_eq!(json["led"], true);
    }

    #[tokio::test]
    async fn test_device_data_not_found() {
        let state = create_test_state();
        let (status, json) = send(&state, get("/api/dados/ghost")).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_device_data_window() {
        let state = create_test_state();
        seed(&state, "d", 1..=600);

        let (status, json) = send(&state, get("/api/dados/d")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["filename"], "d");

        let entries = json["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 500);
        assert_eq!(entries[0]["timestamp"], 101);
        assert_eq!(entries[499]["timestamp"], 600);
        assert_eq!(entries[0]["db"], 50.0);
    }

    #[tokio::test]
    async fn test_device_data_percent_encoded_id() {
        let state = create_test_state();
        seed(&state, "sala 1", [1]);

        let (status, json) = send(&state, get("/api/dados/sala%201")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["filename"], "sala 1");
    }

    #[tokio::test]
    async fn test_stats_unknown_device() {
        let state = create_test_state();
        let (status, json) = send(&state, get("/api/devices/ghost/stats")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["totalRecords"], 0);
        assert!(json["firstActivity"].is_null());
        assert!(json["lastActivity"].is_null());
    }

    #[tokio::test]
    async fn test_stats_with_data() {
        let state = create_test_state();
        seed(&state, "d", [300, 100, 200]);

        let (_, json) = send(&state, get("/api/devices/d/stats")).await;
        assert_eq!(json["totalRecords"], 3);
        assert_eq!(json["firstActivity"], 100);
        assert_eq!(json["lastActivity"], 300);
    }

    #[tokio::test]
    async fn test_led_roundtrip() {
        let state = create_test_state();

        let (_, json) = send(&state, get("/api/devices/d/led")).await;
        assert_eq!(json["led"], false);

        let (status, json) = send(
            &state,
            json_request("POST", "/api/devices/d/led", serde_json::json!({"state": true})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["led"], true);

        let (_, json) = send(&state, get("/api/devices/d/led")).await;
        assert_eq!(json["led"], true);
    }

    #[tokio::test]
    async fn test_threshold_null_disables() {
        let state = create_test_state();
        send(
            &state,
            json_request(
                "POST",
                "/api/devices/d/threshold",
                serde_json::json!({"threshold": 70.5}),
            ),
        )
        .await;

        let (_, json) = send(&state, get("/api/devices/d/threshold")).await;
        assert_eq!(json["threshold"], 70.5);

        send(
            &state,
            json_request(
                "POST",
                "/api/devices/d/threshold",
                serde_json::json!({"threshold": null}),
            ),
        )
        .await;

        let (_, json) = send(&state, get("/api/devices/d/threshold")).await;
        assert!(json["threshold"].is_null());
    }

    #[tokio::test]
    async fn test_rename_device() {
        let state = create_test_state();
        seed(&state, "a", [1, 2, 3]);

        let (status, json) = send(
            &state,
            json_request("PUT", "/api/devices/a", serde_json::json!({"newId": "c"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["updatedCount"], 3);

        let (status, _) = send(&state, get("/api/dados/a")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, json) = send(&state, get("/api/dados/c")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["entries"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_rename_conflict() {
        let state = create_test_state();
        seed(&state, "a", [1]);
        seed(&state, "b", [2]);

        let (status, json) = send(
            &state,
            json_request("PUT", "/api/devices/a", serde_json::json!({"newId": "b"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(json["error"].is_string());
        assert_eq!(state.store.count_readings(Some("a")).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rename_storage_failure_is_internal_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.db");
        let store = decibel_store::Store::open(&path).unwrap();
        let state = AppState::new(store, Config::default());
        seed(&state, "a", [1, 2]);
        state.store.set_led("a", true).unwrap();

        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TRIGGER fail_control_update BEFORE UPDATE ON device_control
             BEGIN SELECT RAISE(ABORT, 'disk gone'); END;",
        )
        .unwrap();

        let (status, json) = send(
            &state,
            json_request("PUT", "/api/devices/a", serde_json::json!({"newId": "c"})),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json["error"].is_string());

        let (status, json) = send(&state, get("/api/dados/a")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["entries"].as_array().unwrap().len(), 2);
        let (status, _) = send(&state, get("/api/dados/c")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_rename_to_same_id_is_bad_request() {
        let state = create_test_state();
        seed(&state, "a", [1]);

        let (status, _) = send(
            &state,
            json_request("PUT", "/api/devices/a", serde_json::json!({"newId": "a"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rename_missing_field() {
        let state = create_test_state();
        let (status, _) = send(
            &state,
            json_request("PUT", "/api/devices/a", serde_json::json!({"name": "c"})),
        )
        .await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn test_delete_device_idempotent() {
        let state = create_test_state();
        seed(&state, "x", [1, 2]);

        let (status, json) = send(&state, delete("/api/devices/x")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["removedCount"], 2);

        let (status, json) = send(&state, delete("/api/devices/x")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["removedCount"], 0);

        let (_, json) = send(&state, get("/api/dados")).await;
        assert!(json["devices"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_device_data_keeps_control() {
        let state = create_test_state();
        seed(&state, "d", [1, 2]);
        state.store.set_threshold("d", Some(55.0)).unwrap();

        let (status, json) = send(&state, delete("/api/devices/d/data")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["removedCount"], 2);

        let (_, json) = send(&state, get("/api/devices/d/threshold")).await;
        assert_eq!(json["threshold"], 55.0);
    }

    #[tokio::test]
    async fn test_get_readings_paginated() {
        let state = create_test_state();
        seed(&state, "d", 1..=5);

        let (status, json) = send(&state, get("/api/devices/d/readings?limit=2")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["pagination"]["count"], 2);
        assert_eq!(json["pagination"]["has_more"], true);
        assert_eq!(json["data"][0]["timestamp"], 5);

        let (_, json) = send(&state, get("/api/devices/d/readings?limit=2&offset=4")).await;
        assert_eq!(json["pagination"]["count"], 1);
        assert_eq!(json["pagination"]["has_more"], false);
        assert_eq!(json["pagination"]["offset"], 4);
    }

    #[tokio::test]
    async fn test_get_readings_time_window() {
        let state = create_test_state();
        seed(&state, "d", [100, 200, 300, 400]);

        let (_, json) = send(&state, get("/api/devices/d/readings?since=200&until=300")).await;
        let timestamps: Vec<i64> = json["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["timestamp"].as_i64().unwrap())
            .collect();
        assert_eq!(timestamps, vec![300, 200]);
    }

    #[tokio::test]
    async fn test_get_readings_invalid_range() {
        let state = create_test_state();
        let (status, json) = send(&state, get("/api/devices/d/readings?since=10&until=5")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("Invalid time range"));
    }

    #[tokio::test]
    async fn test_export_csv() {
        let state = create_test_state();
        seed(&state, "esp32/sala", [2, 1]);

        let response = router()
            .with_state(Arc::clone(&state))
            .oneshot(get("/api/devices/esp32%2Fsala/export"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/csv; charset=utf-8"
        );
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"esp32sala.csv\""
        );

        let body = response_body(response).await;
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines[0], "device_id,db,timestamp");
        assert_eq!(lines[1], "esp32/sala,50.0,1");
        assert_eq!(lines[2], "esp32/sala,50.0,2");
    }

    #[test]
    fn test_attachment_name() {
        assert_eq!(attachment_name("esp32-sala_1"), "esp32-sala_1");
        assert_eq!(attachment_name("a\"b;c"), "abc");
        assert_eq!(attachment_name("<>"), "readings");
        assert_eq!(attachment_name(&"a".repeat(100)).len(), 64);
    }

    #[test]
    fn test_readings_query_validate() {
        let ok = ReadingsQuery {
            since: Some(1),
            until: Some(1),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());

        let bad = ReadingsQuery {
            since: Some(2),
            until: Some(1),
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_error_status_mapping() {
        use decibel_store::Error;
        use decibel_types::InputError;

        let cases = [
            (
                AppError::Store(Error::Validation(InputError::MissingDeviceId)),
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::Store(Error::NotFound("x".into())),
                StatusCode::NOT_FOUND,
            ),
            (
                AppError::Store(Error::Conflict("x".into())),
                StatusCode::CONFLICT,
            ),
            (
                AppError::Store(Error::Io(std::io::Error::other("disk"))),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            let response = error.into_response();
            assert_eq!(response.status(), expected);
            let body = response_body(response).await;
            let json: serde_json::Value = serde_json::from_str(&body).unwrap();
            assert!(json.get("error").is_some());
        }
    }
}

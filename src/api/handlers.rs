use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use utoipa::OpenApi;

use super::{
    dto::{
        DeviceLinkDto, DeviceReadingDto, FeedRequest, FeedResponse, PumpRequest, PumpStateDto,
        RegisterDeviceRequest,
    },
    errors::AppError,
    AppState,
};
use crate::models::{FoodType, Pump, Servo};

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// Latest telemetry of every device seen on the stream since startup.
#[utoipa::path(
    get,
    path = "/devices/latest",
    responses(
        (status = 200, description = "Latest reading per device", body = Vec<DeviceReadingDto>),
    ),
    tag = "readings"
)]
pub async fn get_latest_readings(State(state): State<AppState>) -> Json<Vec<DeviceReadingDto>> {
    Json(state.cache.all().await.into_iter().map(Into::into).collect())
}

/// Latest telemetry of one device, `null` if none has been seen.
#[utoipa::path(
    get,
    path = "/devices/{device_id}/latest",
    params(
        ("device_id" = String, Path, description = "Device ID"),
    ),
    responses(
        (status = 200, description = "Latest reading", body = DeviceReadingDto),
    ),
    tag = "readings"
)]
pub async fn get_device_latest(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Json<Option<DeviceReadingDto>> {
    Json(state.cache.get(&device_id).await.map(Into::into))
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Link a device to an aquarium and its owner.
#[utoipa::path(
    post,
    path = "/devices/{device_id}/registration",
    params(
        ("device_id" = String, Path, description = "Device ID"),
    ),
    request_body = RegisterDeviceRequest,
    responses(
        (status = 200, description = "Device registered", body = DeviceLinkDto),
        (status = 404, description = "Device does not exist"),
        (status = 409, description = "Device or aquarium already linked"),
        (status = 422, description = "Empty identifier"),
    ),
    tag = "devices"
)]
pub async fn register_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(req): Json<RegisterDeviceRequest>,
) -> Result<Json<DeviceLinkDto>, AppError> {
    let link = state
        .registry
        .register(&device_id, &req.aquarium_id, &req.user_id)
        .await?;
    Ok(Json(link.into()))
}

/// Unlink a device from its aquarium and owner.
#[utoipa::path(
    delete,
    path = "/devices/{device_id}/registration",
    params(
        ("device_id" = String, Path, description = "Device ID"),
    ),
    responses(
        (status = 204, description = "Device disconnected"),
        (status = 404, description = "Device does not exist"),
        (status = 409, description = "Device is not linked"),
    ),
    tag = "devices"
)]
pub async fn disconnect_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.registry.disconnect(&device_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Actuators
// ---------------------------------------------------------------------------

/// Switch one of the device's pumps on or off.
#[utoipa::path(
    put,
    path = "/devices/{device_id}/pumps/{pump}",
    params(
        ("device_id" = String, Path, description = "Device ID"),
        ("pump" = Pump, Path, description = "Pump to switch"),
    ),
    request_body = PumpRequest,
    responses(
        (status = 200, description = "Pump state written", body = PumpStateDto),
        (status = 409, description = "Device has no such pump"),
    ),
    tag = "devices"
)]
pub async fn set_pump(
    State(state): State<AppState>,
    Path((device_id, pump)): Path<(String, Pump)>,
    Json(req): Json<PumpRequest>,
) -> Result<Json<PumpStateDto>, AppError> {
    state.control.set_pump(&device_id, pump, req.on).await?;
    Ok(Json(PumpStateDto {
        device_id,
        pump,
        on: req.on,
    }))
}

/// Dispense food through the feeder serving the device.
#[utoipa::path(
    post,
    path = "/devices/{device_id}/feed",
    params(
        ("device_id" = String, Path, description = "Device ID"),
    ),
    request_body = FeedRequest,
    responses(
        (status = 200, description = "Feeding complete", body = FeedResponse),
        (status = 404, description = "Device does not exist"),
        (status = 409, description = "No feeder available"),
        (status = 422, description = "Invalid amount"),
    ),
    tag = "devices"
)]
pub async fn feed(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(req): Json<FeedRequest>,
) -> Result<Json<FeedResponse>, AppError> {
    let report = state.control.feed(&device_id, req.food, req.amount_mg).await?;
    Ok(Json(report.into()))
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Returns `200 OK` with `{"status":"ok"}` when the server is running.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
    ),
    tag = "system"
)]
pub async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// OpenAPI spec
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(
        get_latest_readings,
        get_device_latest,
        register_device,
        disconnect_device,
        set_pump,
        feed,
        health
    ),
    components(schemas(
        DeviceReadingDto,
        RegisterDeviceRequest,
        DeviceLinkDto,
        PumpRequest,
        PumpStateDto,
        FeedRequest,
        FeedResponse,
        Pump,
        Servo,
        FoodType
    )),
    tags(
        (name = "readings", description = "Latest device telemetry"),
        (name = "devices",  description = "Device registration and actuators"),
        (name = "system",   description = "System endpoints"),
    ),
    info(
        title = "Aquarium Monitor API",
        version = "0.1.0",
        description = "Device registration, actuator control and latest telemetry for aquarium devices"
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

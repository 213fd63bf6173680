pub mod dto;
pub mod errors;
pub mod handlers;

use axum::{
    routing::{get, post, put},
    Router,
};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use handlers::ApiDoc;

use crate::{control::ControlService, reading_cache::ReadingCache, registry::DeviceRegistry};

/// Shared handler state. Every field is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub cache: ReadingCache,
    pub registry: DeviceRegistry,
    pub control: ControlService,
}

pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route("/devices/latest", get(handlers::get_latest_readings))
        .route("/devices/{device_id}/latest", get(handlers::get_device_latest))
        .route(
            "/devices/{device_id}/registration",
            post(handlers::register_device).delete(handlers::disconnect_device),
        )
        .route("/devices/{device_id}/pumps/{pump}", put(handlers::set_pump))
        .route("/devices/{device_id}/feed", post(handlers::feed))
        .with_state(state)
        .split_for_parts();

    router
        .route("/health", get(handlers::health))
        .route(
            "/api-docs/openapi.json",
            get(move || async move { axum::Json(api) }),
        )
}

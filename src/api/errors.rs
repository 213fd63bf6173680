use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::{control::ControlError, registry::RegistryError};

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub error: anyhow::Error,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(error = %self.error, "Request failed");
        }
        let body = Json(json!({ "error": self.error.to_string() }));
        (self.status, body).into_response()
    }
}

impl From<RegistryError> for AppError {
    fn from(e: RegistryError) -> Self {
        let status = match &e {
            RegistryError::DeviceNotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::AlreadyRegistered(_)
            | RegistryError::AquariumOccupied { .. }
            | RegistryError::NotRegistered(_) => StatusCode::CONFLICT,
            RegistryError::EmptyField(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RegistryError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            error: e.into(),
        }
    }
}

impl From<ControlError> for AppError {
    fn from(e: ControlError) -> Self {
        let status = match &e {
            ControlError::DeviceNotFound(_) => StatusCode::NOT_FOUND,
            ControlError::PumpsUnsupported(_)
            | ControlError::PumpNotFound { .. }
            | ControlError::NoFeeder(_) => StatusCode::CONFLICT,
            ControlError::InvalidAmount(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ControlError::Aborted(_) | ControlError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            error: e.into(),
        }
    }
}

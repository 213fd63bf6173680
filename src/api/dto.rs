use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    control::FeedReport,
    models::{DeviceLink, DeviceReading, FoodType, Pump, Servo},
};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeviceReadingDto {
    pub device_id: String,
    pub ph_level: Option<f64>,
    /// Turbidity in NTU.
    pub turbidity_ntu: Option<f64>,
    pub observed_at: DateTime<Utc>,
}

impl From<DeviceReading> for DeviceReadingDto {
    fn from(r: DeviceReading) -> Self {
        Self {
            device_id: r.device_id,
            ph_level: r.ph_level,
            turbidity_ntu: r.turbidity_ntu,
            observed_at: r.observed_at,
        }
    }
}

/// Request body for `POST /devices/{device_id}/registration`.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceRequest {
    pub aquarium_id: String,
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceLinkDto {
    pub device_id: String,
    pub user_id: Option<String>,
    pub aquarium_id: Option<String>,
    /// ISO-8601 registration time.
    pub registered_at: Option<String>,
}

impl From<DeviceLink> for DeviceLinkDto {
    fn from(l: DeviceLink) -> Self {
        Self {
            device_id: l.device_id,
            user_id: l.user_id,
            aquarium_id: l.aquarium_id,
            registered_at: l.registered_at,
        }
    }
}

/// Request body for `PUT /devices/{device_id}/pumps/{pump}`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PumpRequest {
    pub on: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PumpStateDto {
    pub device_id: String,
    pub pump: Pump,
    pub on: bool,
}

/// Request body for `POST /devices/{device_id}/feed`.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FeedRequest {
    pub food: FoodType,
    /// Amount to dispense, in milligrams.
    pub amount_mg: f64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FeedResponse {
    /// Device whose feeder was used.
    pub device_id: String,
    pub servo: Servo,
    pub spins: u32,
}

impl From<FeedReport> for FeedResponse {
    fn from(r: FeedReport) -> Self {
        Self {
            device_id: r.device_id,
            servo: r.servo,
            spins: r.spins,
        }
    }
}

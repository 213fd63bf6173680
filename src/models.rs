use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// JSON pointer of the pH reading inside a device entry.
pub const PH_POINTER: &str = "/data/phlevel/pHLevel";
/// JSON pointer of the turbidity reading (NTU) inside a device entry.
pub const TURBIDITY_POINTER: &str = "/data/turbidityData/NTU";

pub const DEVICES_PATH: &str = "devices";
pub const ALERTS_PATH: &str = "alerts";

pub fn device_path(device_id: &str) -> String {
    format!("{DEVICES_PATH}/{device_id}")
}

pub fn alert_path(device_id: &str) -> String {
    format!("{ALERTS_PATH}/{device_id}")
}

/// ISO-8601 with millisecond precision and a `Z` suffix, the format the
/// mobile app writes and parses.
pub fn iso_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ---------------------------------------------------------------------------
// Alert
// ---------------------------------------------------------------------------

/// Record stored at `alerts/{deviceId}`.
///
/// One record per device: a later breach overwrites the earlier record and
/// resets `handled` to `false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "deviceId")]
    pub device_id: String,
    #[serde(rename = "pHLevel")]
    pub ph_level: f64,
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
    pub handled: bool,
}

impl Alert {
    pub fn new(device_id: &str, user_id: &str, ph_level: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_owned(),
            device_id: device_id.to_owned(),
            ph_level,
            timestamp,
            handled: false,
        }
    }
}

mod iso_millis {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::iso_timestamp(*ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// DeviceReading
// ---------------------------------------------------------------------------

/// Latest sensor values seen for one device on the telemetry stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceReading {
    pub device_id: String,
    pub ph_level: Option<f64>,
    /// Nephelometric turbidity units.
    pub turbidity_ntu: Option<f64>,
    pub observed_at: DateTime<Utc>,
}

impl DeviceReading {
    /// Pull whichever readings are present out of a raw device entry.
    /// Returns `None` for entries that are not objects.
    pub fn from_entry(device_id: &str, entry: &Value, observed_at: DateTime<Utc>) -> Option<Self> {
        if !entry.is_object() {
            return None;
        }
        Some(Self {
            device_id: device_id.to_owned(),
            ph_level: entry.pointer(PH_POINTER).and_then(Value::as_f64),
            turbidity_ntu: entry.pointer(TURBIDITY_POINTER).and_then(Value::as_f64),
            observed_at,
        })
    }
}

// ---------------------------------------------------------------------------
// DeviceLink
// ---------------------------------------------------------------------------

/// Ownership linkage denormalised onto a device entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceLink {
    pub device_id: String,
    pub user_id: Option<String>,
    pub aquarium_id: Option<String>,
    pub registered_at: Option<String>,
}

impl DeviceLink {
    pub fn from_entry(device_id: &str, entry: &Value) -> Option<Self> {
        if !entry.is_object() {
            return None;
        }
        let text = |key: &str| {
            entry
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
        };
        Some(Self {
            device_id: device_id.to_owned(),
            user_id: text("userId"),
            aquarium_id: text("aquariumId"),
            registered_at: text("registeredAt"),
        })
    }

    pub fn is_linked(&self) -> bool {
        self.user_id.is_some() || self.aquarium_id.is_some()
    }
}

// ---------------------------------------------------------------------------
// Actuators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Pump {
    Pump1,
    Pump2,
}

impl fmt::Display for Pump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Pump::Pump1 => "pump1",
            Pump::Pump2 => "pump2",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Servo {
    Servo1,
    Servo2,
}

impl fmt::Display for Servo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Servo::Servo1 => "servo1",
            Servo::Servo2 => "servo2",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FoodType {
    Pellets,
    Flakes,
}

impl FoodType {
    /// Milligrams dispensed by one feeder spin.
    pub fn mg_per_spin(self) -> f64 {
        match self {
            FoodType::Pellets => 2.0,
            FoodType::Flakes => 5.0,
        }
    }
}

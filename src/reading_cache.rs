use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;

use crate::models::DeviceReading;

/// In-memory store of the most recent `DeviceReading` per device, fed by the
/// telemetry stream.
///
/// Wrapped in `Arc` so it can be cheaply cloned and shared across tasks.
/// Uses `tokio::sync::RwLock` so concurrent readers never block each other.
#[derive(Clone, Default)]
pub struct ReadingCache {
    inner: Arc<RwLock<HashMap<String, DeviceReading>>>,
}

impl ReadingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the cached reading for `reading.device_id`.
    pub async fn update(&self, reading: DeviceReading) {
        self.inner
            .write()
            .await
            .insert(reading.device_id.clone(), reading);
    }

    /// Return every device's latest reading, ordered by device id.
    pub async fn all(&self) -> Vec<DeviceReading> {
        let mut readings: Vec<_> = self.inner.read().await.values().cloned().collect();
        readings.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        readings
    }

    /// Return the latest reading for `device_id`, if present.
    pub async fn get(&self, device_id: &str) -> Option<DeviceReading> {
        self.inner.read().await.get(device_id).cloned()
    }
}

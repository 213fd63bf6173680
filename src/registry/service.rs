use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::{
    models::{device_path, iso_timestamp, DeviceLink, DEVICES_PATH},
    rtdb::{RealtimeStore, RtdbError},
};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("device {0} does not exist")]
    DeviceNotFound(String),

    #[error("device {0} is already registered")]
    AlreadyRegistered(String),

    #[error("aquarium {aquarium_id} is already connected to device {device_id}")]
    AquariumOccupied { aquarium_id: String, device_id: String },

    #[error("device {0} is not connected to an aquarium")]
    NotRegistered(String),

    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error(transparent)]
    Store(#[from] RtdbError),
}

/// Device side of the device → aquarium → user link.
///
/// Ownership is denormalised onto each device entry (`userId`,
/// `aquariumId`), which is what the telemetry pipeline reads.
///
/// Link changes are serialised within the process so the one device per
/// aquarium check and the write that follows it cannot interleave.
#[derive(Clone)]
pub struct DeviceRegistry {
    store: Arc<dyn RealtimeStore>,
    link_lock: Arc<Mutex<()>>,
}

impl DeviceRegistry {
    pub fn new(store: Arc<dyn RealtimeStore>) -> Self {
        Self {
            store,
            link_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Ownership of `device_id`, or `None` if no such device exists.
    pub async fn lookup(&self, device_id: &str) -> Result<Option<DeviceLink>, RegistryError> {
        let entry = self.store.get(&device_path(device_id)).await?;
        Ok(DeviceLink::from_entry(device_id, &entry))
    }

    /// Link an unregistered device to `aquarium_id` owned by `user_id`.
    ///
    /// Fails if the device is unknown, already linked, or if another device
    /// is already connected to the aquarium.
    pub async fn register(
        &self,
        device_id: &str,
        aquarium_id: &str,
        user_id: &str,
    ) -> Result<DeviceLink, RegistryError> {
        for (name, value) in [("deviceId", device_id), ("aquariumId", aquarium_id), ("userId", user_id)] {
            if value.trim().is_empty() {
                return Err(RegistryError::EmptyField(name));
            }
        }

        let _guard = self.link_lock.lock().await;
        let link = self
            .lookup(device_id)
            .await?
            .ok_or_else(|| RegistryError::DeviceNotFound(device_id.to_owned()))?;
        if link.is_linked() {
            return Err(RegistryError::AlreadyRegistered(device_id.to_owned()));
        }

        if let Some(other) = self.device_for_aquarium(aquarium_id).await? {
            return Err(RegistryError::AquariumOccupied {
                aquarium_id: aquarium_id.to_owned(),
                device_id: other,
            });
        }

        let registered_at = iso_timestamp(Utc::now());
        let mut fields = Map::new();
        fields.insert("deviceId".to_owned(), Value::from(device_id));
        fields.insert("aquariumId".to_owned(), Value::from(aquarium_id));
        fields.insert("userId".to_owned(), Value::from(user_id));
        fields.insert("registeredAt".to_owned(), Value::from(registered_at.as_str()));
        self.store.update(&device_path(device_id), &fields).await?;

        info!(device_id = %device_id, aquarium_id = %aquarium_id, user_id = %user_id, "Device registered");

        Ok(DeviceLink {
            device_id: device_id.to_owned(),
            user_id: Some(user_id.to_owned()),
            aquarium_id: Some(aquarium_id.to_owned()),
            registered_at: Some(registered_at),
        })
    }

    /// Remove the aquarium and owner link from a registered device.
    pub async fn disconnect(&self, device_id: &str) -> Result<(), RegistryError> {
        let _guard = self.link_lock.lock().await;
        let link = self
            .lookup(device_id)
            .await?
            .ok_or_else(|| RegistryError::DeviceNotFound(device_id.to_owned()))?;
        if !link.is_linked() {
            return Err(RegistryError::NotRegistered(device_id.to_owned()));
        }

        let mut fields = Map::new();
        for key in ["aquariumId", "userId", "registeredAt"] {
            fields.insert(key.to_owned(), Value::Null);
        }
        self.store.update(&device_path(device_id), &fields).await?;

        info!(
            device_id = %device_id,
            aquarium_id = ?link.aquarium_id,
            user_id = ?link.user_id,
            "Device disconnected"
        );
        Ok(())
    }

    /// Every device currently owned by `user_id`, ordered by device id.
    pub async fn devices_for_user(&self, user_id: &str) -> Result<Vec<DeviceLink>, RegistryError> {
        Ok(self
            .all_links()
            .await?
            .into_iter()
            .filter(|link| link.user_id.as_deref() == Some(user_id))
            .collect())
    }

    async fn device_for_aquarium(&self, aquarium_id: &str) -> Result<Option<String>, RegistryError> {
        Ok(self
            .all_links()
            .await?
            .into_iter()
            .find(|link| link.aquarium_id.as_deref() == Some(aquarium_id))
            .map(|link| link.device_id))
    }

    async fn all_links(&self) -> Result<Vec<DeviceLink>, RegistryError> {
        let devices = self.store.get(DEVICES_PATH).await?;
        let mut links: Vec<DeviceLink> = devices
            .as_object()
            .map(|map| {
                map.iter()
                    .filter_map(|(id, entry)| DeviceLink::from_entry(id, entry))
                    .collect()
            })
            .unwrap_or_default();
        links.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        Ok(links)
    }
}

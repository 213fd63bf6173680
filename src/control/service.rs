use std::{sync::Arc, time::Duration};

use serde_json::Value;
use thiserror::Error;
use tokio::time;
use tracing::{error, info, warn};

use crate::{
    models::{device_path, DeviceLink, FoodType, Pump, Servo},
    registry::{DeviceRegistry, RegistryError},
    rtdb::{RealtimeStore, RtdbError},
};

/// Upper bound on the spins of a single feeding.
pub const MAX_FEED_SPINS: u32 = 50;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("device {0} does not exist")]
    DeviceNotFound(String),

    #[error("device {0} does not support pump control")]
    PumpsUnsupported(String),

    #[error("{pump} not found on device {device_id}")]
    PumpNotFound { device_id: String, pump: Pump },

    #[error("no available device with a feeder for {0}")]
    NoFeeder(String),

    #[error("food amount must be a positive number of milligrams needing at most {max} spins, got {0}", max = MAX_FEED_SPINS)]
    InvalidAmount(f64),

    #[error("feeding task failed: {0}")]
    Aborted(String),

    #[error(transparent)]
    Store(#[from] RtdbError),
}

impl From<RegistryError> for ControlError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::Store(e) => ControlError::Store(e),
            RegistryError::DeviceNotFound(id) => ControlError::DeviceNotFound(id),
            other => ControlError::Store(RtdbError::Other(other.to_string())),
        }
    }
}

/// Outcome of a completed feeding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedReport {
    /// Device whose servo actually turned; differs from the requested one
    /// when the feeder of another device was used.
    pub device_id: String,
    pub servo: Servo,
    pub spins: u32,
}

/// Drives the actuators of a device by writing to its realtime entry; the
/// firmware reacts to the changed values.
#[derive(Clone)]
pub struct ControlService {
    store: Arc<dyn RealtimeStore>,
    registry: DeviceRegistry,
    spin_on: Duration,
    spin_off: Duration,
}

impl ControlService {
    pub fn new(store: Arc<dyn RealtimeStore>) -> Self {
        Self::with_spin_timing(store, Duration::from_millis(1000), Duration::from_millis(500))
    }

    /// `spin_on` is how long the servo flag stays `true` per spin, `spin_off`
    /// the pause before the next spin.
    pub fn with_spin_timing(store: Arc<dyn RealtimeStore>, spin_on: Duration, spin_off: Duration) -> Self {
        Self {
            registry: DeviceRegistry::new(store.clone()),
            store,
            spin_on,
            spin_off,
        }
    }

    /// Switch `pump` on or off. The device must already expose that pump.
    pub async fn set_pump(&self, device_id: &str, pump: Pump, on: bool) -> Result<(), ControlError> {
        let pumps_path = format!("{}/pumps", device_path(device_id));
        let pumps = self.store.get(&pumps_path).await?;

        let Some(pumps) = pumps.as_object() else {
            return Err(ControlError::PumpsUnsupported(device_id.to_owned()));
        };
        if !pumps.contains_key(&pump.to_string()) {
            return Err(ControlError::PumpNotFound {
                device_id: device_id.to_owned(),
                pump,
            });
        }

        self.store
            .set(&format!("{pumps_path}/{pump}"), &Value::Bool(on))
            .await?;
        info!(device_id = %device_id, pump = %pump, on, "Pump toggled");
        Ok(())
    }

    /// Dispense `amount_mg` of `food` through the feeder serving `device_id`.
    ///
    /// Runs one on/off cycle of the servo flag per spin; the number of spins
    /// is the amount divided by what one spin dispenses, rounded up. The
    /// cycles run on their own task, so dropping the returned future does not
    /// leave the servo switched on.
    pub async fn feed(&self, device_id: &str, food: FoodType, amount_mg: f64) -> Result<FeedReport, ControlError> {
        let spins = spin_count(food, amount_mg).ok_or(ControlError::InvalidAmount(amount_mg))?;

        let (target, servo) = self.resolve_feeder(device_id).await?;
        let servo_path = format!("{}/feeder/{servo}", device_path(&target));

        info!(
            device_id = %target,
            servo = %servo,
            food = ?food,
            amount_mg,
            spins,
            "Feeding"
        );

        let cycle = tokio::spawn(run_spins(
            self.store.clone(),
            servo_path,
            spins,
            self.spin_on,
            self.spin_off,
        ));
        cycle
            .await
            .map_err(|e| ControlError::Aborted(e.to_string()))??;

        Ok(FeedReport {
            device_id: target,
            servo,
            spins,
        })
    }

    /// `servo1` of the device itself if it has a feeder, otherwise `servo2`
    /// of another device owned by the same user.
    async fn resolve_feeder(&self, device_id: &str) -> Result<(String, Servo), ControlError> {
        let entry = self.store.get(&device_path(device_id)).await?;
        let link = DeviceLink::from_entry(device_id, &entry)
            .ok_or_else(|| ControlError::DeviceNotFound(device_id.to_owned()))?;

        if has_servo(&entry, Servo::Servo1) || has_servo(&entry, Servo::Servo2) {
            return Ok((device_id.to_owned(), Servo::Servo1));
        }

        warn!(device_id = %device_id, "Device has no feeder; looking for another device of the same owner");

        let Some(owner) = link.user_id else {
            return Err(ControlError::NoFeeder(device_id.to_owned()));
        };
        for other in self.registry.devices_for_user(&owner).await? {
            if other.device_id == device_id {
                continue;
            }
            let candidate = self.store.get(&device_path(&other.device_id)).await?;
            if has_servo(&candidate, Servo::Servo2) {
                return Ok((other.device_id, Servo::Servo2));
            }
        }

        Err(ControlError::NoFeeder(device_id.to_owned()))
    }
}

/// Cycle the servo flag `spins` times. A failed write is followed by one
/// attempt to switch the servo off.
async fn run_spins(
    store: Arc<dyn RealtimeStore>,
    servo_path: String,
    spins: u32,
    spin_on: Duration,
    spin_off: Duration,
) -> Result<(), RtdbError> {
    let off = Value::Bool(false);
    for _ in 0..spins {
        let cycle = async {
            store.set(&servo_path, &Value::Bool(true)).await?;
            time::sleep(spin_on).await;
            store.set(&servo_path, &off).await
        };
        if let Err(e) = cycle.await {
            error!(servo_path = %servo_path, error = %e, "Servo cycle failed; switching it off");
            if let Err(reset) = store.set(&servo_path, &off).await {
                error!(servo_path = %servo_path, error = %reset, "Could not switch servo off");
            }
            return Err(e);
        }
        time::sleep(spin_off).await;
    }
    Ok(())
}

fn has_servo(entry: &Value, servo: Servo) -> bool {
    entry
        .get("feeder")
        .and_then(|f| f.get(servo.to_string()))
        .is_some()
}

/// Spins needed to dispense `amount_mg`, rounded up. `None` unless the
/// amount is positive and needs at most `MAX_FEED_SPINS`.
pub(crate) fn spin_count(food: FoodType, amount_mg: f64) -> Option<u32> {
    if !amount_mg.is_finite() || amount_mg <= 0.0 {
        return None;
    }
    let spins = (amount_mg / food.mg_per_spin()).ceil();
    (spins <= f64::from(MAX_FEED_SPINS)).then_some(spins as u32)
}

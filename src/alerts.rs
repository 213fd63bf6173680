use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::{
    models::{alert_path, Alert},
    rtdb::{RealtimeStore, RtdbError},
};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write alert: {0}")]
    Store(#[from] RtdbError),

    #[error("failed to serialise alert: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Destination for alert records.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Persist `alert` as the current record for its device, replacing any
    /// earlier one.
    async fn record_alert(&self, alert: &Alert) -> Result<(), SinkError>;
}

/// Writes alerts to `alerts/{deviceId}` in the realtime store.
#[derive(Clone)]
pub struct StoreAlertSink {
    store: Arc<dyn RealtimeStore>,
}

impl StoreAlertSink {
    pub fn new(store: Arc<dyn RealtimeStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AlertSink for StoreAlertSink {
    async fn record_alert(&self, alert: &Alert) -> Result<(), SinkError> {
        let path = alert_path(&alert.device_id);
        let value = serde_json::to_value(alert)?;
        self.store.set(&path, &value).await?;
        debug!(path = %path, "Alert record written");
        Ok(())
    }
}

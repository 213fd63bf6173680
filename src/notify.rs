use std::{fmt, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;

/// Identifier of a delivered notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NotificationId(pub String);

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Body posted to the notification endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertNotification {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "deviceId")]
    pub device_id: String,
    #[serde(rename = "pHLevel")]
    pub ph_level: f64,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("notification request timed out")]
    Timeout,

    #[error("notification request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("notification endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
}

impl From<reqwest::Error> for DispatchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(e)
        }
    }
}

/// Delivers alert notifications to users.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Make a single delivery attempt. No retries.
    async fn dispatch(&self, notification: &AlertNotification) -> Result<NotificationId, DispatchError>;
}

/// POSTs notifications to an HTTP function with a bearer credential.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    http: Client,
    url: String,
    token: String,
}

impl HttpDispatcher {
    pub fn new(config: &Config) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.notification_timeout_secs))
            .build()
            .context("Failed to build notification HTTP client")?;
        Ok(Self {
            http,
            url: config.notification_url.clone(),
            token: config.notification_token.clone(),
        })
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn dispatch(&self, notification: &AlertNotification) -> Result<NotificationId, DispatchError> {
        let resp = self
            .http
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(notification)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            warn!(
                device_id = %notification.device_id,
                status = status.as_u16(),
                body = %body,
                "Notification endpoint rejected alert"
            );
            return Err(DispatchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let id = notification_id(&body).unwrap_or_else(|| NotificationId(Uuid::new_v4().to_string()));
        debug!(device_id = %notification.device_id, notification_id = %id, "Notification accepted");
        Ok(id)
    }
}

/// The `id` field of a JSON response body, as text, if there is one.
fn notification_id(body: &str) -> Option<NotificationId> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("id")? {
        Value::String(s) if !s.is_empty() => Some(NotificationId(s.clone())),
        Value::Number(n) => Some(NotificationId(n.to_string())),
        _ => None,
    }
}

use anyhow::{bail, Context, Result};

use crate::telemetry::threshold::DEFAULT_PH_THRESHOLD;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    /// Root URL of the realtime database, e.g. `https://<db>.firebaseio.com`.
    pub firebase_database_url: String,
    /// Database secret or ID token appended as `?auth=`. Optional for open rules.
    pub firebase_auth: Option<String>,
    /// Full URL of the push-notification function.
    pub notification_url: String,
    /// Bearer token sent to the notification function.
    pub notification_token: String,
    /// pH strictly above this value raises an alert.
    pub ph_alert_threshold: f64,
    /// Timeout for a single notification request, in seconds.
    pub notification_timeout_secs: u64,
    /// Delay before reopening a dropped realtime stream, in seconds.
    pub stream_retry_secs: u64,
    pub server_host: String,
    pub server_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup (the process environment
    /// in production, a map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .filter(|v| !v.is_empty())
                .with_context(|| format!("missing required env var: {key}"))
        };
        let optional = |key: &str, default: &str| -> String {
            lookup(key).unwrap_or_else(|| default.to_owned())
        };

        let ph_alert_threshold: f64 = optional("PH_ALERT_THRESHOLD", &DEFAULT_PH_THRESHOLD.to_string())
            .parse()
            .context("PH_ALERT_THRESHOLD must be a number")?;
        if !ph_alert_threshold.is_finite() {
            bail!("PH_ALERT_THRESHOLD must be finite, got {ph_alert_threshold}");
        }

        let positive_secs = |key: &str| -> Result<u64> {
            let secs: u64 = optional(key, "5")
                .parse()
                .with_context(|| format!("{key} must be a positive integer"))?;
            if secs == 0 {
                bail!("{key} must be a positive integer, got 0");
            }
            Ok(secs)
        };

        Ok(Self {
            firebase_database_url: required("FIREBASE_DATABASE_URL")?,
            firebase_auth: lookup("FIREBASE_AUTH").filter(|v| !v.is_empty()),
            notification_url: required("NOTIFICATION_URL")?,
            notification_token: required("NOTIFICATION_TOKEN")?,
            ph_alert_threshold,
            notification_timeout_secs: positive_secs("NOTIFICATION_TIMEOUT_SECS")?,
            stream_retry_secs: positive_secs("STREAM_RETRY_SECS")?,
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: optional("SERVER_PORT", "8080")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
        })
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self {
            firebase_database_url: "http://127.0.0.1:9000".to_owned(),
            firebase_auth: None,
            notification_url: "http://127.0.0.1:9001/functions/v1/notification".to_owned(),
            notification_token: "test-token".to_owned(),
            ph_alert_threshold: DEFAULT_PH_THRESHOLD,
            notification_timeout_secs: 5,
            stream_retry_secs: 5,
            server_host: "127.0.0.1".to_owned(),
            server_port: 8080,
        }
    }
}

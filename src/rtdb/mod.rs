pub mod models;
pub mod sse;

#[cfg(test)]
pub(crate) mod memory;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header::ACCEPT, Client, Url};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::{sync::mpsc, time};
use tracing::{debug, info, warn};

use crate::config::Config;

use self::{
    models::{apply_patch, apply_put, StreamEvent},
    sse::SseDecoder,
};

/// Errors raised by the realtime store.
#[derive(Debug, Error)]
pub enum RtdbError {
    #[error("realtime store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("realtime store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid realtime store payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("stream cancelled by server: {0}")]
    Cancelled(String),

    #[error("stream credential revoked")]
    AuthRevoked,

    #[error("{0}")]
    Other(String),
}

/// The slice of the realtime key-value store this service needs.
///
/// Paths are slash-separated and relative to the database root, e.g.
/// `devices/D1/pumps/pump1`.
#[async_trait]
pub trait RealtimeStore: Send + Sync {
    /// Read the value at `path`. Absent locations read as `Value::Null`.
    async fn get(&self, path: &str) -> Result<Value, RtdbError>;

    /// Replace the value at `path`.
    async fn set(&self, path: &str, value: &Value) -> Result<(), RtdbError>;

    /// Merge `fields` into the object at `path`. `null` fields are deleted.
    async fn update(&self, path: &str, fields: &Map<String, Value>) -> Result<(), RtdbError>;
}

#[derive(Debug, Clone)]
pub struct RtdbClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    http: Client,
    base_url: Url,
    auth: Option<String>,
}

impl RtdbClient {
    pub fn new(config: &Config) -> Result<Self> {
        let mut base_url = Url::parse(&config.firebase_database_url)
            .context("FIREBASE_DATABASE_URL must be a valid URL")?;
        if !base_url.path().ends_with('/') {
            let dir = format!("{}/", base_url.path());
            base_url.set_path(&dir);
        }
        Ok(Self {
            inner: Arc::new(Inner {
                // No request timeout: the same client holds the long-lived stream.
                http: Client::new(),
                base_url,
                auth: config.firebase_auth.clone(),
            }),
        })
    }

    /// REST location of `path`: `{base}/{path}.json?auth={secret}`.
    fn url(&self, path: &str) -> Result<Url, RtdbError> {
        let path = path.trim_matches('/');
        let mut url = self
            .inner
            .base_url
            .join(&format!("{path}.json"))
            .map_err(|e| RtdbError::Other(format!("invalid store path {path:?}: {e}")))?;
        if let Some(auth) = &self.inner.auth {
            url.query_pairs_mut().append_pair("auth", auth);
        }
        Ok(url)
    }

    /// Keep a subscription on `path` open for as long as `tx` has a receiver.
    ///
    /// Every data event is folded into a local copy of the subtree and the
    /// full copy is sent on `tx`. When the connection ends or fails it is
    /// reopened after `retry`; the server replays the whole subtree as the
    /// first `put` of each connection.
    pub async fn watch(self, path: String, tx: mpsc::Sender<Value>, retry: Duration) {
        info!(path = %path, "Opening realtime stream");
        loop {
            match self.stream_once(&path, &tx).await {
                Ok(()) => info!(path = %path, "Realtime stream closed"),
                Err(e) => warn!(path = %path, error = %e, "Realtime stream failed"),
            }
            if tx.is_closed() {
                info!(path = %path, "Snapshot receiver dropped; stopping stream");
                return;
            }
            time::sleep(retry).await;
        }
    }

    async fn stream_once(&self, path: &str, tx: &mpsc::Sender<Value>) -> Result<(), RtdbError> {
        let url = self.url(path)?;
        let mut resp = self
            .inner
            .http
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RtdbError::Status {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        let mut decoder = SseDecoder::new();
        let mut tree = Value::Null;

        while let Some(chunk) = resp.chunk().await? {
            for raw in decoder.feed(&chunk) {
                match StreamEvent::try_from(&raw)? {
                    StreamEvent::Put(p) => apply_put(&mut tree, &p.path, p.data),
                    StreamEvent::Patch(p) => apply_patch(&mut tree, &p.path, p.data),
                    StreamEvent::KeepAlive => continue,
                    StreamEvent::Cancel(reason) => return Err(RtdbError::Cancelled(reason)),
                    StreamEvent::AuthRevoked => return Err(RtdbError::AuthRevoked),
                    StreamEvent::Unknown(name) => {
                        debug!(event = %name, "Ignoring unknown stream event");
                        continue;
                    }
                }
                if tx.send(tree.clone()).await.is_err() {
                    return Ok(());
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl RealtimeStore for RtdbClient {
    async fn get(&self, path: &str) -> Result<Value, RtdbError> {
        let url = self.url(path)?;
        debug!(path = %path, "Reading from realtime store");
        let resp = self.inner.http.get(url).send().await?;
        let bytes = ensure_success(resp).await?.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn set(&self, path: &str, value: &Value) -> Result<(), RtdbError> {
        let url = self.url(path)?;
        debug!(path = %path, "Writing to realtime store");
        let resp = self.inner.http.put(url).json(value).send().await?;
        ensure_success(resp).await?;
        Ok(())
    }

    async fn update(&self, path: &str, fields: &Map<String, Value>) -> Result<(), RtdbError> {
        let url = self.url(path)?;
        debug!(path = %path, fields = fields.len(), "Updating realtime store");
        let resp = self.inner.http.patch(url).json(fields).send().await?;
        ensure_success(resp).await?;
        Ok(())
    }
}

async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response, RtdbError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(RtdbError::Status {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        matchers::{body_json, header, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    fn client(base_url: &str, auth: Option<&str>) -> RtdbClient {
        let config = Config {
            firebase_database_url: base_url.to_owned(),
            firebase_auth: auth.map(str::to_owned),
            ..Config::for_tests()
        };
        RtdbClient::new(&config).unwrap()
    }

    #[test]
    fn url_appends_json_suffix_and_auth() {
        let c = client("https://example.firebaseio.com/", Some("s3cret"));
        let url = c.url("/devices/D1/").unwrap();
        assert_eq!(
            url.as_str(),
            "https://example.firebaseio.com/devices/D1.json?auth=s3cret"
        );
    }

    #[test]
    fn url_without_auth_has_no_query() {
        let c = client("https://example.firebaseio.com", None);
        assert_eq!(
            c.url("alerts/D1").unwrap().as_str(),
            "https://example.firebaseio.com/alerts/D1.json"
        );
    }

    #[tokio::test]
    async fn get_returns_value_and_null_for_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/devices/D1.json"))
            .and(query_param("auth", "tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"userId": "U1"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/devices/D2.json"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("null", "application/json"))
            .mount(&server)
            .await;

        let c = client(&server.uri(), Some("tok"));
        assert_eq!(c.get("devices/D1").await.unwrap(), json!({"userId": "U1"}));
        assert!(c.get("devices/D2").await.unwrap().is_null());
    }

    #[tokio::test]
    async fn set_puts_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/devices/D1/pumps/pump1.json"))
            .and(body_json(json!(true)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
            .expect(1)
            .mount(&server)
            .await;

        let c = client(&server.uri(), None);
        c.set("devices/D1/pumps/pump1", &json!(true)).await.unwrap();
    }

    #[tokio::test]
    async fn update_patches_fields() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/devices/D1.json"))
            .and(body_json(json!({"userId": null, "aquariumId": null})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let c = client(&server.uri(), None);
        let mut fields = Map::new();
        fields.insert("userId".to_owned(), Value::Null);
        fields.insert("aquariumId".to_owned(), Value::Null);
        c.update("devices/D1", &fields).await.unwrap();
    }

    #[tokio::test]
    async fn error_status_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(401).set_body_string(r#"{"error":"Permission denied"}"#))
            .mount(&server)
            .await;

        let c = client(&server.uri(), None);
        let err = c.set("alerts/D1", &json!({})).await.unwrap_err();
        match err {
            RtdbError::Status { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("Permission denied"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stream_materialises_snapshots() {
        let body = concat!(
            "event: put\n",
            "data: {\"path\":\"/\",\"data\":{\"D1\":{\"userId\":\"U1\"}}}\n\n",
            "event: keep-alive\n",
            "data: null\n\n",
            "event: put\n",
            "data: {\"path\":\"/D1/data/phlevel/pHLevel\",\"data\":9.0}\n\n",
            "event: patch\n",
            "data: {\"path\":\"/D2\",\"data\":{\"userId\":\"U2\"}}\n\n",
        );
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/devices.json"))
            .and(header("accept", "text/event-stream"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let c = client(&server.uri(), None);
        let (tx, mut rx) = mpsc::channel(8);
        c.stream_once("devices", &tx).await.unwrap();
        drop(tx);

        let mut snapshots = Vec::new();
        while let Some(s) = rx.recv().await {
            snapshots.push(s);
        }
        assert_eq!(snapshots.len(), 3, "keep-alive must not emit a snapshot");
        assert_eq!(snapshots[0], json!({"D1": {"userId": "U1"}}));
        assert_eq!(
            snapshots[2],
            json!({
                "D1": {"userId": "U1", "data": {"phlevel": {"pHLevel": 9.0}}},
                "D2": {"userId": "U2"}
            })
        );
    }

    #[tokio::test]
    async fn stream_cancel_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("event: cancel\ndata: permission denied\n\n", "text/event-stream"),
            )
            .mount(&server)
            .await;

        let c = client(&server.uri(), None);
        let (tx, _rx) = mpsc::channel(1);
        let err = c.stream_once("devices", &tx).await.unwrap_err();
        assert!(matches!(err, RtdbError::Cancelled(reason) if reason == "permission denied"));
    }
}

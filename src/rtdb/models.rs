use serde::Deserialize;
use serde_json::{Map, Value};

use super::sse::SseEvent;

// ---------------------------------------------------------------------------
// Streaming envelope
//
// The REST streaming endpoint sends server-sent events of the form:
//
//   event: put
//   data: {"path": "/D1/data/phlevel", "data": {"pHLevel": 9.1}}
//
// `put` replaces the value at `path`, `patch` merges the children of `data`
// into the value at `path`. `keep-alive` carries `null`. `cancel` and
// `auth_revoked` terminate the stream.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamPayload {
    /// Path relative to the subscribed location, `/` for the root.
    pub path: String,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Put(StreamPayload),
    Patch(StreamPayload),
    KeepAlive,
    /// Security rules no longer allow reading the location.
    Cancel(String),
    /// The credential expired or was revoked.
    AuthRevoked,
    Unknown(String),
}

impl TryFrom<&SseEvent> for StreamEvent {
    type Error = serde_json::Error;

    fn try_from(event: &SseEvent) -> Result<Self, Self::Error> {
        Ok(match event.event.as_str() {
            "put" => Self::Put(serde_json::from_str(&event.data)?),
            "patch" => Self::Patch(serde_json::from_str(&event.data)?),
            "keep-alive" => Self::KeepAlive,
            "cancel" => Self::Cancel(event.data.clone()),
            "auth_revoked" => Self::AuthRevoked,
            other => Self::Unknown(other.to_owned()),
        })
    }
}

// ---------------------------------------------------------------------------
// Materialised tree
//
// The stream only delivers deltas, so the subscriber keeps its own copy of
// the subscribed subtree and folds every `put`/`patch` into it. Writing
// `null` deletes, and objects left empty are removed, matching how the store
// itself never holds empty objects.
// ---------------------------------------------------------------------------

/// Replace the value at `path` with `data`.
pub fn apply_put(root: &mut Value, path: &str, data: Value) {
    let segments: Vec<&str> = segments(path).collect();
    put_at(root, &segments, data);
}

/// Merge every child of `data` into the value at `path`.
///
/// A non-object `data` behaves like a put.
pub fn apply_patch(root: &mut Value, path: &str, data: Value) {
    let base: Vec<&str> = segments(path).collect();
    match data {
        Value::Object(children) => {
            for (key, value) in children {
                let mut full = base.clone();
                full.extend(segments(&key));
                put_at(root, &full, value);
            }
        }
        other => put_at(root, &base, other),
    }
}

/// Read the value at `path`, `Value::Null` when absent.
pub fn value_at<'a>(root: &'a Value, path: &str) -> &'a Value {
    segments(path)
        .try_fold(root, |node, segment| node.get(segment))
        .unwrap_or(&Value::Null)
}

pub(crate) fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn put_at(node: &mut Value, segments: &[&str], data: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *node = data;
        return;
    };

    if !node.is_object() {
        if data.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = node else {
        return;
    };

    if rest.is_empty() {
        if data.is_null() {
            map.remove(*first);
        } else {
            map.insert((*first).to_owned(), data);
        }
    } else {
        let prune = {
            let child = map.entry((*first).to_owned()).or_insert(Value::Null);
            put_at(child, rest, data);
            is_empty(child)
        };
        if prune {
            map.remove(*first);
        }
    }

    if map.is_empty() {
        *node = Value::Null;
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

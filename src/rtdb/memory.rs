use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{
    models::{apply_patch, apply_put, value_at},
    RealtimeStore, RtdbError,
};

/// In-process `RealtimeStore` backed by a single JSON tree.
///
/// Records every write so tests can assert on what reached the store, and
/// can be told to reject writes under a path prefix.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tree: Mutex<Value>,
    writes: Mutex<Vec<(String, Value)>>,
    fail_prefix: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new(tree: Value) -> Self {
        Self {
            tree: Mutex::new(tree),
            ..Self::default()
        }
    }

    pub fn snapshot(&self) -> Value {
        self.tree.lock().unwrap().clone()
    }

    pub fn value(&self, path: &str) -> Value {
        value_at(&self.tree.lock().unwrap(), path).clone()
    }

    pub fn writes(&self) -> Vec<(String, Value)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn fail_writes_under(&self, prefix: &str) {
        *self.fail_prefix.lock().unwrap() = Some(prefix.to_owned());
    }

    fn check_writable(&self, path: &str) -> Result<(), RtdbError> {
        match &*self.fail_prefix.lock().unwrap() {
            Some(prefix) if path.starts_with(prefix.as_str()) => {
                Err(RtdbError::Other(format!("permission denied: {path}")))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl RealtimeStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Value, RtdbError> {
        Ok(self.value(path))
    }

    async fn set(&self, path: &str, value: &Value) -> Result<(), RtdbError> {
        self.check_writable(path)?;
        apply_put(&mut self.tree.lock().unwrap(), path, value.clone());
        self.writes.lock().unwrap().push((path.to_owned(), value.clone()));
        Ok(())
    }

    async fn update(&self, path: &str, fields: &Map<String, Value>) -> Result<(), RtdbError> {
        self.check_writable(path)?;
        let value = Value::Object(fields.clone());
        apply_patch(&mut self.tree.lock().unwrap(), path, value.clone());
        self.writes.lock().unwrap().push((path.to_owned(), value));
        Ok(())
    }
}

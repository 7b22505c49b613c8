//! Backing store behind the built-in key-value tools.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::ToolError;

/// Namespaced key-value backend.
///
/// Implementations must not serialize callers themselves; the coordinator
/// owns resource locking. Each call is a single round trip.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, ToolError>;
    /// Store `value`, returning the previous value if any.
    async fn put(&self, namespace: &str, key: &str, value: Value) -> Result<Option<Value>, ToolError>;
    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, ToolError>;
    /// Keys in `namespace`, sorted, optionally filtered by prefix.
    async fn keys(&self, namespace: &str, prefix: Option<&str>) -> Result<Vec<String>, ToolError>;
}

pub type SharedKvBackend = Arc<dyn KvBackend>;

/// In-process backend. `latency` simulates a network round trip per call.
#[derive(Debug, Default)]
pub struct MemoryKvBackend {
    data: RwLock<HashMap<String, BTreeMap<String, Value>>>,
    latency: Option<Duration>,
}

impl MemoryKvBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            data: RwLock::default(),
            latency: Some(latency),
        }
    }

    async fn round_trip(&self) {
        match self.latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }
    }
}

#[async_trait]
impl KvBackend for MemoryKvBackend {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, ToolError> {
        self.round_trip().await;
        let data = self.data.read();
        Ok(data.get(namespace).and_then(|ns| ns.get(key)).cloned())
    }

    async fn put(&self, namespace: &str, key: &str, value: Value) -> Result<Option<Value>, ToolError> {
        self.round_trip().await;
        let mut data = self.data.write();
        Ok(data
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value))
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, ToolError> {
        self.round_trip().await;
        let mut data = self.data.write();
        let Some(ns) = data.get_mut(namespace) else {
            return Ok(false);
        };
        let removed = ns.remove(key).is_some();
        if ns.is_empty() {
            data.remove(namespace);
        }
        Ok(removed)
    }

    async fn keys(&self, namespace: &str, prefix: Option<&str>) -> Result<Vec<String>, ToolError> {
        self.round_trip().await;
        let data = self.data.read();
        let Some(ns) = data.get(namespace) else {
            return Ok(Vec::new());
        };
        Ok(ns
            .keys()
            .filter(|key| prefix.map_or(true, |p| key.starts_with(p)))
            .cloned()
            .collect())
    }
}

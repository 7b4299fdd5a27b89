//! Memory capability: a process-wide key/value store shared across submissions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::FlowResult;
use crate::types::{CapabilityKind, Context};

use super::{has_value, Capability, CapabilityOutput};

const MAX_KEY_LEN: usize = 40;

/// Shared key/value map. Cloning shares the same underlying storage.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<HashMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.inner.read().await.get(key).cloned()
    }

    pub async fn insert(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.inner.write().await.insert(key.into(), value)
    }

    pub async fn remove(&self, key: &str) -> Option<Value> {
        self.inner.write().await.remove(key)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Store,
    Retrieve,
    Delete,
}

impl Action {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "store" | "set" | "save" => Some(Action::Store),
            "retrieve" | "get" | "load" => Some(Action::Retrieve),
            "delete" | "remove" => Some(Action::Delete),
            _ => None,
        }
    }
}

/// Derive a stable key from free text: lowercase alphanumerics joined by `_`.
pub(crate) fn infer_key(text: &str) -> String {
    let slug = text
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                '_'
            }
        })
        .collect::<String>();
    let slug: String = slug
        .split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .take(MAX_KEY_LEN)
        .collect();
    if slug.is_empty() {
        "result".into()
    } else {
        slug
    }
}

/// Stores, retrieves and deletes values in a [`MemoryStore`].
///
/// A successful retrieve also writes the value into the execution context
/// under the same key.
pub struct MemoryCapability {
    store: MemoryStore,
}

impl MemoryCapability {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

impl Default for MemoryCapability {
    fn default() -> Self {
        Self::new(MemoryStore::new())
    }
}

#[async_trait]
impl Capability for MemoryCapability {
    fn name(&self) -> &str {
        "memory"
    }

    fn description(&self) -> &str {
        "Store and retrieve intermediate execution state"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {"type": "string", "enum": ["store", "retrieve", "delete"]},
                "key": {"type": "string"},
                "value": {"description": "Value to store (store action only)"}
            },
            "required": ["action", "key"]
        })
    }

    fn required_parameters(&self) -> &[&'static str] {
        &["action", "key"]
    }

    fn repair_parameters(&self, goal: &str, parameters: &mut Map<String, Value>) {
        if !has_value(parameters.get("action")) {
            let action = if goal.to_lowercase().contains("retrieve") {
                "retrieve"
            } else {
                "store"
            };
            parameters.insert("action".into(), Value::String(action.into()));
        }
        if !has_value(parameters.get("key")) {
            parameters.insert("key".into(), Value::String(infer_key(goal)));
        }
    }

    async fn execute(
        &self,
        parameters: &Map<String, Value>,
        context: &mut Context,
        _cancel: &CancellationToken,
    ) -> FlowResult<CapabilityOutput> {
        let raw_action = parameters
            .get("action")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let Some(action) = Action::parse(raw_action) else {
            return Ok(CapabilityOutput::failure(format!(
                "Unknown action: {raw_action:?}. Use 'store', 'retrieve' or 'delete'."
            )));
        };
        let key = match parameters.get("key") {
            Some(Value::String(k)) if !k.trim().is_empty() => k.trim().to_string(),
            _ => return Ok(CapabilityOutput::failure("Missing 'key' parameter")),
        };

        match action {
            Action::Store => {
                let value = parameters.get("value").cloned().unwrap_or(Value::Null);
                self.store.insert(key.clone(), value).await;
                tracing::debug!(%key, "memory store");
                Ok(CapabilityOutput::success(json!({
                    "message": format!("Stored value at key '{key}'"),
                    "key": key,
                })))
            }
            Action::Retrieve => match self.store.get(&key).await {
                Some(value) => {
                    context.set(key.clone(), value.clone());
                    tracing::debug!(%key, "memory retrieve");
                    Ok(CapabilityOutput::success(json!({"key": key, "value": value})))
                }
                None => {
                    tracing::warn!(%key, "memory key not found");
                    Ok(CapabilityOutput::failure(format!(
                        "Key '{key}' not found in memory"
                    )))
                }
            },
            Action::Delete => {
                let existed = self.store.remove(&key).await.is_some();
                Ok(CapabilityOutput::success(json!({"key": key, "deleted": existed})))
            }
        }
    }
}

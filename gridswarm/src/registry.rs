//! Namespaced key/value registry over the bus backend.
//!
//! Values are JSON on the way in and parsed [`Value`]s on the way out.
//! Logical keys compose as `<prefix><namespace>.<key>`, with the namespace
//! omitted when empty. There is no locking; writes are last-writer-wins per
//! the backend's semantics, and a missing key reads as `Ok(None)`.

use std::sync::Arc;

use bytes::Bytes;
use gridswarm_core::{BusProvider, WireError};
use serde_json::Value;

use crate::error::ClientError;

/// Handle for key/value operations within one namespace.
///
/// Obtained from [`SwarmClient::registry`](crate::SwarmClient::registry);
/// cheap to clone and detached from the client's lifecycle (registry calls
/// keep working during shutdown as long as the backend is up).
#[derive(Clone)]
pub struct Registry {
    bus: Arc<dyn BusProvider>,
    prefix: String,
    namespace: String,
}

impl Registry {
    pub(crate) fn new(bus: Arc<dyn BusProvider>, prefix: String, namespace: String) -> Self {
        Self {
            bus,
            prefix,
            namespace,
        }
    }

    /// The namespace this handle operates in; empty for the default.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn compose(&self, key: &str) -> String {
        if self.namespace.is_empty() {
            format!("{}{}", self.prefix, key)
        } else {
            format!("{}{}.{}", self.prefix, self.namespace, key)
        }
    }

    /// Write `value` under `key`. Last writer wins.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] on backend failure.
    pub async fn put(&self, key: &str, value: &Value) -> Result<(), ClientError> {
        let encoded = serde_json::to_vec(value).map_err(WireError::Encode)?;
        self.bus
            .kv_put(&self.compose(key), Bytes::from(encoded))
            .await?;
        Ok(())
    }

    /// Read `key`, or `Ok(None)` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] on backend failure and
    /// [`ClientError::Codec`] when the stored bytes are not valid JSON.
    pub async fn get(&self, key: &str) -> Result<Option<Value>, ClientError> {
        match self.bus.kv_get(&self.compose(key)).await? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes).map_err(WireError::Decode)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Delete `key`. Deleting a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] on backend failure.
    pub async fn delete(&self, key: &str) -> Result<(), ClientError> {
        self.bus.kv_delete(&self.compose(key)).await?;
        Ok(())
    }

    /// Whether `key` exists.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] on backend failure.
    pub async fn exists(&self, key: &str) -> Result<bool, ClientError> {
        Ok(self.bus.kv_exists(&self.compose(key)).await?)
    }
}

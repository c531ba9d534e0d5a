//! The [`BusProvider`] seam over pub/sub + key/value backends.
//!
//! The fabric never talks to a concrete backend; it talks to this trait.
//! [`MemoryBus`](crate::memory::MemoryBus) implements it in-process for tests
//! and single-process fleets, and real deployments plug in an adapter over
//! their broker of choice.
//!
//! # Sink discipline
//!
//! [`subscribe`](BusProvider::subscribe) hands the backend a [`MessageSink`]
//! that is invoked from the backend's reader context for every matched
//! message. Sinks must only enqueue: no user code, no blocking, no
//! re-entrant bus calls that can block. The fabric's sink pushes into a
//! bounded queue and drops on overflow.
//!
//! # Failure semantics
//!
//! Any call may fail with a retryable or fatal [`BusError`]; the adapter
//! classifies, the caller decides. No automatic retry happens at this layer.
//! Subscribe-path failures after establishment (lost connections) are the
//! adapter's to repair; it reconnects and logs, and the fabric above never
//! observes the gap except as message loss.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

/// Callback invoked from the backend's reader context for each message.
///
/// Arguments are the concrete channel the message arrived on and the raw
/// payload bytes.
pub type MessageSink = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Opaque handle naming one live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// Errors surfaced by a bus backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BusError {
    /// The backend is temporarily unreachable; retrying may succeed.
    #[error("bus unavailable: {message}")]
    Unavailable {
        /// Adapter-supplied detail.
        message: String,
    },

    /// The backend rejected the operation; retrying will not help.
    #[error("bus rejected operation: {message}")]
    Rejected {
        /// Adapter-supplied detail.
        message: String,
    },

    /// The bus has been closed and accepts no further operations.
    #[error("bus closed")]
    Closed,
}

impl BusError {
    /// Whether retrying the failed operation may succeed.
    ///
    /// Transient unavailability is retryable; rejections and closure are
    /// final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BusError::Unavailable { .. })
    }
}

/// Abstract pub/sub + key/value backend.
///
/// Implementations are shared (`Arc<dyn BusProvider>`) across every fabric
/// subsystem; publish calls must be safe to issue concurrently, and the
/// adapter serializes its own subscribe bookkeeping.
#[async_trait]
pub trait BusProvider: Send + Sync + 'static {
    /// Publish raw bytes on a concrete channel.
    ///
    /// No delivery guarantee beyond the backend's own semantics.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] if the backend rejects the publish.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), BusError>;

    /// Subscribe `sink` to every channel matched by `pattern`.
    ///
    /// The sink is invoked until the returned handle is passed to
    /// [`unsubscribe`](BusProvider::unsubscribe). Pattern syntax is the
    /// backend's; [`MemoryBus`](crate::memory::MemoryBus) supports a
    /// trailing-`*` glob.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] if the subscription cannot be established.
    async fn subscribe(&self, pattern: &str, sink: MessageSink)
        -> Result<SubscriptionHandle, BusError>;

    /// Tear down a subscription. Idempotent: unknown handles succeed.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] only for backend failures, never for an
    /// already-removed handle.
    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), BusError>;

    /// Read a key from the backend's key/value store.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] on backend failure; a missing key is `Ok(None)`.
    async fn kv_get(&self, key: &str) -> Result<Option<Bytes>, BusError>;

    /// Write a key. Last writer wins.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] on backend failure.
    async fn kv_put(&self, key: &str, value: Bytes) -> Result<(), BusError>;

    /// Delete a key. Deleting a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] on backend failure.
    async fn kv_delete(&self, key: &str) -> Result<(), BusError>;

    /// Whether a key exists.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] on backend failure.
    async fn kv_exists(&self, key: &str) -> Result<bool, BusError>;

    /// Whether the backend currently considers itself connected.
    fn connected(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_is_retryable() {
        assert!(BusError::Unavailable {
            message: "broker restarting".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn rejections_and_closure_are_fatal() {
        assert!(!BusError::Rejected {
            message: "payload too large".to_string()
        }
        .is_retryable());
        assert!(!BusError::Closed.is_retryable());
    }
}

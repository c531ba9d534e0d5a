//! In-process bus for tests and single-process fleets.
//!
//! [`MemoryBus`] implements [`BusProvider`] with no I/O at all: a
//! subscription table and a key/value map behind mutexes. Published messages
//! are delivered synchronously, in publish order, to every matching sink
//! before `publish` returns — which makes per-sender, per-channel FIFO
//! trivially true and keeps integration tests hermetic and fast.
//!
//! Clones share the same underlying bus, so a test builds one `MemoryBus`
//! and hands clones to each client in the fleet.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use crate::bus::{BusError, BusProvider, MessageSink, SubscriptionHandle};
use crate::channel;

struct SubEntry {
    pattern: String,
    sink: MessageSink,
}

struct Inner {
    /// Keyed by handle; BTreeMap keeps delivery order stable across runs.
    subs: Mutex<BTreeMap<u64, SubEntry>>,
    kv: Mutex<HashMap<String, Bytes>>,
    next_handle: AtomicU64,
    open: AtomicBool,
}

/// An in-process [`BusProvider`].
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<Inner>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                subs: Mutex::new(BTreeMap::new()),
                kv: Mutex::new(HashMap::new()),
                next_handle: AtomicU64::new(1),
                open: AtomicBool::new(true),
            }),
        }
    }

    /// Simulate backend loss: further operations fail with
    /// [`BusError::Closed`] and [`connected`](BusProvider::connected)
    /// reports `false`.
    pub fn close(&self) {
        self.inner.open.store(false, Ordering::SeqCst);
        tracing::debug!("memory bus closed");
    }

    /// Number of live subscriptions, for test assertions.
    pub fn subscription_count(&self) -> usize {
        self.inner.subs.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn ensure_open(&self) -> Result<(), BusError> {
        if self.inner.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BusError::Closed)
        }
    }
}

#[async_trait]
impl BusProvider for MemoryBus {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), BusError> {
        self.ensure_open()?;
        // Snapshot matching sinks so delivery runs without the table lock;
        // sinks only enqueue, but they may trigger re-entrant publishes.
        let matched: Vec<MessageSink> = {
            let subs = self.inner.subs.lock().map_err(|_| BusError::Closed)?;
            subs.values()
                .filter(|entry| channel::matches(&entry.pattern, channel))
                .map(|entry| Arc::clone(&entry.sink))
                .collect()
        };
        for sink in matched {
            sink(channel, &payload);
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        pattern: &str,
        sink: MessageSink,
    ) -> Result<SubscriptionHandle, BusError> {
        self.ensure_open()?;
        let handle = self.inner.next_handle.fetch_add(1, Ordering::Relaxed);
        let mut subs = self.inner.subs.lock().map_err(|_| BusError::Closed)?;
        subs.insert(
            handle,
            SubEntry {
                pattern: pattern.to_string(),
                sink,
            },
        );
        tracing::trace!(pattern, handle, "memory bus subscription added");
        Ok(SubscriptionHandle(handle))
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), BusError> {
        let mut subs = self.inner.subs.lock().map_err(|_| BusError::Closed)?;
        subs.remove(&handle.0);
        Ok(())
    }

    async fn kv_get(&self, key: &str) -> Result<Option<Bytes>, BusError> {
        self.ensure_open()?;
        let kv = self.inner.kv.lock().map_err(|_| BusError::Closed)?;
        Ok(kv.get(key).cloned())
    }

    async fn kv_put(&self, key: &str, value: Bytes) -> Result<(), BusError> {
        self.ensure_open()?;
        let mut kv = self.inner.kv.lock().map_err(|_| BusError::Closed)?;
        kv.insert(key.to_string(), value);
        Ok(())
    }

    async fn kv_delete(&self, key: &str) -> Result<(), BusError> {
        self.ensure_open()?;
        let mut kv = self.inner.kv.lock().map_err(|_| BusError::Closed)?;
        kv.remove(key);
        Ok(())
    }

    async fn kv_exists(&self, key: &str) -> Result<bool, BusError> {
        self.ensure_open()?;
        let kv = self.inner.kv.lock().map_err(|_| BusError::Closed)?;
        Ok(kv.contains_key(key))
    }

    fn connected(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn collecting_sink() -> (MessageSink, Arc<Mutex<Vec<(String, Vec<u8>)>>>) {
        let seen: Arc<Mutex<Vec<(String, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink: MessageSink = Arc::new(move |channel, payload| {
            sink_seen
                .lock()
                .expect("sink lock")
                .push((channel.to_string(), payload.to_vec()));
        });
        (sink, seen)
    }

    #[tokio::test]
    async fn publish_reaches_matching_sinks_only() {
        let bus = MemoryBus::new();
        let (pub_sink, pub_seen) = collecting_sink();
        let (grp_sink, grp_seen) = collecting_sink();

        bus.subscribe("gs.pub.*", pub_sink).await.expect("subscribe");
        bus.subscribe("gs.grp.g1.*", grp_sink)
            .await
            .expect("subscribe");

        bus.publish("gs.pub.status", Bytes::from_static(b"a"))
            .await
            .expect("publish");
        bus.publish("gs.grp.g2.move", Bytes::from_static(b"b"))
            .await
            .expect("publish");

        assert_eq!(pub_seen.lock().expect("lock").len(), 1);
        assert!(grp_seen.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn delivery_preserves_publish_order() {
        let bus = MemoryBus::new();
        let (sink, seen) = collecting_sink();
        bus.subscribe("gs.pub.*", sink).await.expect("subscribe");

        for i in 0..10u8 {
            bus.publish("gs.pub.seq", Bytes::from(vec![i]))
                .await
                .expect("publish");
        }

        let seen = seen.lock().expect("lock");
        let order: Vec<u8> = seen.iter().map(|(_, p)| p[0]).collect();
        assert_eq!(order, (0..10).collect::<Vec<u8>>());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery_and_is_idempotent() {
        let bus = MemoryBus::new();
        let (sink, seen) = collecting_sink();
        let handle = bus.subscribe("gs.pub.*", sink).await.expect("subscribe");
        assert_eq!(bus.subscription_count(), 1);

        bus.unsubscribe(handle).await.expect("unsubscribe");
        bus.unsubscribe(handle).await.expect("second unsubscribe");
        assert_eq!(bus.subscription_count(), 0);

        bus.publish("gs.pub.status", Bytes::from_static(b"x"))
            .await
            .expect("publish");
        assert!(seen.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn kv_roundtrip_and_delete() {
        let bus = MemoryBus::new();
        assert_eq!(bus.kv_get("k").await.expect("get"), None);
        assert!(!bus.kv_exists("k").await.expect("exists"));

        bus.kv_put("k", Bytes::from_static(b"v"))
            .await
            .expect("put");
        assert_eq!(
            bus.kv_get("k").await.expect("get"),
            Some(Bytes::from_static(b"v"))
        );
        assert!(bus.kv_exists("k").await.expect("exists"));

        bus.kv_delete("k").await.expect("delete");
        assert_eq!(bus.kv_get("k").await.expect("get"), None);
        // Deleting a missing key still succeeds.
        bus.kv_delete("k").await.expect("delete again");
    }

    #[tokio::test]
    async fn closed_bus_refuses_operations() {
        let bus = MemoryBus::new();
        assert!(bus.connected());
        bus.close();
        assert!(!bus.connected());

        let err = bus
            .publish("gs.pub.status", Bytes::from_static(b"x"))
            .await
            .expect_err("publish after close");
        assert!(matches!(err, BusError::Closed));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn clones_share_state() {
        let bus = MemoryBus::new();
        let other = bus.clone();
        let (sink, seen) = collecting_sink();
        bus.subscribe("gs.pub.*", sink).await.expect("subscribe");

        other
            .publish("gs.pub.status", Bytes::from_static(b"y"))
            .await
            .expect("publish");
        assert_eq!(seen.lock().expect("lock").len(), 1);
    }
}

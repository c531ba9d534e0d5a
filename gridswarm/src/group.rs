//! Secure group membership.
//!
//! A client belongs to at most one group at a time. Joining a different
//! group implicitly leaves the current one; join and leave are serialized
//! behind a single async mutex so concurrent calls are linearizable. The
//! membership slot owns the group-channel subscription handle, and a cheap
//! read-side mirror backs the synchronous accessors.

use std::sync::{Arc, RwLock};

use gridswarm_core::{channel, BusProvider, Identity, MessageSink, SubscriptionHandle};
use tokio::sync::Mutex;

use crate::error::ClientError;

struct Membership {
    id: Identity,
    handle: SubscriptionHandle,
}

/// The single membership slot.
pub(crate) struct GroupState {
    slot: Mutex<Option<Membership>>,
    /// Mirror of the slot's group ID for lock-free accessors.
    current: RwLock<Option<Identity>>,
}

impl GroupState {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            current: RwLock::new(None),
        }
    }

    /// Join `group_id`, leaving any other group first. Idempotent when
    /// already a member of `group_id`.
    pub(crate) async fn join(
        &self,
        bus: &Arc<dyn BusProvider>,
        sink: &MessageSink,
        group_id: &str,
    ) -> Result<(), ClientError> {
        let mut slot = self.slot.lock().await;
        if let Some(current) = slot.as_ref() {
            if current.id == group_id {
                return Ok(());
            }
        }
        if let Some(previous) = slot.take() {
            self.set_current(None);
            bus.unsubscribe(previous.handle).await?;
            tracing::debug!(group = %previous.id, "left group");
        }
        let handle = bus
            .subscribe(&channel::group_pattern(group_id), Arc::clone(sink))
            .await?;
        *slot = Some(Membership {
            id: group_id.to_string(),
            handle,
        });
        self.set_current(Some(group_id.to_string()));
        tracing::info!(group = group_id, "joined group");
        Ok(())
    }

    /// Leave the current group. Idempotent when not in one.
    pub(crate) async fn leave(&self, bus: &Arc<dyn BusProvider>) -> Result<(), ClientError> {
        let mut slot = self.slot.lock().await;
        if let Some(previous) = slot.take() {
            self.set_current(None);
            bus.unsubscribe(previous.handle).await?;
            tracing::info!(group = %previous.id, "left group");
        }
        Ok(())
    }

    /// The current group ID, if any.
    pub(crate) fn current(&self) -> Option<Identity> {
        self.current.read().ok().and_then(|c| c.clone())
    }

    fn set_current(&self, value: Option<Identity>) {
        if let Ok(mut current) = self.current.write() {
            *current = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use gridswarm_core::MemoryBus;

    use super::*;

    fn noop_sink() -> MessageSink {
        Arc::new(|_, _| {})
    }

    fn shared(bus: &MemoryBus) -> Arc<dyn BusProvider> {
        Arc::new(bus.clone())
    }

    #[tokio::test]
    async fn join_subscribes_to_group_pattern() {
        let bus = MemoryBus::new();
        let state = GroupState::new();
        state
            .join(&shared(&bus), &noop_sink(), "g1")
            .await
            .expect("join");

        assert_eq!(state.current(), Some("g1".to_string()));
        assert_eq!(bus.subscription_count(), 1);
    }

    #[tokio::test]
    async fn joining_same_group_is_idempotent() {
        let bus = MemoryBus::new();
        let state = GroupState::new();
        let provider = shared(&bus);
        state.join(&provider, &noop_sink(), "g1").await.expect("join");
        state
            .join(&provider, &noop_sink(), "g1")
            .await
            .expect("rejoin");

        assert_eq!(bus.subscription_count(), 1);
    }

    #[tokio::test]
    async fn joining_another_group_leaves_the_first() {
        let bus = MemoryBus::new();
        let state = GroupState::new();
        let provider = shared(&bus);
        state.join(&provider, &noop_sink(), "g1").await.expect("join");
        state
            .join(&provider, &noop_sink(), "g2")
            .await
            .expect("switch");

        assert_eq!(state.current(), Some("g2".to_string()));
        // The old subscription is gone, only g2's remains.
        assert_eq!(bus.subscription_count(), 1);
    }

    #[tokio::test]
    async fn leave_is_idempotent() {
        let bus = MemoryBus::new();
        let state = GroupState::new();
        let provider = shared(&bus);

        state.leave(&provider).await.expect("leave of nothing");
        state.join(&provider, &noop_sink(), "g1").await.expect("join");
        state.leave(&provider).await.expect("leave");
        state.leave(&provider).await.expect("second leave");

        assert_eq!(state.current(), None);
        assert_eq!(bus.subscription_count(), 0);
    }
}

//! The client façade.
//!
//! [`SwarmClient`] is the long-lived object user code holds: it owns the
//! base subscriptions, the dispatch pump, and the coordination tables, and
//! exposes the whole fabric API. Lifecycle is explicit — build with
//! [`SwarmClientBuilder`], tear down with [`shutdown`](SwarmClient::shutdown)
//! — so fleets can run several clients in one process (tests do exactly
//! that over a shared [`MemoryBus`](gridswarm_core::MemoryBus)).
//!
//! ```no_run
//! # use gridswarm::{SwarmClient, HandlerError};
//! # use gridswarm_core::MemoryBus;
//! # use serde_json::json;
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let client = SwarmClient::builder("healer-3")
//!     .bus(MemoryBus::new())
//!     .connect()
//!     .await?;
//!
//! client.on_request("status", |_meta, _payload| Ok(json!({"hp": 100})));
//! client.broadcast("ready", json!({"zone": "north"})).await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use gridswarm_core::{
    channel, BusError, BusProvider, Envelope, Identity, MessageSink, SubscriptionHandle,
};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::contract::{self, BidOptions, ContractOutcome, ContractTable};
use crate::dispatch;
use crate::error::{ClientError, RequestError};
use crate::group::GroupState;
use crate::handlers::{
    ContractHandler, EventKind, HandlerError, HandlerKind, HandlerTable, Meta,
};
use crate::metrics::{DispatchMetrics, MetricsSnapshot};
use crate::registry::Registry;
use crate::reply::Reply;
use crate::requests::{self, PendingTable};

/// Deadline for the reserved-topic liveness probe.
const ALIVE_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Shared state behind a [`SwarmClient`] and its spawned tasks.
pub(crate) struct ClientInner {
    pub(crate) identity: Identity,
    pub(crate) config: ClientConfig,
    pub(crate) bus: Arc<dyn BusProvider>,
    pub(crate) handlers: HandlerTable,
    pub(crate) pending: PendingTable,
    pub(crate) contracts: ContractTable,
    pub(crate) group: GroupState,
    pub(crate) metrics: Arc<DispatchMetrics>,
    pub(crate) sink: MessageSink,
    shutdown: watch::Sender<bool>,
    base_subs: StdMutex<Vec<SubscriptionHandle>>,
    pump: StdMutex<Option<JoinHandle<()>>>,
}

impl ClientInner {
    pub(crate) fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub(crate) fn ensure_live(&self) -> Result<(), ClientError> {
        if self.is_shutdown() {
            Err(ClientError::Shutdown)
        } else {
            Ok(())
        }
    }

    pub(crate) fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub(crate) async fn publish_envelope(
        &self,
        channel: &str,
        env: &Envelope,
    ) -> Result<(), ClientError> {
        let bytes = env.encode()?;
        self.bus.publish(channel, bytes).await?;
        Ok(())
    }
}

/// Builder for [`SwarmClient`].
pub struct SwarmClientBuilder {
    identity: Identity,
    bus: Option<Arc<dyn BusProvider>>,
    config: ClientConfig,
}

impl SwarmClientBuilder {
    /// Start building a client with the given fleet identity.
    pub fn new(identity: impl Into<Identity>) -> Self {
        Self {
            identity: identity.into(),
            bus: None,
            config: ClientConfig::default(),
        }
    }

    /// Use this bus backend.
    pub fn bus(mut self, bus: impl BusProvider) -> Self {
        self.bus = Some(Arc::new(bus));
        self
    }

    /// Use an already-shared bus backend.
    pub fn shared_bus(mut self, bus: Arc<dyn BusProvider>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Override the default configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Establish the base subscriptions, start the dispatch pump, and hand
    /// back a live client.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when no bus is configured, when
    /// the backend refuses the base subscriptions, or when they cannot be
    /// established within the configured connect timeout.
    pub async fn connect(self) -> Result<SwarmClient, ClientError> {
        validate_identity(&self.identity)?;
        let bus = self.bus.ok_or(BusError::Rejected {
            message: "no bus provider configured".to_string(),
        })?;
        let config = self.config;
        let (tx, rx) = mpsc::channel(config.inbound_queue_size.max(1));
        let metrics = Arc::new(DispatchMetrics::default());
        let sink = dispatch::make_sink(tx, Arc::clone(&metrics));
        let (shutdown, _) = watch::channel(false);

        let inner = Arc::new(ClientInner {
            identity: self.identity,
            config,
            bus,
            handlers: HandlerTable::new(),
            pending: PendingTable::new(),
            contracts: ContractTable::new(),
            group: GroupState::new(),
            metrics,
            sink,
            shutdown,
            base_subs: StdMutex::new(Vec::new()),
            pump: StdMutex::new(None),
        });

        // The liveness responder must exist before any message can arrive.
        inner.handlers.register_request(
            channel::ALIVE_TOPIC,
            Arc::new(|_meta, _payload| Ok(json!({ "alive": true }))),
        );

        let subscribe = async {
            let public = inner
                .bus
                .subscribe(channel::BROADCAST_PATTERN, Arc::clone(&inner.sink))
                .await?;
            let direct = inner
                .bus
                .subscribe(
                    &channel::direct_pattern(&inner.identity),
                    Arc::clone(&inner.sink),
                )
                .await?;
            Ok::<_, BusError>((public, direct))
        };
        let (public, direct) = tokio::time::timeout(inner.config.connect_timeout, subscribe)
            .await
            .map_err(|_| BusError::Unavailable {
                message: "connect timed out".to_string(),
            })??;
        if let Ok(mut subs) = inner.base_subs.lock() {
            subs.push(public);
            subs.push(direct);
        }

        let pump = tokio::spawn(dispatch::run(Arc::clone(&inner), rx));
        if let Ok(mut slot) = inner.pump.lock() {
            *slot = Some(pump);
        }

        tracing::info!(identity = %inner.identity, "client connected");
        Ok(SwarmClient { inner })
    }
}

/// Identities become channel segments, so the channel grammar constrains
/// them: `pub` and `grp` are family markers, and `.` is the separator.
fn validate_identity(identity: &str) -> Result<(), ClientError> {
    let message = if identity.is_empty() {
        "identity must not be empty"
    } else if identity == "pub" || identity == "grp" {
        "identity collides with a reserved channel family"
    } else if identity.contains('.') {
        "identity must not contain '.'"
    } else {
        return Ok(());
    };
    Err(ClientError::InvalidIdentity {
        message: message.to_string(),
    })
}

/// A connected fabric participant.
///
/// Cheap to clone; clones share the same underlying client.
#[derive(Clone)]
pub struct SwarmClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for SwarmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwarmClient")
            .field("identity", &self.inner.identity)
            .finish()
    }
}

impl SwarmClient {
    /// Start building a client.
    pub fn builder(identity: impl Into<Identity>) -> SwarmClientBuilder {
        SwarmClientBuilder::new(identity)
    }

    /// This client's fleet identity.
    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    /// Whether the backend is reachable and the client has not shut down.
    pub fn connected(&self) -> bool {
        !self.inner.is_shutdown() && self.inner.bus.connected()
    }

    /// Snapshot of the dispatch counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    // ------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------

    /// Publish a fire-and-forget message to every fleet member.
    ///
    /// The sender's own broadcast handler is never invoked.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the client is shut down or the publish
    /// fails.
    pub async fn broadcast(&self, topic: &str, payload: Value) -> Result<(), ClientError> {
        self.inner.ensure_live()?;
        let env = Envelope::broadcast(&self.inner.identity, topic, payload);
        self.inner
            .publish_envelope(&channel::broadcast(topic), &env)
            .await
    }

    /// Publish a fire-and-forget message to one identity.
    ///
    /// Casts to self are delivered normally.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the client is shut down or the publish
    /// fails.
    pub async fn cast(&self, target: &str, topic: &str, payload: Value) -> Result<(), ClientError> {
        self.inner.ensure_live()?;
        let env = Envelope::cast(&self.inner.identity, target, topic, payload);
        self.inner
            .publish_envelope(&channel::direct(target, topic), &env)
            .await
    }

    /// Send a request and wait for the reply, with the configured default
    /// timeout.
    ///
    /// Awaiting the returned future is the synchronous variant; holding it
    /// and awaiting later is the asynchronous one — resolution terms are
    /// identical either way.
    ///
    /// # Errors
    ///
    /// Exactly one of: the reply payload, [`RequestError::Reply`] with the
    /// remote handler failure, timeout, or shutdown, or
    /// [`RequestError::Send`] when publishing fails.
    pub async fn request(
        &self,
        target: &str,
        topic: &str,
        payload: Value,
    ) -> Result<Value, RequestError> {
        let timeout = self.inner.config.request_timeout;
        requests::call(&self.inner, target, topic, payload, timeout).await
    }

    /// [`request`](SwarmClient::request) with an explicit deadline.
    ///
    /// A zero deadline still publishes the request before timing out.
    ///
    /// # Errors
    ///
    /// Same terms as [`request`](SwarmClient::request).
    pub async fn request_with_timeout(
        &self,
        target: &str,
        topic: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, RequestError> {
        requests::call(&self.inner, target, topic, payload, timeout).await
    }

    /// Fan a request out to many identities and collect one [`Reply`] per
    /// target, with the configured default timeout.
    ///
    /// Targets that fail to answer by the deadline are reported as
    /// [`ReplyError::Timeout`](crate::ReplyError::Timeout).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] only when a request cannot be published;
    /// per-target failures land in the result map.
    pub async fn map(
        &self,
        targets: &[&str],
        topic: &str,
        payload: Value,
    ) -> Result<HashMap<Identity, Reply>, ClientError> {
        let timeout = self.inner.config.request_timeout;
        requests::fan_out(&self.inner, targets, topic, payload, timeout).await
    }

    /// [`map`](SwarmClient::map) with an explicit deadline.
    ///
    /// # Errors
    ///
    /// Same terms as [`map`](SwarmClient::map).
    pub async fn map_with_timeout(
        &self,
        targets: &[&str],
        topic: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<HashMap<Identity, Reply>, ClientError> {
        requests::fan_out(&self.inner, targets, topic, payload, timeout).await
    }

    /// Probe whether `identity` answers the reserved liveness topic within
    /// one second. Any reply — payload or handler error — means alive.
    pub async fn alive(&self, identity: &str) -> bool {
        let result = requests::call(
            &self.inner,
            identity,
            channel::ALIVE_TOPIC,
            json!({}),
            ALIVE_PROBE_TIMEOUT,
        )
        .await;
        match result {
            Ok(_) => true,
            // A handler failure is still a reply; the peer is alive.
            Err(RequestError::Reply(crate::ReplyError::Handler { .. })) => true,
            Err(_) => false,
        }
    }

    // ------------------------------------------------------------------
    // Handlers
    // ------------------------------------------------------------------

    /// Register the broadcast handler for `topic`, replacing any previous
    /// one.
    pub fn on_broadcast<F>(&self, topic: &str, handler: F)
    where
        F: Fn(&Meta, &Value) + Send + Sync + 'static,
    {
        self.inner
            .handlers
            .register_event(EventKind::Broadcast, topic, Arc::new(handler));
    }

    /// Register the cast handler for `topic`, replacing any previous one.
    pub fn on_cast<F>(&self, topic: &str, handler: F)
    where
        F: Fn(&Meta, &Value) + Send + Sync + 'static,
    {
        self.inner
            .handlers
            .register_event(EventKind::Cast, topic, Arc::new(handler));
    }

    /// Register the group-message handler for `topic`, replacing any
    /// previous one.
    pub fn on_group<F>(&self, topic: &str, handler: F)
    where
        F: Fn(&Meta, &Value) + Send + Sync + 'static,
    {
        self.inner
            .handlers
            .register_event(EventKind::Group, topic, Arc::new(handler));
    }

    /// Register the request handler for `topic`, replacing any previous
    /// one. The returned value becomes the response payload; an `Err` or a
    /// panic reaches the caller as a handler failure rather than a timeout.
    pub fn on_request<F>(&self, topic: &str, handler: F)
    where
        F: Fn(&Meta, &Value) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.inner.handlers.register_request(topic, Arc::new(handler));
    }

    /// Register the contract handler pair for `topic`, replacing any
    /// previous one.
    pub fn on_contract(&self, topic: &str, handler: ContractHandler) {
        self.inner.handlers.register_contract(topic, handler);
    }

    /// Remove the handler for `(kind, topic)`; returns whether one was
    /// registered.
    pub fn deregister(&self, kind: HandlerKind, topic: &str) -> bool {
        self.inner.handlers.deregister(kind, topic)
    }

    // ------------------------------------------------------------------
    // Contracts
    // ------------------------------------------------------------------

    /// Open a sealed-bid auction on `topic` and collect bids until the
    /// deadline. At most one bidder is awarded; losers are never notified.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the opening broadcast or the award cannot
    /// be published, or [`ClientError::Shutdown`] when the client shuts
    /// down mid-auction (the contract then closes winnerless).
    pub async fn collect_bids(
        &self,
        topic: &str,
        options: BidOptions,
    ) -> Result<ContractOutcome, ClientError> {
        contract::collect(&self.inner, topic, options).await
    }

    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    /// Join `group_id`, implicitly leaving any current group. Idempotent
    /// when already a member.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the client is shut down or the
    /// subscription change fails.
    pub async fn join_group(&self, group_id: &str) -> Result<(), ClientError> {
        self.inner.ensure_live()?;
        self.inner
            .group
            .join(&self.inner.bus, &self.inner.sink, group_id)
            .await
    }

    /// Leave the current group; a no-op when not in one.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the unsubscribe fails.
    pub async fn leave_group(&self) -> Result<(), ClientError> {
        self.inner.group.leave(&self.inner.bus).await
    }

    /// Publish a fire-and-forget message to the current group.
    ///
    /// The sender's own group handler is never invoked.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotInGroup`] without an active membership,
    /// otherwise the usual publish errors.
    pub async fn group_broadcast(&self, topic: &str, payload: Value) -> Result<(), ClientError> {
        self.inner.ensure_live()?;
        let group_id = self.inner.group.current().ok_or(ClientError::NotInGroup)?;
        let env = Envelope::group_msg(&self.inner.identity, &group_id, topic, payload);
        self.inner
            .publish_envelope(&channel::group(&group_id, topic), &env)
            .await
    }

    /// The current group ID, if any.
    pub fn current_group(&self) -> Option<Identity> {
        self.inner.group.current()
    }

    /// Whether this client is currently in a group.
    pub fn in_group(&self) -> bool {
        self.inner.group.current().is_some()
    }

    // ------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------

    /// Key/value handle for `namespace`; pass the empty string for the
    /// default namespace.
    pub fn registry(&self, namespace: &str) -> Registry {
        Registry::new(
            Arc::clone(&self.inner.bus),
            self.inner.config.registry_prefix.clone(),
            namespace.to_string(),
        )
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Tear the client down: stop intake, cancel every pending request
    /// with a shutdown outcome, close open contracts winnerless, leave any
    /// group, and drop the base subscriptions. Idempotent.
    pub async fn shutdown(&self) {
        if self.inner.shutdown.send_replace(true) {
            return;
        }
        tracing::info!(identity = %self.inner.identity, "client shutting down");

        let handles: Vec<SubscriptionHandle> = self
            .inner
            .base_subs
            .lock()
            .map(|mut subs| subs.drain(..).collect())
            .unwrap_or_default();
        for handle in handles {
            if let Err(err) = self.inner.bus.unsubscribe(handle).await {
                tracing::warn!(%err, "unsubscribe during shutdown failed");
            }
        }
        if let Err(err) = self.inner.group.leave(&self.inner.bus).await {
            tracing::warn!(%err, "group leave during shutdown failed");
        }
        self.inner.pending.abort_all();
        self.inner.contracts.abort_all();

        let pump = self.inner.pump.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = pump {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use gridswarm_core::MemoryBus;

    use super::*;

    #[tokio::test]
    async fn builder_requires_a_bus() {
        let err = SwarmClient::builder("lone")
            .connect()
            .await
            .expect_err("must fail");
        assert!(matches!(
            err,
            ClientError::Transport(BusError::Rejected { .. })
        ));
    }

    #[tokio::test]
    async fn identities_clashing_with_the_channel_grammar_are_rejected() {
        for bad in ["", "pub", "grp", "healer.3"] {
            let err = SwarmClient::builder(bad)
                .bus(MemoryBus::new())
                .connect()
                .await
                .expect_err("must fail");
            assert!(matches!(err, ClientError::InvalidIdentity { .. }), "{bad:?}");
        }
    }

    #[tokio::test]
    async fn connect_establishes_base_subscriptions() {
        let bus = MemoryBus::new();
        let client = SwarmClient::builder("scout-1")
            .bus(bus.clone())
            .connect()
            .await
            .expect("connect");

        assert_eq!(client.identity(), "scout-1");
        assert!(client.connected());
        // Public and per-identity.
        assert_eq!(bus.subscription_count(), 2);

        client.shutdown().await;
        assert!(!client.connected());
        assert_eq!(bus.subscription_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_blocks_new_work() {
        let client = SwarmClient::builder("scout-1")
            .bus(MemoryBus::new())
            .connect()
            .await
            .expect("connect");

        client.shutdown().await;
        client.shutdown().await;

        let err = client
            .broadcast("status", json!({}))
            .await
            .expect_err("must fail");
        assert!(matches!(err, ClientError::Shutdown));
    }
}

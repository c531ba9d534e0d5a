//! User-registered callback tables.
//!
//! Four event-style tables (`broadcast`, `cast`, `request`, `group`) plus
//! the contract table, each keyed by topic. One entry per (kind, topic);
//! re-registration silently replaces, and there are no wildcards. Lookups
//! are the dispatch hot path, so the tables sit behind read-optimized
//! locks; writes happen only when user code (re)registers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use gridswarm_core::{CorrelationId, Envelope, Identity};
use serde_json::Value;

/// Metadata handed to every handler alongside the decoded payload.
#[derive(Debug, Clone)]
pub struct Meta {
    /// Sender identity.
    pub from: Identity,
    /// Topic the message was published under.
    pub topic: String,
    /// Correlation token, present on request/response and auction traffic.
    pub correlation_id: Option<CorrelationId>,
}

impl Meta {
    pub(crate) fn for_envelope(env: &Envelope) -> Self {
        Self {
            from: env.from.clone(),
            topic: env.topic.clone(),
            correlation_id: (!env.correlation_id.is_empty())
                .then(|| CorrelationId::from_wire(&env.correlation_id)),
        }
    }
}

/// Failure reported by a request handler; crosses the wire as a structured
/// error payload so the caller sees it as
/// [`ReplyError::Handler`](crate::ReplyError::Handler) rather than a timeout.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    /// Human-readable failure detail.
    pub message: String,
}

impl HandlerError {
    /// Build a handler error from any printable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

/// Fire-and-forget callback for broadcasts, casts, and group messages.
pub type EventHandler = Arc<dyn Fn(&Meta, &Value) + Send + Sync>;

/// Request callback; the returned value becomes the response payload.
pub type RequestHandler = Arc<dyn Fn(&Meta, &Value) -> Result<Value, HandlerError> + Send + Sync>;

/// Open-phase contract callback: returns a bid in `[0.0, 1.0]`, or any
/// negative value (conventionally [`DECLINE`](crate::contract::DECLINE)) to
/// stay out of the auction. Declining publishes nothing.
pub type OpenBid = Arc<dyn Fn(&Meta) -> f64 + Send + Sync>;

/// Win-phase contract callback, invoked when this client is awarded the
/// contract.
pub type OnWin = Arc<dyn Fn(&Meta) + Send + Sync>;

/// The pair of callbacks registered per contract topic.
#[derive(Clone)]
pub struct ContractHandler {
    pub(crate) on_open: OpenBid,
    pub(crate) on_win: OnWin,
}

impl ContractHandler {
    /// Bundle an open-phase and a win-phase callback.
    pub fn new<O, W>(on_open: O, on_win: W) -> Self
    where
        O: Fn(&Meta) -> f64 + Send + Sync + 'static,
        W: Fn(&Meta) + Send + Sync + 'static,
    {
        Self {
            on_open: Arc::new(on_open),
            on_win: Arc::new(on_win),
        }
    }
}

/// The three fire-and-forget delivery kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum EventKind {
    Broadcast,
    Cast,
    Group,
}

/// Handler kinds addressable by [`deregister`](crate::SwarmClient::deregister).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    /// Public broadcast handlers.
    Broadcast,
    /// Directed cast handlers.
    Cast,
    /// Request handlers.
    Request,
    /// Group message handlers.
    Group,
    /// Contract handler pairs.
    Contract,
}

pub(crate) struct HandlerTable {
    broadcast: RwLock<HashMap<String, EventHandler>>,
    cast: RwLock<HashMap<String, EventHandler>>,
    group: RwLock<HashMap<String, EventHandler>>,
    request: RwLock<HashMap<String, RequestHandler>>,
    contract: RwLock<HashMap<String, ContractHandler>>,
}

impl HandlerTable {
    pub(crate) fn new() -> Self {
        Self {
            broadcast: RwLock::new(HashMap::new()),
            cast: RwLock::new(HashMap::new()),
            group: RwLock::new(HashMap::new()),
            request: RwLock::new(HashMap::new()),
            contract: RwLock::new(HashMap::new()),
        }
    }

    fn event_table(&self, kind: EventKind) -> &RwLock<HashMap<String, EventHandler>> {
        match kind {
            EventKind::Broadcast => &self.broadcast,
            EventKind::Cast => &self.cast,
            EventKind::Group => &self.group,
        }
    }

    pub(crate) fn register_event(&self, kind: EventKind, topic: &str, handler: EventHandler) {
        if let Ok(mut table) = self.event_table(kind).write() {
            if table.insert(topic.to_string(), handler).is_some() {
                tracing::debug!(?kind, topic, "event handler replaced");
            }
        }
    }

    pub(crate) fn register_request(&self, topic: &str, handler: RequestHandler) {
        if let Ok(mut table) = self.request.write() {
            if table.insert(topic.to_string(), handler).is_some() {
                tracing::debug!(topic, "request handler replaced");
            }
        }
    }

    pub(crate) fn register_contract(&self, topic: &str, handler: ContractHandler) {
        if let Ok(mut table) = self.contract.write() {
            if table.insert(topic.to_string(), handler).is_some() {
                tracing::debug!(topic, "contract handler replaced");
            }
        }
    }

    pub(crate) fn deregister(&self, kind: HandlerKind, topic: &str) -> bool {
        match kind {
            HandlerKind::Broadcast => self
                .broadcast
                .write()
                .map(|mut t| t.remove(topic).is_some())
                .unwrap_or(false),
            HandlerKind::Cast => self
                .cast
                .write()
                .map(|mut t| t.remove(topic).is_some())
                .unwrap_or(false),
            HandlerKind::Group => self
                .group
                .write()
                .map(|mut t| t.remove(topic).is_some())
                .unwrap_or(false),
            HandlerKind::Request => self
                .request
                .write()
                .map(|mut t| t.remove(topic).is_some())
                .unwrap_or(false),
            HandlerKind::Contract => self
                .contract
                .write()
                .map(|mut t| t.remove(topic).is_some())
                .unwrap_or(false),
        }
    }

    pub(crate) fn event(&self, kind: EventKind, topic: &str) -> Option<EventHandler> {
        self.event_table(kind)
            .read()
            .ok()
            .and_then(|table| table.get(topic).cloned())
    }

    pub(crate) fn request(&self, topic: &str) -> Option<RequestHandler> {
        self.request
            .read()
            .ok()
            .and_then(|table| table.get(topic).cloned())
    }

    pub(crate) fn contract(&self, topic: &str) -> Option<ContractHandler> {
        self.contract
            .read()
            .ok()
            .and_then(|table| table.get(topic).cloned())
    }
}

//! The inbound dispatch pump.
//!
//! Bus sinks enqueue raw messages into a bounded channel; one pump task
//! drains it, decodes envelopes, and routes by kind. The pump itself never
//! runs user code: handler bodies execute on spawned worker tasks, while
//! correlation and bid bookkeeping (lock-bounded, no callbacks) happen
//! inline. A panicking handler is caught, logged with the envelope
//! metadata, and — for requests — converted into a structured error
//! response so the caller is never left to time out on a crash.
//!
//! Self-delivery: broadcasts, group messages, and bid openings from this
//! client are filtered here; casts and requests addressed to self are
//! delivered normally.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use bytes::Bytes;
use gridswarm_core::{channel, envelope, CorrelationId, Envelope, Kind, MessageSink};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::client::ClientInner;
use crate::handlers::{EventKind, Meta};
use crate::metrics::DispatchMetrics;
use crate::reply::ReplyError;

/// One raw message as handed over by a bus sink.
pub(crate) struct Inbound {
    channel: String,
    payload: Bytes,
}

/// Build the sink shared by every subscription of one client.
///
/// Runs in the backend's reader context, so it only copies and enqueues;
/// when the queue is full the message is dropped and counted.
pub(crate) fn make_sink(tx: mpsc::Sender<Inbound>, metrics: Arc<DispatchMetrics>) -> MessageSink {
    Arc::new(move |channel, payload| {
        let msg = Inbound {
            channel: channel.to_string(),
            payload: Bytes::copy_from_slice(payload),
        };
        match tx.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                metrics.dropped();
                tracing::warn!(channel, "inbound queue full, dropping message");
            }
            // Closed means the client is shutting down; silence is fine.
            Err(TrySendError::Closed(_)) => {}
        }
    })
}

/// Drain the inbound queue until shutdown.
pub(crate) async fn run(inner: Arc<ClientInner>, mut rx: mpsc::Receiver<Inbound>) {
    let mut shutdown = inner.shutdown_rx();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            msg = rx.recv() => match msg {
                Some(msg) => route(&inner, msg),
                None => break,
            },
        }
    }
    tracing::debug!(identity = %inner.identity, "dispatch pump stopped");
}

fn route(inner: &Arc<ClientInner>, msg: Inbound) {
    let env = match Envelope::decode(&msg.payload) {
        Ok(env) => env,
        Err(err) => {
            inner.metrics.decode_failure();
            tracing::warn!(channel = %msg.channel, %err, "dropping undecodable message");
            return;
        }
    };
    inner.metrics.delivered();

    match env.kind {
        Kind::Broadcast => deliver_event(inner, EventKind::Broadcast, env, true),
        Kind::Cast => deliver_event(inner, EventKind::Cast, env, false),
        Kind::GroupMsg => deliver_event(inner, EventKind::Group, env, true),
        Kind::Request => deliver_request(inner, env),
        Kind::Response => {
            let correlation_id = CorrelationId::from_wire(&env.correlation_id);
            let reply = match envelope::as_error(&env.payload) {
                Some(message) => Err(ReplyError::Handler {
                    message: message.to_string(),
                }),
                None => Ok(env.payload),
            };
            inner.pending.record(&correlation_id, &env.from, reply);
        }
        Kind::BidOpen => deliver_bid_open(inner, env),
        Kind::BidSubmit => match env.bid_value() {
            Some(value) => {
                let correlation_id = CorrelationId::from_wire(&env.correlation_id);
                inner.contracts.record_bid(&correlation_id, &env.from, value);
            }
            None => {
                tracing::warn!(from = %env.from, topic = %env.topic, "malformed bid dropped");
            }
        },
        Kind::BidAward => deliver_award(inner, env),
    }
}

fn deliver_event(inner: &Arc<ClientInner>, kind: EventKind, env: Envelope, filter_self: bool) {
    if filter_self && env.from == inner.identity {
        return;
    }
    let Some(handler) = inner.handlers.event(kind, &env.topic) else {
        tracing::trace!(?kind, topic = %env.topic, "no handler registered, dropping");
        return;
    };
    tokio::spawn(async move {
        let meta = Meta::for_envelope(&env);
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(&meta, &env.payload))) {
            tracing::error!(
                from = %meta.from,
                topic = %meta.topic,
                panic = %panic_message(&panic),
                "event handler panicked"
            );
        }
    });
}

fn deliver_request(inner: &Arc<ClientInner>, env: Envelope) {
    let Some(handler) = inner.handlers.request(&env.topic) else {
        // No reply on purpose: the caller's deadline is the contract here.
        tracing::debug!(from = %env.from, topic = %env.topic, "request with no handler dropped");
        return;
    };
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        let meta = Meta::for_envelope(&env);
        let payload = match catch_unwind(AssertUnwindSafe(|| handler(&meta, &env.payload))) {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => {
                tracing::warn!(from = %meta.from, topic = %meta.topic, %err, "request handler failed");
                envelope::error_payload(&err.message)
            }
            Err(panic) => {
                let message = panic_message(&panic);
                tracing::error!(
                    from = %meta.from,
                    topic = %meta.topic,
                    panic = %message,
                    "request handler panicked"
                );
                envelope::error_payload(&message)
            }
        };
        let response = Envelope::response(&inner.identity, &env.from, payload, &env.correlation_id);
        let reply_channel = channel::direct(&env.from, channel::RESPONSE_TOPIC);
        if let Err(err) = inner.publish_envelope(&reply_channel, &response).await {
            tracing::warn!(%err, to = %env.from, "failed to publish response");
        }
    });
}

fn deliver_bid_open(inner: &Arc<ClientInner>, env: Envelope) {
    if env.from == inner.identity {
        return;
    }
    let Some(handler) = inner.handlers.contract(&env.topic) else {
        tracing::trace!(topic = %env.topic, "no contract handler, ignoring bid_open");
        return;
    };
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        let meta = Meta::for_envelope(&env);
        let value = match catch_unwind(AssertUnwindSafe(|| (handler.on_open)(&meta))) {
            Ok(value) => value,
            Err(panic) => {
                tracing::error!(
                    topic = %meta.topic,
                    panic = %panic_message(&panic),
                    "contract open callback panicked, declining"
                );
                return;
            }
        };
        if value.is_nan() || value < 0.0 {
            tracing::trace!(topic = %meta.topic, "contract declined");
            return;
        }
        let submit = Envelope::bid_submit(
            &inner.identity,
            &env.from,
            &env.topic,
            &env.correlation_id,
            value,
        );
        let submit_channel = channel::direct(&env.from, &env.topic);
        if let Err(err) = inner.publish_envelope(&submit_channel, &submit).await {
            tracing::warn!(%err, topic = %env.topic, "failed to publish bid");
        }
    });
}

fn deliver_award(inner: &Arc<ClientInner>, env: Envelope) {
    let Some(handler) = inner.handlers.contract(&env.topic) else {
        tracing::debug!(topic = %env.topic, "bid_award with no contract handler dropped");
        return;
    };
    tokio::spawn(async move {
        let meta = Meta::for_envelope(&env);
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| (handler.on_win)(&meta))) {
            tracing::error!(
                topic = %meta.topic,
                panic = %panic_message(&panic),
                "contract win callback panicked"
            );
        }
    });
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

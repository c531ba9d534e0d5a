//! Request/response coordination.
//!
//! Outbound requests install an entry in the pending table keyed by a fresh
//! correlation ID, publish one `request` envelope per target, then wait on a
//! oneshot for completion. The dispatcher records inbound responses into the
//! table; the entry completes when every target has answered, and the waiter
//! fills in `Timeout` for stragglers when the deadline fires. Late responses
//! find no entry and are dropped silently.
//!
//! A detached reaper task guarantees the table entry is removed even when
//! the caller drops the request future before its deadline.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gridswarm_core::{channel, CorrelationId, Envelope, Identity};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::client::ClientInner;
use crate::error::{ClientError, RequestError};
use crate::reply::{Reply, ReplyError};

/// Slack added to the reaper's deadline so the waiter's own timeout path
/// always runs first.
const REAPER_GRACE: Duration = Duration::from_millis(100);

struct Pending {
    targets: HashSet<Identity>,
    results: HashMap<Identity, Reply>,
    tx: Option<oneshot::Sender<HashMap<Identity, Reply>>>,
}

/// Correlation table for in-flight requests.
pub(crate) struct PendingTable {
    entries: Mutex<HashMap<CorrelationId, Pending>>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Install an entry expecting one response per target.
    fn insert(
        &self,
        correlation_id: CorrelationId,
        targets: &[&str],
    ) -> oneshot::Receiver<HashMap<Identity, Reply>> {
        let (tx, rx) = oneshot::channel();
        let pending = Pending {
            targets: targets.iter().map(|t| t.to_string()).collect(),
            results: HashMap::new(),
            tx: Some(tx),
        };
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(correlation_id, pending);
        }
        rx
    }

    /// Record one response. First response per (correlation, sender) wins;
    /// duplicates, responses from non-targets, and late responses are
    /// dropped.
    pub(crate) fn record(&self, correlation_id: &CorrelationId, from: &str, reply: Reply) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        let Some(pending) = entries.get_mut(correlation_id) else {
            tracing::debug!(%correlation_id, from, "late or unknown response dropped");
            return;
        };
        if !pending.targets.contains(from) {
            tracing::debug!(%correlation_id, from, "response from non-target dropped");
            return;
        }
        if pending.results.contains_key(from) {
            tracing::debug!(%correlation_id, from, "duplicate response dropped");
            return;
        }
        pending.results.insert(from.to_string(), reply);

        if pending.results.len() == pending.targets.len() {
            if let Some(mut done) = entries.remove(correlation_id) {
                if let Some(tx) = done.tx.take() {
                    let _ = tx.send(done.results);
                }
            }
        }
    }

    /// Remove an entry at its deadline, filling missing targets with
    /// `Timeout`.
    fn remove_with_timeouts(
        &self,
        correlation_id: &CorrelationId,
    ) -> Option<HashMap<Identity, Reply>> {
        let mut pending = self
            .entries
            .lock()
            .ok()
            .and_then(|mut entries| entries.remove(correlation_id))?;
        for target in &pending.targets {
            pending
                .results
                .entry(target.clone())
                .or_insert(Err(ReplyError::Timeout));
        }
        Some(pending.results)
    }

    /// Drop an entry without completing it.
    pub(crate) fn discard(&self, correlation_id: &CorrelationId) -> bool {
        self.entries
            .lock()
            .map(|mut entries| entries.remove(correlation_id).is_some())
            .unwrap_or(false)
    }

    /// Resolve every in-flight request with `Shutdown`.
    pub(crate) fn abort_all(&self) {
        let drained: Vec<Pending> = match self.entries.lock() {
            Ok(mut entries) => entries.drain().map(|(_, p)| p).collect(),
            Err(_) => return,
        };
        for mut pending in drained {
            for target in &pending.targets {
                pending
                    .results
                    .entry(target.clone())
                    .or_insert(Err(ReplyError::Shutdown));
            }
            if let Some(tx) = pending.tx.take() {
                let _ = tx.send(pending.results);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
}

/// Send one request per target and collect replies until all arrive or the
/// deadline fires.
pub(crate) async fn fan_out(
    inner: &Arc<ClientInner>,
    targets: &[&str],
    topic: &str,
    payload: Value,
    timeout: Duration,
) -> Result<HashMap<Identity, Reply>, ClientError> {
    inner.ensure_live()?;
    let correlation_id = CorrelationId::mint();
    let mut rx = inner.pending.insert(correlation_id.clone(), targets);
    spawn_reaper(inner, correlation_id.clone(), timeout);

    // Publish before waiting: even a zero timeout must put the request on
    // the wire.
    for target in targets {
        let env = Envelope::request(
            &inner.identity,
            target,
            topic,
            payload.clone(),
            correlation_id.as_str(),
        );
        if let Err(err) = inner
            .publish_envelope(&channel::direct(target, topic), &env)
            .await
        {
            inner.pending.discard(&correlation_id);
            return Err(err);
        }
    }

    tokio::select! {
        res = &mut rx => Ok(res.unwrap_or_else(|_| aborted(targets))),
        _ = tokio::time::sleep(timeout) => {
            match inner.pending.remove_with_timeouts(&correlation_id) {
                Some(results) => Ok(results),
                // Completion raced the deadline; the results are in the
                // channel.
                None => Ok(rx.try_recv().unwrap_or_else(|_| aborted(targets))),
            }
        }
    }
}

/// Single-target request returning exactly one of payload, handler error,
/// timeout, or shutdown.
pub(crate) async fn call(
    inner: &Arc<ClientInner>,
    target: &str,
    topic: &str,
    payload: Value,
    timeout: Duration,
) -> Result<Value, RequestError> {
    let mut results = fan_out(inner, &[target], topic, payload, timeout)
        .await
        .map_err(RequestError::Send)?;
    results
        .remove(target)
        .unwrap_or(Err(ReplyError::Timeout))
        .map_err(RequestError::Reply)
}

fn aborted(targets: &[&str]) -> HashMap<Identity, Reply> {
    targets
        .iter()
        .map(|t| (t.to_string(), Err(ReplyError::Shutdown)))
        .collect()
}

fn spawn_reaper(inner: &Arc<ClientInner>, correlation_id: CorrelationId, timeout: Duration) {
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        tokio::time::sleep(timeout + REAPER_GRACE).await;
        if inner.pending.discard(&correlation_id) {
            tracing::debug!(%correlation_id, "reaped abandoned pending request");
        }
    });
}

//! Sealed-bid contract auctions.
//!
//! A contract is a two-phase protocol on public channels: the auctioneer
//! broadcasts `bid_open` with a deadline, bidders answer directly with
//! `bid_submit`, and at the deadline the auctioneer awards the contract to
//! exactly one bidder with `bid_award`. Losers are never notified.
//!
//! Eligibility is enforced at receive time: bids from outside the whitelist,
//! below the floor, or carrying NaN never enter the book. Bid values outside
//! `[0.0, 1.0]` are accepted as given and compared numerically.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gridswarm_core::{channel, CorrelationId, Envelope, Identity};

use crate::client::ClientInner;
use crate::error::ClientError;

/// Conventional decline sentinel for open-phase callbacks. Any negative
/// return declines; this constant just names the idiom.
pub const DECLINE: f64 = -1.0;

/// Slack added to the reaper's deadline so the auctioneer's own deadline
/// path always runs first.
const REAPER_GRACE: Duration = Duration::from_millis(100);

/// Options for [`collect_bids`](crate::SwarmClient::collect_bids).
#[derive(Debug, Clone, Default)]
pub struct BidOptions {
    /// When set, only bids from these identities are eligible.
    pub valid_bidders: Option<Vec<Identity>>,
    /// Bids strictly below this floor are ignored. Defaults to `0.0`.
    pub min_bid: f64,
    /// Bidding window; defaults to the client's configured contract
    /// deadline.
    pub deadline: Option<Duration>,
}

/// Result of a closed auction.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractOutcome {
    /// The awarded identity, or `None` when no eligible bid arrived.
    pub winner: Option<Identity>,
    /// Every eligible bid received before the deadline.
    pub bids: HashMap<Identity, f64>,
}

impl ContractOutcome {
    /// Whether the contract was awarded.
    pub fn is_awarded(&self) -> bool {
        self.winner.is_some()
    }
}

/// One eligible bid in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RecordedBid {
    pub(crate) from: Identity,
    pub(crate) value: f64,
    /// Auctioneer-side receive order; the arrival tie-break.
    pub(crate) seq: u64,
}

struct OpenContract {
    valid_bidders: Option<HashSet<Identity>>,
    min_bid: f64,
    bids: Vec<RecordedBid>,
}

/// Table of auctions this client currently has open.
pub(crate) struct ContractTable {
    entries: Mutex<HashMap<CorrelationId, OpenContract>>,
}

impl ContractTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn open(&self, correlation_id: CorrelationId, options: &BidOptions) {
        let contract = OpenContract {
            valid_bidders: options
                .valid_bidders
                .as_ref()
                .map(|v| v.iter().cloned().collect()),
            min_bid: options.min_bid,
            bids: Vec::new(),
        };
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(correlation_id, contract);
        }
    }

    /// Record one inbound bid, applying the eligibility rules. Bids for
    /// unknown correlations (expired auctions) are dropped silently.
    pub(crate) fn record_bid(&self, correlation_id: &CorrelationId, from: &str, value: f64) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        let Some(contract) = entries.get_mut(correlation_id) else {
            tracing::debug!(%correlation_id, from, "bid for closed contract dropped");
            return;
        };
        if value.is_nan() {
            tracing::debug!(%correlation_id, from, "NaN bid dropped");
            return;
        }
        if let Some(valid) = &contract.valid_bidders {
            if !valid.contains(from) {
                tracing::debug!(%correlation_id, from, "bid from non-whitelisted identity dropped");
                return;
            }
        }
        if value < contract.min_bid {
            tracing::debug!(%correlation_id, from, value, "bid below floor dropped");
            return;
        }
        if contract.bids.iter().any(|b| b.from == from) {
            tracing::debug!(%correlation_id, from, "duplicate bid dropped");
            return;
        }
        let seq = contract.bids.len() as u64;
        contract.bids.push(RecordedBid {
            from: from.to_string(),
            value,
            seq,
        });
    }

    fn take(&self, correlation_id: &CorrelationId) -> Vec<RecordedBid> {
        self.entries
            .lock()
            .ok()
            .and_then(|mut entries| entries.remove(correlation_id))
            .map(|c| c.bids)
            .unwrap_or_default()
    }

    fn discard(&self, correlation_id: &CorrelationId) -> bool {
        self.entries
            .lock()
            .map(|mut entries| entries.remove(correlation_id).is_some())
            .unwrap_or(false)
    }

    /// Drop every open auction without awarding.
    pub(crate) fn abort_all(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

/// Winner selection: highest value, then earliest arrival, then
/// lexicographically smallest identity.
pub(crate) fn select_winner(bids: &[RecordedBid]) -> Option<&RecordedBid> {
    bids.iter().min_by(|a, b| {
        b.value
            .partial_cmp(&a.value)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.seq.cmp(&b.seq))
            .then_with(|| a.from.cmp(&b.from))
    })
}

/// Run one auction: open, collect until the deadline, award.
pub(crate) async fn collect(
    inner: &Arc<ClientInner>,
    topic: &str,
    options: BidOptions,
) -> Result<ContractOutcome, ClientError> {
    inner.ensure_live()?;
    let deadline = options.deadline.unwrap_or(inner.config.contract_deadline);
    let correlation_id = CorrelationId::mint();
    inner.contracts.open(correlation_id.clone(), &options);
    spawn_reaper(inner, correlation_id.clone(), deadline);

    let open = Envelope::bid_open(
        &inner.identity,
        topic,
        correlation_id.as_str(),
        deadline.as_millis() as u64,
    );
    if let Err(err) = inner
        .publish_envelope(&channel::broadcast(topic), &open)
        .await
    {
        inner.contracts.discard(&correlation_id);
        return Err(err);
    }

    let mut shutdown = inner.shutdown_rx();
    tokio::select! {
        _ = tokio::time::sleep(deadline) => {}
        _ = shutdown.changed() => {
            inner.contracts.discard(&correlation_id);
            return Err(ClientError::Shutdown);
        }
    }
    // A shutdown that raced the deadline must still close winnerless.
    if inner.is_shutdown() {
        inner.contracts.discard(&correlation_id);
        return Err(ClientError::Shutdown);
    }

    let bids = inner.contracts.take(&correlation_id);
    let winner = select_winner(&bids).map(|b| b.from.clone());
    if let Some(awarded) = &winner {
        let award = Envelope::bid_award(&inner.identity, awarded, topic, correlation_id.as_str());
        inner
            .publish_envelope(&channel::direct(awarded, topic), &award)
            .await?;
        tracing::info!(%correlation_id, topic, winner = %awarded, "contract awarded");
    } else {
        tracing::debug!(%correlation_id, topic, "contract expired with no eligible bids");
    }

    Ok(ContractOutcome {
        winner,
        bids: bids.into_iter().map(|b| (b.from, b.value)).collect(),
    })
}

fn spawn_reaper(inner: &Arc<ClientInner>, correlation_id: CorrelationId, deadline: Duration) {
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        tokio::time::sleep(deadline + REAPER_GRACE).await;
        if inner.contracts.discard(&correlation_id) {
            tracing::debug!(%correlation_id, "reaped abandoned contract");
        }
    });
}

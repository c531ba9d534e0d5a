//! Client configuration.

use std::time::Duration;

/// Tunables for a [`SwarmClient`](crate::SwarmClient).
///
/// Defaults match the protocol's documented timeouts; the presets mirror the
/// two deployment shapes the fleet actually runs: everything on one LAN, or
/// characters spread across regions.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Default deadline for `request` and `map` calls.
    pub request_timeout: Duration,

    /// Default bidding window for `collect_bids`.
    pub contract_deadline: Duration,

    /// Deadline for establishing the base subscriptions at connect time.
    pub connect_timeout: Duration,

    /// Bound on the inbound dispatch queue. When full, further inbound
    /// messages are dropped and counted; sizes below the default risk drops
    /// under ordinary burst load.
    pub inbound_queue_size: usize,

    /// Prefix prepended to every registry key.
    pub registry_prefix: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            contract_deadline: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(5),
            inbound_queue_size: 1024,
            registry_prefix: "gs.".to_string(),
        }
    }
}

impl ClientConfig {
    /// Preset for fleets sharing a machine or LAN: tight timeouts.
    pub fn local_fleet() -> Self {
        Self {
            request_timeout: Duration::from_secs(1),
            contract_deadline: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(1),
            ..Self::default()
        }
    }

    /// Preset for geographically spread fleets: loose timeouts, deeper queue.
    pub fn wan_fleet() -> Self {
        Self {
            request_timeout: Duration::from_secs(15),
            contract_deadline: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(30),
            inbound_queue_size: 4096,
            ..Self::default()
        }
    }
}

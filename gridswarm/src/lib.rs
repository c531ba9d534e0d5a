//! # gridswarm
//!
//! Client-side coordination fabric for real-time fleets of game-automation
//! clients, built over an abstract pub/sub + key/value backend.
//!
//! Every participant connects with a self-declared identity and gets:
//!
//! - **Messaging** — fleet-wide broadcasts, directed casts, and correlated
//!   request/response with deadlines and fan-out aggregation.
//! - **Contracts** — sealed-bid, single-winner task auctions with a
//!   deadline and deterministic tie-breaking.
//! - **Groups** — membership in at most one private channel family at a
//!   time, with automatic subscription lifecycle.
//! - **Registry** — namespaced JSON key/value storage on the backend.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 User handlers                    │
//! │    on_broadcast / on_request / on_contract …     │
//! ├─────────────────────────────────────────────────┤
//! │   SwarmClient (façade, lifecycle, config)        │
//! │   • requests: correlation table + deadlines      │
//! │   • contracts: bid book + winner selection       │
//! │   • groups: single-slot membership               │
//! ├─────────────────────────────────────────────────┤
//! │   Dispatch pump (decode, route, spawn workers)   │
//! ├─────────────────────────────────────────────────┤
//! │   BusProvider (pub/sub + KV seam, gridswarm-core)│
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! Inbound messages flow from bus sinks into a bounded queue; one pump task
//! decodes and routes them, and handler bodies run on worker tasks so the
//! pump never blocks on user code. Outbound operations name a channel via
//! [`gridswarm_core::channel`] and publish through the shared bus.
//!
//! ## Quick start
//!
//! ```no_run
//! use gridswarm::SwarmClient;
//! use gridswarm_core::MemoryBus;
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = MemoryBus::new();
//! let healer = SwarmClient::builder("healer-3").bus(bus.clone()).connect().await?;
//! let scout = SwarmClient::builder("scout-1").bus(bus.clone()).connect().await?;
//!
//! healer.on_request("status", |_meta, _payload| Ok(json!({"hp": 100})));
//! let status = scout.request("healer-3", "status", json!({})).await?;
//! assert_eq!(status["hp"], 100);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// Re-export core types for convenience
pub use gridswarm_core::{
    channel, BusError, BusProvider, CorrelationId, Envelope, Identity, Kind, MemoryBus,
    MessageSink, SubscriptionHandle, WireError,
};

// =============================================================================
// Modules
// =============================================================================

/// Client façade and builder.
pub mod client;

/// Client configuration and presets.
pub mod config;

/// Sealed-bid contract auctions.
pub mod contract;

/// Inbound dispatch pump.
mod dispatch;

/// Error types for fabric operations.
pub mod error;

/// Secure group membership.
mod group;

/// User-registered callback tables.
pub mod handlers;

/// Dispatch counters.
pub mod metrics;

/// Namespaced key/value registry.
pub mod registry;

/// Per-request reply outcomes.
pub mod reply;

/// Request/response coordination.
mod requests;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use client::{SwarmClient, SwarmClientBuilder};
pub use config::ClientConfig;
pub use contract::{BidOptions, ContractOutcome, DECLINE};
pub use error::{ClientError, RequestError};
pub use handlers::{ContractHandler, HandlerError, HandlerKind, Meta};
pub use metrics::MetricsSnapshot;
pub use registry::Registry;
pub use reply::{Reply, ReplyError};

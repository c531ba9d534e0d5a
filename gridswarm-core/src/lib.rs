//! # gridswarm-core
//!
//! Core abstractions for the gridswarm coordination fabric.
//!
//! gridswarm lets fleets of game-automation clients cooperate in real time
//! over a pub/sub backend: broadcasts, directed casts, correlated
//! request/response, sealed-bid contract auctions, secure group channels,
//! and a shared key/value registry. This crate holds the pieces every
//! participant must agree on, independent of any particular backend:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  gridswarm (client)                   │
//! │   dispatcher · requests · contracts · groups · kv     │
//! └───────────────────────┬──────────────────────────────┘
//!                         │ depends on
//!                         ▼
//! ┌──────────────────────────────────────────────────────┐
//! │                   gridswarm-core                      │
//! │   envelope · channels · correlation · BusProvider     │
//! └───────────────────────┬──────────────────────────────┘
//!          ┌──────────────┴──────────────┐
//!          ▼                             ▼
//!   ┌─────────────────┐         ┌─────────────────┐
//!   │    MemoryBus    │         │  Real backends  │
//!   │  (in-process)   │         │ (downstream)    │
//!   └─────────────────┘         └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`envelope`] | The self-describing wire record wrapping every message |
//! | [`channel`] | Logical address → channel-string mapping (the wire contract) |
//! | [`correlation`] | Opaque tokens linking request↔response and auction phases |
//! | [`bus`] | The [`BusProvider`] seam over pub/sub + key/value backends |
//! | [`memory`] | In-process bus for tests and single-process fleets |
//!
//! The channel names and envelope encoding produced here are bit-exact
//! requirements for interoperating fleets; treat them as frozen.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub mod bus;
pub mod channel;
pub mod correlation;
pub mod envelope;
pub mod memory;

// Bus exports
pub use bus::{BusError, BusProvider, MessageSink, SubscriptionHandle};

// Channel exports
pub use channel::{Identity, ALIVE_TOPIC, RESPONSE_TOPIC};

// Correlation exports
pub use correlation::CorrelationId;

// Envelope exports
pub use envelope::{Envelope, Kind, WireError};

// In-process bus export
pub use memory::MemoryBus;

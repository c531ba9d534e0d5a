//! Correlation tokens linking related envelopes.
//!
//! A request and its responses share one correlation ID, as do the three
//! phases of a contract auction (`bid_open` → `bid_submit` → `bid_award`).
//! IDs are minted from the operating system RNG so they are unguessable and
//! never reused within a process lifetime.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Opaque token correlating related envelopes.
///
/// On the wire this is a string of 16 lowercase hex characters. Tables keyed
/// by `CorrelationId` rely on its `Eq + Hash` derivation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Mint a fresh ID from the OS RNG.
    ///
    /// 64 bits of cryptographically strong randomness rendered as hex;
    /// collision within a process lifetime is not a practical concern.
    pub fn mint() -> Self {
        Self(format!("{:016x}", OsRng.next_u64()))
    }

    /// Wrap an ID received on the wire.
    ///
    /// No validation: peers may mint longer IDs, and the table lookups only
    /// need byte equality.
    pub fn from_wire(raw: &str) -> Self {
        Self(raw.to_string())
    }

    /// The wire representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

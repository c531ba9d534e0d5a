//! The self-describing wire record wrapping every message.
//!
//! Every payload on the bus travels inside an [`Envelope`] encoded as JSON:
//!
//! ```json
//! { "kind": "request", "topic": "status", "from": "scout-1",
//!   "to": "healer-3", "correlation_id": "00deadbeef00cafe",
//!   "payload": {"hp": true}, "deadline_ms": 2000 }
//! ```
//!
//! The receiver routes on `kind` alone; the channel a message arrived on is
//! never needed to interpret it. Handler failures cross the wire as a
//! structured payload (`{"__error__": "handler", "message": ...}`) rather
//! than an exception replay, so callers can discriminate a remote failure
//! from a timeout.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Message kind, the sole routing discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    /// Fire-and-forget to every subscriber of the public family.
    Broadcast,
    /// Fire-and-forget to one identity.
    Cast,
    /// Expects a correlated [`Kind::Response`].
    Request,
    /// Reply to a [`Kind::Request`], carried on the reserved response topic.
    Response,
    /// Opens a contract auction on the public family.
    BidOpen,
    /// A sealed bid, sent directly to the auction opener.
    BidSubmit,
    /// Winner notification, sent directly to the winning bidder.
    BidAward,
    /// Fire-and-forget to the sender's current group.
    GroupMsg,
}

/// Failure to encode or decode an envelope.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// Serialization to JSON failed.
    #[error("envelope encode failed: {0}")]
    Encode(#[source] serde_json::Error),
    /// The inbound bytes are not a valid envelope.
    #[error("envelope decode failed: {0}")]
    Decode(#[source] serde_json::Error),
}

/// The wire-format record wrapping every message.
///
/// Fields absent on the wire decode to their defaults, so older peers that
/// omit `to` or `correlation_id` still parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Routing discriminant.
    pub kind: Kind,
    /// User-chosen symbol selecting a handler within the kind.
    pub topic: String,
    /// Sender identity.
    pub from: String,
    /// Recipient identity or group ID; empty for broadcasts.
    #[serde(default)]
    pub to: String,
    /// Token linking request/response and auction phases; empty otherwise.
    #[serde(default)]
    pub correlation_id: String,
    /// JSON-encoded user data.
    #[serde(default)]
    pub payload: Value,
    /// Auction deadline in milliseconds, set on `bid_open`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
}

impl Envelope {
    /// A public broadcast on `topic`.
    pub fn broadcast(from: &str, topic: &str, payload: Value) -> Self {
        Self {
            kind: Kind::Broadcast,
            topic: topic.to_string(),
            from: from.to_string(),
            to: String::new(),
            correlation_id: String::new(),
            payload,
            deadline_ms: None,
        }
    }

    /// A directed fire-and-forget message.
    pub fn cast(from: &str, to: &str, topic: &str, payload: Value) -> Self {
        Self {
            kind: Kind::Cast,
            topic: topic.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            correlation_id: String::new(),
            payload,
            deadline_ms: None,
        }
    }

    /// A correlated request.
    pub fn request(from: &str, to: &str, topic: &str, payload: Value, correlation_id: &str) -> Self {
        Self {
            kind: Kind::Request,
            topic: topic.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            correlation_id: correlation_id.to_string(),
            payload,
            deadline_ms: None,
        }
    }

    /// A reply to a request, carried on the reserved response topic.
    pub fn response(from: &str, to: &str, payload: Value, correlation_id: &str) -> Self {
        Self {
            kind: Kind::Response,
            topic: crate::channel::RESPONSE_TOPIC.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            correlation_id: correlation_id.to_string(),
            payload,
            deadline_ms: None,
        }
    }

    /// The opening phase of a contract auction.
    pub fn bid_open(from: &str, topic: &str, correlation_id: &str, deadline_ms: u64) -> Self {
        Self {
            kind: Kind::BidOpen,
            topic: topic.to_string(),
            from: from.to_string(),
            to: String::new(),
            correlation_id: correlation_id.to_string(),
            payload: Value::Null,
            deadline_ms: Some(deadline_ms),
        }
    }

    /// A sealed bid sent back to the auction opener.
    pub fn bid_submit(from: &str, to: &str, topic: &str, correlation_id: &str, bid: f64) -> Self {
        Self {
            kind: Kind::BidSubmit,
            topic: topic.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            correlation_id: correlation_id.to_string(),
            payload: json!({ "bid": bid }),
            deadline_ms: None,
        }
    }

    /// Winner notification for a contract.
    pub fn bid_award(from: &str, to: &str, topic: &str, correlation_id: &str) -> Self {
        Self {
            kind: Kind::BidAward,
            topic: topic.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            correlation_id: correlation_id.to_string(),
            payload: Value::Null,
            deadline_ms: None,
        }
    }

    /// A message to the sender's current group.
    pub fn group_msg(from: &str, group_id: &str, topic: &str, payload: Value) -> Self {
        Self {
            kind: Kind::GroupMsg,
            topic: topic.to_string(),
            from: from.to_string(),
            to: group_id.to_string(),
            correlation_id: String::new(),
            payload,
            deadline_ms: None,
        }
    }

    /// Encode to wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Encode`] if the payload cannot be serialized
    /// (only possible for payloads containing non-finite floats).
    pub fn encode(&self) -> Result<Bytes, WireError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(WireError::Encode)
    }

    /// Decode from wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Decode`] on malformed input. The dispatcher logs
    /// and drops such messages; decode failures are never surfaced to user
    /// code.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        serde_json::from_slice(buf).map_err(WireError::Decode)
    }

    /// The bid value carried by a `bid_submit` payload, if well-formed.
    pub fn bid_value(&self) -> Option<f64> {
        self.payload.get("bid").and_then(Value::as_f64)
    }
}

/// Build the structured payload representing a failed remote handler.
pub fn error_payload(message: &str) -> Value {
    json!({ "__error__": "handler", "message": message })
}

/// Extract the error message from a structured error payload, if present.
pub fn as_error(payload: &Value) -> Option<&str> {
    payload.get("__error__")?;
    Some(payload.get("message").and_then(Value::as_str).unwrap_or(""))
}

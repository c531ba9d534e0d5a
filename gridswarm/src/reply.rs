//! Per-request reply outcomes.
//!
//! Every request resolves to exactly one of: the remote payload, a remote
//! handler failure, the deadline elapsing, or local shutdown. Fan-out calls
//! report one [`Reply`] per target identity.

use serde_json::Value;

/// Errors on the receive side of a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplyError {
    /// The deadline elapsed before a reply arrived. Replies landing after
    /// the deadline are dropped, so this outcome is authoritative.
    #[error("deadline elapsed before a reply arrived")]
    Timeout,

    /// The remote handler ran and failed; the message crossed the wire as a
    /// structured error payload.
    #[error("remote handler failed: {message}")]
    Handler {
        /// Failure detail reported by the remote handler.
        message: String,
    },

    /// The local client shut down while the request was in flight.
    #[error("client shut down before a reply arrived")]
    Shutdown,
}

/// Outcome of one request against one identity.
pub type Reply = Result<Value, ReplyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_descriptive() {
        assert!(ReplyError::Timeout.to_string().contains("deadline"));
        let err = ReplyError::Handler {
            message: "target out of range".to_string(),
        };
        assert!(err.to_string().contains("target out of range"));
    }
}

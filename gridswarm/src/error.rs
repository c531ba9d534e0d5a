//! Error types for fabric operations.

use gridswarm_core::{BusError, WireError};

use crate::reply::ReplyError;

/// Errors raised on the send side of fabric operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The underlying bus failed; see [`BusError::is_retryable`].
    #[error("transport failure: {0}")]
    Transport(#[from] BusError),

    /// An envelope or registry value could not be encoded or decoded.
    #[error("codec failure: {0}")]
    Codec(#[from] WireError),

    /// The configured identity is empty or collides with the channel
    /// grammar (`pub`, `grp`, or anything containing `.`).
    #[error("invalid identity: {message}")]
    InvalidIdentity {
        /// What made the identity unusable.
        message: String,
    },

    /// `group_broadcast` was called without an active group.
    #[error("not in a group")]
    NotInGroup,

    /// The client has been shut down and accepts no further operations.
    #[error("client is shut down")]
    Shutdown,
}

/// Unified error for request/response calls.
///
/// A request can fail while being sent ([`ClientError`]) or while waiting
/// for the reply ([`ReplyError`]); this wraps both so `request` has a single
/// error type, in the same way the reply side of a fan-out [`map`] call is
/// reported per identity.
///
/// [`map`]: crate::SwarmClient::map
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The request could not be published.
    #[error("request send failed: {0}")]
    Send(#[from] ClientError),

    /// The request was published but did not complete with a payload.
    #[error("request reply failed: {0}")]
    Reply(#[from] ReplyError),
}

impl RequestError {
    /// Whether this failure is the deadline elapsing.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RequestError::Reply(ReplyError::Timeout))
    }
}

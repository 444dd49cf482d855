//! Error types for remauth.

use remauth_proto::ProtoError;
use thiserror::Error;

/// Errors that can occur during a remote auth session.
///
/// Cloneable so a single failure can be delivered to every caller waiting on
/// the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Transport-level I/O failure.
    #[error("network failure: {0}")]
    NetworkFailure(String),

    /// The gateway sent a frame that is unknown, malformed, or out of order.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The gateway rejected the key handshake.
    #[error("gateway rejected the handshake")]
    HandshakeFailure,

    /// The login request timed out before it was approved.
    #[error("login request expired")]
    Expired,

    /// A payload could not be decrypted with the session key.
    #[error("decryption failed: {0}")]
    DecryptionFailure(String),

    /// Key generation or encoding failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// The session was disconnected before the awaited result was available.
    #[error("session closed")]
    SessionClosed,

    /// The session was replaced by a reconnect before the awaited result was
    /// available.
    #[error("session reset by reconnect")]
    SessionReset,

    /// `connect` has not been called.
    #[error("not connected to the remote auth gateway")]
    NotConnected,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl AuthError {
    /// Whether the session controller absorbs this error and retries.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::NetworkFailure(_) | Self::Expired)
    }
}

impl From<ProtoError> for AuthError {
    fn from(err: ProtoError) -> Self {
        Self::ProtocolViolation(err.to_string())
    }
}

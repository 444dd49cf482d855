//! Close codes and their classification.

use std::fmt;

/// The remote device approved or denied the request and the flow concluded.
pub const CLOSE_FINISHED: u16 = 1000;

/// The gateway rejected the key handshake.
pub const CLOSE_HANDSHAKE_FAILED: u16 = 4001;

/// The login request timed out and the QR code expired.
pub const CLOSE_TIMED_OUT: u16 = 4003;

/// Code sent by the client when it abandons a connection it considers dead.
pub const CLOSE_CLIENT_RESTART: u16 = 4000;

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// Synthetic code for a connection ended locally (idle timeout exceeded).
    Local,
    /// Code supplied by the peer or the transport.
    Peer(u16),
}

impl CloseCode {
    /// Classify this code into the action the session should take.
    #[must_use]
    pub const fn classify(self) -> CloseClass {
        match self {
            Self::Peer(CLOSE_FINISHED) => CloseClass::Finished,
            Self::Peer(CLOSE_HANDSHAKE_FAILED) => CloseClass::HandshakeFailure,
            Self::Peer(CLOSE_TIMED_OUT) => CloseClass::Expired,
            Self::Peer(_) | Self::Local => CloseClass::Unexpected,
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Peer(code) => write!(f, "{code}"),
        }
    }
}

/// What a close means for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseClass {
    /// Flow concluded; stop polling.
    Finished,
    /// Fatal; do not retry.
    HandshakeFailure,
    /// QR expired; reconnect at once with fresh keys.
    Expired,
    /// Anything else; reconnect after backoff.
    Unexpected,
}

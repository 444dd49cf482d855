//! Session event types.

use std::time::Duration;

use remauth_proto::{CloseCode, RemoteUser};

use crate::error::AuthError;

use super::protocol::{AuthStatus, QrLogin};

/// Events emitted by the session controller.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Opening a connection. `attempt` is zero for the first try after a
    /// `hello` or a fresh `connect`.
    Connecting {
        /// Consecutive failed attempts so far.
        attempt: u32,
    },
    /// A login URL is available.
    Ready(QrLogin),
    /// A remote device scanned the code.
    Scanned(RemoteUser),
    /// The flow concluded.
    Finished(AuthStatus),
    /// The gateway closed the session normally before the flow concluded.
    Closed,
    /// The connection closed.
    Disconnected {
        /// Peer or local close code.
        code: CloseCode,
    },
    /// Waiting before the next attempt.
    Reconnecting {
        /// Attempt number.
        attempt: u32,
        /// Delay before next attempt.
        delay: Duration,
    },
    /// The session failed permanently.
    Failed(AuthError),
}

impl SessionEvent {
    /// Whether no further events follow for this `connect` call.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished(_) | Self::Closed | Self::Failed(_))
    }
}

//! Connection state of a session.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Where the session controller is in its connect/reconnect cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// No session running.
    Disconnected = 0,
    /// Opening the socket and running the key handshake.
    Connecting = 1,
    /// `hello` received; waiting on the remote device.
    Connected = 2,
    /// Connection lost, waiting to retry.
    Reconnecting = 3,
    /// The login flow concluded (approved or denied).
    Finished = 4,
    /// Fatal error or retries exhausted.
    Failed = 5,
}

impl ConnectionState {
    const ALL: [Self; 6] = [
        Self::Disconnected,
        Self::Connecting,
        Self::Connected,
        Self::Reconnecting,
        Self::Finished,
        Self::Failed,
    ];

    /// Whether the session has ended on its own (not by `disconnect`).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// Whether a runner task is expected to be alive.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Reconnecting)
    }

    fn from_repr(raw: u8) -> Self {
        Self::ALL
            .get(usize::from(raw))
            .copied()
            .unwrap_or(Self::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Finished => "finished",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Lock-free cell shared between the client handle and its runner task.
#[derive(Debug)]
pub struct AtomicConnectionState(AtomicU8);

impl AtomicConnectionState {
    /// Create a cell holding `state`.
    #[must_use]
    pub const fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    /// Load the current state.
    #[must_use]
    pub fn load(&self) -> ConnectionState {
        ConnectionState::from_repr(self.0.load(Ordering::SeqCst))
    }

    /// Store a new state.
    pub fn store(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repr_roundtrip() {
        for state in ConnectionState::ALL {
            assert_eq!(ConnectionState::from_repr(state as u8), state);
        }
        assert_eq!(ConnectionState::from_repr(200), ConnectionState::Failed);
    }

    #[test]
    fn test_atomic_state_store_load() {
        let state = AtomicConnectionState::new(ConnectionState::Disconnected);
        assert_eq!(state.load(), ConnectionState::Disconnected);

        state.store(ConnectionState::Connected);
        assert_eq!(state.load(), ConnectionState::Connected);

        state.store(ConnectionState::Finished);
        assert_eq!(state.load(), ConnectionState::Finished);
    }

    #[test]
    fn test_terminal_and_active() {
        assert!(ConnectionState::Finished.is_terminal());
        assert!(ConnectionState::Failed.is_terminal());
        assert!(!ConnectionState::Disconnected.is_terminal());

        assert!(ConnectionState::Reconnecting.is_active());
        assert!(!ConnectionState::Disconnected.is_active());
        assert!(!ConnectionState::Finished.is_active());
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(ConnectionState::Failed.to_string(), "failed");
    }
}

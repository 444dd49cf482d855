//! Remote auth gateway client.
//!
//! Manages the socket session to the gateway: the key handshake, the
//! login-URL lifecycle, heartbeats, and reconnection with exponential backoff.

mod events;
mod heartbeat;
mod protocol;
mod reconnect;
mod session;
mod state;
mod transport;
mod waiter;

pub use events::SessionEvent;
pub use heartbeat::{HeartbeatConfig, HeartbeatMonitor, LatencyView, LATENCY_WINDOW};
pub use protocol::{AuthStatus, Completion, ProtocolMachine, ProtocolState, QrLogin, Transition};
pub use reconnect::{wait_or_cancel, Backoff, ReconnectConfig};
pub use session::{LoginHook, RemoteAuthClient};
pub use state::{AtomicConnectionState, ConnectionState};
pub use transport::{GatewayTransport, Received};
pub use waiter::{SessionSignals, WaitHandle, Waiter};

//! Remote auth protocol state machine.
//!
//! One [`ProtocolMachine`] exists per connection attempt. It is driven by a
//! single task: every frame read from the transport goes through
//! [`ProtocolMachine::handle`], which advances the state, writes replies into
//! the outbound channel, and resolves the attempt's waiters.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use remauth_proto::{ClientFrame, RemoteUser, ServerFrame};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::crypto::{compute_nonce_proof, HandshakeKeys};
use crate::error::AuthError;

use super::heartbeat::{HeartbeatConfig, HeartbeatMonitor, LatencyView};
use super::waiter::SessionSignals;

/// How the flow concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    /// The remote device approved; a token was recovered.
    Success,
    /// The remote device (or the gateway) cancelled the request.
    Cancelled,
}

impl fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Final result of an attempt.
#[derive(Clone, PartialEq, Eq)]
pub struct Completion {
    /// Success or cancellation.
    pub status: AuthStatus,
    /// Recovered token; only present on success.
    pub token: Option<String>,
}

impl Completion {
    fn success(token: String) -> Self {
        Self {
            status: AuthStatus::Success,
            token: Some(token),
        }
    }

    const fn cancelled() -> Self {
        Self {
            status: AuthStatus::Cancelled,
            token: None,
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("status", &self.status)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A login URL and the instant it stops being valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrLogin {
    /// URL to encode in the QR code.
    pub url: String,
    /// Gateway-issued identifier embedded in the URL.
    pub fingerprint: String,
    /// Absolute expiry derived from the `hello` timeout.
    pub expires_at: DateTime<Utc>,
}

impl QrLogin {
    /// Validity left, zero once expired.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }

    /// Whether the expiry has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

impl fmt::Display for QrLogin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Position in the login flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    /// Connected, waiting for `hello`.
    AwaitHello,
    /// `init` sent, waiting for the encrypted nonce.
    AwaitNonce,
    /// Proof sent, waiting for the fingerprint.
    AwaitQr,
    /// URL published, waiting for a device to scan it.
    AwaitScan,
    /// Scanned, waiting for approval or denial.
    AwaitResult,
    /// `finish` or `cancel` received.
    Terminal,
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitHello => "await_hello",
            Self::AwaitNonce => "await_nonce",
            Self::AwaitQr => "await_qr",
            Self::AwaitScan => "await_scan",
            Self::AwaitResult => "await_result",
            Self::Terminal => "terminal",
        };
        f.write_str(name)
    }
}

/// What a handled frame changed, for the controller to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Nothing the controller needs to see.
    Continue,
    /// `hello` processed; the connection is healthy.
    Hello,
    /// The login URL is available.
    Ready(QrLogin),
    /// A device scanned the code.
    Scanned(RemoteUser),
    /// The flow concluded.
    Finished(Completion),
}

/// Per-attempt protocol driver.
#[derive(Debug)]
pub struct ProtocolMachine {
    state: ProtocolState,
    keys: HandshakeKeys,
    qr_base_url: String,
    heartbeat_grace: Duration,
    outbound: mpsc::Sender<ClientFrame>,
    stale: CancellationToken,
    signals: Arc<SessionSignals>,
    heartbeat: Option<HeartbeatMonitor>,
    expires_at: Option<DateTime<Utc>>,
}

impl ProtocolMachine {
    /// Create a machine for a fresh attempt.
    ///
    /// Replies and heartbeats are pushed into `outbound`; `stale` is
    /// cancelled if the heartbeat monitor decides the gateway is gone.
    #[must_use]
    pub fn new(
        keys: HandshakeKeys,
        qr_base_url: impl Into<String>,
        heartbeat_grace: Duration,
        outbound: mpsc::Sender<ClientFrame>,
        stale: CancellationToken,
        signals: Arc<SessionSignals>,
    ) -> Self {
        Self {
            state: ProtocolState::AwaitHello,
            keys,
            qr_base_url: qr_base_url.into(),
            heartbeat_grace,
            outbound,
            stale,
            signals,
            heartbeat: None,
            expires_at: None,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ProtocolState {
        self.state
    }

    /// The attempt's keypair.
    #[must_use]
    pub const fn keys(&self) -> &HandshakeKeys {
        &self.keys
    }

    /// Heartbeat interval announced by `hello`.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat.as_ref().map(|hb| hb.config().interval)
    }

    /// Absolute login expiry announced by `hello`.
    #[must_use]
    pub const fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Latency samples of this attempt's heartbeat monitor.
    #[must_use]
    pub fn latency_view(&self) -> Option<LatencyView> {
        self.heartbeat.as_ref().map(HeartbeatMonitor::latency_view)
    }

    /// Apply one inbound frame.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ProtocolViolation`] for a frame that does not fit
    /// the current state or carries a malformed field,
    /// [`AuthError::DecryptionFailure`] when a payload does not decrypt, and
    /// [`AuthError::NetworkFailure`] when a reply cannot be queued.
    pub async fn handle(&mut self, frame: ServerFrame) -> Result<Transition, AuthError> {
        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.tick();
        }
        debug!(op = frame.op(), state = %self.state, "handling frame");

        match (self.state, frame) {
            (_, ServerFrame::HeartbeatAck) => {
                if let Some(heartbeat) = &self.heartbeat {
                    heartbeat.ack();
                }
                Ok(Transition::Continue)
            }
            (state, ServerFrame::Cancel) if state != ProtocolState::Terminal => {
                Ok(self.on_cancel())
            }
            (
                ProtocolState::AwaitHello,
                ServerFrame::Hello {
                    heartbeat_interval,
                    timeout_ms,
                },
            ) => self.on_hello(heartbeat_interval, timeout_ms).await,
            (ProtocolState::AwaitNonce, ServerFrame::NonceProof { encrypted_nonce }) => {
                self.on_nonce_proof(&encrypted_nonce).await
            }
            (ProtocolState::AwaitQr, ServerFrame::PendingRemoteInit { fingerprint }) => {
                self.on_pending_remote_init(fingerprint)
            }
            (ProtocolState::AwaitScan, ServerFrame::PendingFinish { encrypted_user_payload }) => {
                self.on_pending_finish(&encrypted_user_payload)
            }
            (ProtocolState::AwaitResult, ServerFrame::Finish { encrypted_token }) => {
                self.on_finish(&encrypted_token)
            }
            (state, frame) => Err(AuthError::ProtocolViolation(format!(
                "unexpected op {} in state {state}",
                frame.op()
            ))),
        }
    }

    async fn on_hello(
        &mut self,
        heartbeat_interval: u64,
        timeout_ms: u64,
    ) -> Result<Transition, AuthError> {
        let config = HeartbeatConfig::from_hello(heartbeat_interval, self.heartbeat_grace);
        let timeout = i64::try_from(timeout_ms)
            .ok()
            .and_then(TimeDelta::try_milliseconds)
            .ok_or_else(|| {
                AuthError::ProtocolViolation(format!("timeout_ms out of range: {timeout_ms}"))
            })?;
        if config.interval.is_zero() {
            return Err(AuthError::ProtocolViolation(
                "heartbeat_interval must be positive".to_string(),
            ));
        }

        self.expires_at = Some(Utc::now() + timeout);

        let mut monitor = HeartbeatMonitor::new(config, self.stale.clone());
        self.send(ClientFrame::Heartbeat).await?;
        monitor.mark_sent();
        monitor.start(self.outbound.clone());
        self.heartbeat = Some(monitor);

        let encoded_public_key = self.keys.export_public_key()?;
        self.send(ClientFrame::init(encoded_public_key)).await?;
        info!(
            heartbeat_interval_ms = heartbeat_interval,
            timeout_ms, "sent init"
        );

        self.state = ProtocolState::AwaitNonce;
        Ok(Transition::Hello)
    }

    async fn on_nonce_proof(&mut self, encrypted_nonce: &str) -> Result<Transition, AuthError> {
        let nonce = self.keys.decrypt(encrypted_nonce)?;
        let proof = compute_nonce_proof(&nonce);
        self.send(ClientFrame::nonce_proof(proof)).await?;
        info!("sent nonce proof");

        self.state = ProtocolState::AwaitQr;
        Ok(Transition::Continue)
    }

    fn on_pending_remote_init(&mut self, fingerprint: String) -> Result<Transition, AuthError> {
        if fingerprint.is_empty() {
            return Err(AuthError::ProtocolViolation("empty fingerprint".to_string()));
        }
        let expires_at = self.expires_at.ok_or_else(|| {
            AuthError::ProtocolViolation("fingerprint received before hello".to_string())
        })?;

        let login = QrLogin {
            url: format!("{}{fingerprint}", self.qr_base_url),
            fingerprint,
            expires_at,
        };
        info!(remaining_secs = login.remaining().as_secs(), "login url ready");
        self.signals.ready.set(login.clone());

        self.state = ProtocolState::AwaitScan;
        Ok(Transition::Ready(login))
    }

    fn on_pending_finish(&mut self, encrypted_user_payload: &str) -> Result<Transition, AuthError> {
        let payload = self.keys.decrypt_text(encrypted_user_payload)?;
        let user = RemoteUser::from_payload(&payload)?;
        info!(user = %user.tag(), "login url scanned");
        self.signals.scanned.set(user.clone());

        self.state = ProtocolState::AwaitResult;
        Ok(Transition::Scanned(user))
    }

    fn on_finish(&mut self, encrypted_token: &str) -> Result<Transition, AuthError> {
        let token = self.keys.decrypt_text(encrypted_token)?;
        info!("remote login approved");
        Ok(self.conclude(Completion::success(token)))
    }

    fn on_cancel(&mut self) -> Transition {
        info!(state = %self.state, "remote login cancelled");
        self.conclude(Completion::cancelled())
    }

    fn conclude(&mut self, completion: Completion) -> Transition {
        self.signals.finished.set(completion.clone());
        self.state = ProtocolState::Terminal;
        Transition::Finished(completion)
    }

    async fn send(&self, frame: ClientFrame) -> Result<(), AuthError> {
        let op = frame.op();
        self.outbound
            .send(frame)
            .await
            .map_err(|_| AuthError::NetworkFailure(format!("outbound channel closed before {op}")))
    }

    /// Stop the heartbeat monitor and wait for it to exit.
    pub async fn shutdown(&mut self) {
        if let Some(heartbeat) = self.heartbeat.as_mut() {
            heartbeat.shutdown().await;
        }
    }
}

//! Session controller: connect, drive the protocol, reconnect.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use remauth_proto::close::{CLOSE_CLIENT_RESTART, CLOSE_FINISHED};
use remauth_proto::{ClientFrame, CloseClass, CloseCode, RemoteUser};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::crypto::HandshakeKeys;
use crate::error::AuthError;

use super::events::SessionEvent;
use super::heartbeat::LatencyView;
use super::protocol::{AuthStatus, Completion, ProtocolMachine, QrLogin, Transition};
use super::reconnect::{wait_or_cancel, Backoff, ReconnectConfig};
use super::state::{AtomicConnectionState, ConnectionState};
use super::transport::{GatewayTransport, Received};
use super::waiter::{SessionSignals, WaitHandle};

const OUTBOUND_CAPACITY: usize = 32;
const EVENT_CAPACITY: usize = 64;

/// Continuation invoked with the recovered token after a successful login.
pub trait LoginHook: Send + Sync + 'static {
    /// Establish an authenticated session with `token`.
    fn on_token(&self, token: String) -> BoxFuture<'static, ()>;
}

impl<F, Fut> LoginHook for F
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn on_token(&self, token: String) -> BoxFuture<'static, ()> {
        Box::pin(self(token))
    }
}

/// State shared between the client handle and its runner task.
struct Shared {
    state: AtomicConnectionState,
    started: AtomicBool,
    signals: RwLock<Arc<SessionSignals>>,
    latency: Mutex<Option<LatencyView>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Shared {
    fn current_signals(&self) -> Arc<SessionSignals> {
        Arc::clone(&*self.signals.read())
    }

    /// Swap in fresh signals, then release anyone parked on the old ones so
    /// they re-acquire.
    fn renew_signals(&self) -> Arc<SessionSignals> {
        let fresh = Arc::new(SessionSignals::new());
        let old = std::mem::replace(&mut *self.signals.write(), Arc::clone(&fresh));
        old.fail_pending(&AuthError::SessionReset);
        fresh
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

struct Runner {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// Client for the remote auth gateway.
///
/// `connect` spawns a background task that owns the socket and the protocol
/// state; the accessors suspend on that task's signals.
pub struct RemoteAuthClient {
    config: ClientConfig,
    hook: Option<Arc<dyn LoginHook>>,
    shared: Arc<Shared>,
    runner: tokio::sync::Mutex<Option<Runner>>,
}

impl RemoteAuthClient {
    /// Create a client. Nothing connects until [`connect`](Self::connect).
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            hook: None,
            shared: Arc::new(Shared {
                state: AtomicConnectionState::new(ConnectionState::Disconnected),
                started: AtomicBool::new(false),
                signals: RwLock::new(Arc::new(SessionSignals::new())),
                latency: Mutex::new(None),
                events,
            }),
            runner: tokio::sync::Mutex::new(None),
        }
    }

    /// Invoke `hook` with the token when a login succeeds.
    #[must_use]
    pub fn with_login_hook(mut self, hook: impl LoginHook) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// The client's configuration.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Start a new session, replacing any previous one.
    ///
    /// With `reconnect` set, dropped connections and expired login URLs are
    /// retried transparently. Without it the first such close ends the
    /// session and fails the pending accessors with
    /// [`AuthError::Expired`] or [`AuthError::NetworkFailure`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the configuration is invalid.
    pub async fn connect(&self, reconnect: bool) -> Result<(), AuthError> {
        self.config.validate()?;
        let mut runner = self.runner.lock().await;
        Self::stop_runner(runner.take()).await;

        self.shared.renew_signals();
        *self.shared.latency.lock() = None;
        self.shared.state.store(ConnectionState::Connecting);
        self.shared.started.store(true, Ordering::SeqCst);

        let shutdown = CancellationToken::new();
        let session = Session {
            config: self.config.clone(),
            reconnect_config: self.config.reconnect_config(),
            hook: self.hook.clone(),
            shared: Arc::clone(&self.shared),
            reconnect,
            shutdown: shutdown.clone(),
        };
        let span = info_span!("remauth_session", session_id = %Uuid::new_v4());
        let task = tokio::spawn(session.run().instrument(span));
        *runner = Some(Runner { shutdown, task });
        Ok(())
    }

    /// Tear the session down: stop the heartbeat, close the socket, and fail
    /// any accessor still waiting with [`AuthError::SessionClosed`].
    ///
    /// Safe to call at any time, any number of times.
    pub async fn disconnect(&self) {
        let mut runner = self.runner.lock().await;
        Self::stop_runner(runner.take()).await;
        self.shared
            .current_signals()
            .fail_pending(&AuthError::SessionClosed);

        if !self.shared.state.load().is_terminal() {
            self.shared.state.store(ConnectionState::Disconnected);
        }
    }

    async fn stop_runner(runner: Option<Runner>) {
        if let Some(runner) = runner {
            runner.shutdown.cancel();
            if let Err(e) = runner.task.await {
                warn!(error = %e, "session task ended abnormally");
            }
        }
    }

    /// Wait for the login URL.
    ///
    /// After an expiry reconnect this yields the new URL; call it again to
    /// follow later refreshes.
    ///
    /// # Errors
    ///
    /// Fails if the session ends before a URL is available.
    pub async fn qr_login(&self) -> Result<QrLogin, AuthError> {
        self.await_signal(|signals| signals.ready.handle()).await
    }

    /// Wait for a remote device to scan the code.
    ///
    /// # Errors
    ///
    /// Fails if the session ends before a scan.
    pub async fn scanned_user(&self) -> Result<RemoteUser, AuthError> {
        self.await_signal(|signals| signals.scanned.handle()).await
    }

    /// Wait for the flow to conclude and return the token, `None` if the
    /// request was cancelled.
    ///
    /// # Errors
    ///
    /// Fails if the session ends without a result.
    pub async fn token(&self) -> Result<Option<String>, AuthError> {
        Ok(self.completion().await?.token)
    }

    /// Wait for the flow to conclude and return how it ended.
    ///
    /// # Errors
    ///
    /// Fails if the session ends without a result.
    pub async fn final_status(&self) -> Result<AuthStatus, AuthError> {
        Ok(self.completion().await?.status)
    }

    async fn completion(&self) -> Result<Completion, AuthError> {
        self.await_signal(|signals| signals.finished.handle()).await
    }

    async fn await_signal<T, F>(&self, pick: F) -> Result<T, AuthError>
    where
        T: Clone,
        F: Fn(&SessionSignals) -> WaitHandle<T>,
    {
        if !self.shared.started.load(Ordering::SeqCst) {
            return Err(AuthError::NotConnected);
        }
        loop {
            let signals = self.shared.current_signals();
            let mut handle = pick(signals.as_ref());
            match handle.wait().await {
                Err(AuthError::SessionReset) => continue,
                result => return result,
            }
        }
    }

    /// Final status if the flow has concluded.
    #[must_use]
    pub fn status(&self) -> Option<AuthStatus> {
        match self.shared.current_signals().finished.peek() {
            Some(Ok(completion)) => Some(completion.status),
            _ => None,
        }
    }

    /// The login URL while it is still usable.
    #[must_use]
    pub fn current_qr(&self) -> Option<QrLogin> {
        let signals = self.shared.current_signals();
        if signals.finished.is_set() {
            return None;
        }
        match signals.ready.peek() {
            Some(Ok(login)) if !login.is_expired() => Some(login),
            _ => None,
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state.load()
    }

    /// Whether a session is connecting, connected, or waiting to reconnect.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.connection_state().is_active()
    }

    /// Round trip of the most recent heartbeat.
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        self.shared.latency.lock().as_ref().and_then(LatencyView::latency)
    }

    /// Mean heartbeat round trip over the recent window.
    #[must_use]
    pub fn average_latency(&self) -> Option<Duration> {
        self.shared
            .latency
            .lock()
            .as_ref()
            .and_then(LatencyView::average_latency)
    }

    /// Subscribe to session events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }
}

impl Drop for RemoteAuthClient {
    fn drop(&mut self) {
        if let Some(runner) = self.runner.get_mut().take() {
            runner.shutdown.cancel();
        }
    }
}

impl std::fmt::Debug for RemoteAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteAuthClient")
            .field("gateway_url", &self.config.gateway_url)
            .field("state", &self.shared.state.load())
            .field("has_login_hook", &self.hook.is_some())
            .finish_non_exhaustive()
    }
}

/// How a single connection attempt ended.
#[derive(Debug)]
enum AttemptEnd {
    /// `disconnect` was called.
    Shutdown,
    /// The flow concluded.
    Finished,
    /// The gateway closed gracefully before the flow concluded.
    Closed,
    /// The login URL expired; retry at once with a new key.
    Expired,
    /// The connection was lost; retry after backoff.
    Lost(AuthError),
    /// Unrecoverable.
    Fatal(AuthError),
}

impl AttemptEnd {
    const fn close_code(&self) -> u16 {
        match self {
            Self::Lost(_) => CLOSE_CLIENT_RESTART,
            Self::Shutdown | Self::Finished | Self::Closed | Self::Expired | Self::Fatal(_) => {
                CLOSE_FINISHED
            }
        }
    }
}

enum LoopEvent {
    Shutdown,
    Stale,
    Outbound(ClientFrame),
    Received(Result<Received, AuthError>),
}

/// The runner task's view of one `connect` call.
struct Session {
    config: ClientConfig,
    reconnect_config: ReconnectConfig,
    hook: Option<Arc<dyn LoginHook>>,
    shared: Arc<Shared>,
    reconnect: bool,
    shutdown: CancellationToken,
}

impl Session {
    async fn run(self) {
        let mut backoff = Backoff::new();
        let mut signals = self.shared.current_signals();

        loop {
            self.shared.state.store(ConnectionState::Connecting);
            self.shared.emit(SessionEvent::Connecting {
                attempt: backoff.attempt(),
            });

            match self.attempt(&signals, &mut backoff).await {
                AttemptEnd::Shutdown => {
                    debug!("session shut down");
                    return;
                }
                AttemptEnd::Finished => {
                    signals.fail_pending(&AuthError::SessionClosed);
                    self.shared.state.store(ConnectionState::Finished);
                    return;
                }
                AttemptEnd::Closed => {
                    signals.fail_pending(&AuthError::SessionClosed);
                    self.shared.state.store(ConnectionState::Finished);
                    self.shared.emit(SessionEvent::Closed);
                    return;
                }
                AttemptEnd::Fatal(err) => {
                    self.fail(&err);
                    return;
                }
                AttemptEnd::Expired => {
                    if !self.reconnect {
                        self.fail(&AuthError::Expired);
                        return;
                    }
                    info!("login url expired, reconnecting with a fresh key");
                    signals = self.shared.renew_signals();
                }
                AttemptEnd::Lost(reason) => {
                    if !self.reconnect {
                        self.fail(&reason);
                        return;
                    }
                    let Some(delay) = backoff.next_delay(&self.reconnect_config) else {
                        self.fail(&AuthError::NetworkFailure(format!(
                            "giving up after {} attempts: {reason}",
                            backoff.attempt()
                        )));
                        return;
                    };

                    warn!(
                        attempt = backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "connection lost, reconnecting"
                    );
                    signals = self.shared.renew_signals();
                    self.shared.state.store(ConnectionState::Reconnecting);
                    self.shared.emit(SessionEvent::Reconnecting {
                        attempt: backoff.attempt(),
                        delay,
                    });

                    if !wait_or_cancel(delay, &self.shutdown).await {
                        debug!("reconnect wait interrupted");
                        return;
                    }
                }
            }
        }
    }

    fn fail(&self, err: &AuthError) {
        error!(error = %err, "remote auth session failed");
        self.shared.state.store(ConnectionState::Failed);
        self.shared.current_signals().fail_pending(err);
        self.shared.emit(SessionEvent::Failed(err.clone()));
    }

    async fn attempt(&self, signals: &Arc<SessionSignals>, backoff: &mut Backoff) -> AttemptEnd {
        let keys = tokio::select! {
            () = self.shutdown.cancelled() => return AttemptEnd::Shutdown,
            keys = tokio::task::spawn_blocking(HandshakeKeys::generate) => keys,
        };
        let keys = match keys {
            Ok(Ok(keys)) => keys,
            Ok(Err(e)) => return AttemptEnd::Fatal(e),
            Err(e) => {
                return AttemptEnd::Fatal(AuthError::Crypto(format!(
                    "key generation task failed: {e}"
                )));
            }
        };

        let connected = tokio::select! {
            () = self.shutdown.cancelled() => return AttemptEnd::Shutdown,
            result = GatewayTransport::connect(&self.config) => result,
        };
        let mut transport = match connected {
            Ok(transport) => transport,
            Err(e) if e.is_recoverable() => return AttemptEnd::Lost(e),
            Err(e) => return AttemptEnd::Fatal(e),
        };

        let (outbound_tx, mut outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let stale = CancellationToken::new();
        let mut machine = ProtocolMachine::new(
            keys,
            self.config.qr_base_url.clone(),
            self.config.heartbeat_grace(),
            outbound_tx,
            stale.clone(),
            Arc::clone(signals),
        );

        let end = self
            .drive(&mut transport, &mut machine, &mut outbound_rx, &stale, backoff)
            .await;

        machine.shutdown().await;
        transport.close(end.close_code()).await;
        end
    }

    async fn drive(
        &self,
        transport: &mut GatewayTransport,
        machine: &mut ProtocolMachine,
        outbound: &mut mpsc::Receiver<ClientFrame>,
        stale: &CancellationToken,
        backoff: &mut Backoff,
    ) -> AttemptEnd {
        let idle_timeout = self.config.idle_timeout();

        loop {
            let event = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => LoopEvent::Shutdown,
                () = stale.cancelled() => LoopEvent::Stale,
                Some(frame) = outbound.recv() => LoopEvent::Outbound(frame),
                received = transport.receive(idle_timeout) => LoopEvent::Received(received),
            };

            let frame = match event {
                LoopEvent::Shutdown => return AttemptEnd::Shutdown,
                LoopEvent::Stale => {
                    return AttemptEnd::Lost(AuthError::NetworkFailure(
                        "gateway stopped acknowledging heartbeats".to_string(),
                    ));
                }
                LoopEvent::Outbound(frame) => {
                    if let Err(e) = transport.send(&frame).await {
                        return AttemptEnd::Lost(e);
                    }
                    continue;
                }
                LoopEvent::Received(Ok(Received::Frame(frame))) => frame,
                LoopEvent::Received(Ok(Received::Closed(code))) => {
                    self.shared.emit(SessionEvent::Disconnected { code });
                    return Self::classify_close(code);
                }
                LoopEvent::Received(Err(e)) if e.is_recoverable() => return AttemptEnd::Lost(e),
                LoopEvent::Received(Err(e)) => return AttemptEnd::Fatal(e),
            };

            match machine.handle(frame).await {
                Ok(Transition::Continue) => {}
                Ok(Transition::Hello) => {
                    backoff.reset();
                    self.shared.state.store(ConnectionState::Connected);
                    *self.shared.latency.lock() = machine.latency_view();
                }
                Ok(Transition::Ready(login)) => self.shared.emit(SessionEvent::Ready(login)),
                Ok(Transition::Scanned(user)) => self.shared.emit(SessionEvent::Scanned(user)),
                Ok(Transition::Finished(completion)) => {
                    let status = completion.status;
                    if let (Some(hook), Some(token)) = (&self.hook, completion.token) {
                        debug!("invoking login hook");
                        hook.on_token(token).await;
                    }
                    self.shared.emit(SessionEvent::Finished(status));
                    return AttemptEnd::Finished;
                }
                Err(e) if e.is_recoverable() => return AttemptEnd::Lost(e),
                Err(e) => return AttemptEnd::Fatal(e),
            }
        }
    }

    fn classify_close(code: CloseCode) -> AttemptEnd {
        match code.classify() {
            CloseClass::Finished => {
                info!(%code, "gateway closed the session");
                AttemptEnd::Closed
            }
            CloseClass::HandshakeFailure => {
                error!(%code, "gateway rejected the handshake");
                AttemptEnd::Fatal(AuthError::HandshakeFailure)
            }
            CloseClass::Expired => {
                info!(%code, "login request timed out");
                AttemptEnd::Expired
            }
            CloseClass::Unexpected => {
                warn!(%code, "unexpected disconnect");
                AttemptEnd::Lost(AuthError::NetworkFailure(format!(
                    "connection closed with code {code}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_classify_close() {
        assert!(matches!(
            Session::classify_close(CloseCode::Peer(1000)),
            AttemptEnd::Closed
        ));
        assert!(matches!(
            Session::classify_close(CloseCode::Peer(4001)),
            AttemptEnd::Fatal(AuthError::HandshakeFailure)
        ));
        assert!(matches!(
            Session::classify_close(CloseCode::Peer(4003)),
            AttemptEnd::Expired
        ));
        assert!(matches!(
            Session::classify_close(CloseCode::Peer(1006)),
            AttemptEnd::Lost(AuthError::NetworkFailure(_))
        ));
        assert!(matches!(
            Session::classify_close(CloseCode::Local),
            AttemptEnd::Lost(AuthError::NetworkFailure(_))
        ));
    }

    #[test]
    fn test_close_code_for_attempt_end() {
        let lost = AttemptEnd::Lost(AuthError::NetworkFailure("idle".into()));
        assert_eq!(lost.close_code(), CLOSE_CLIENT_RESTART);
        assert_eq!(AttemptEnd::Finished.close_code(), CLOSE_FINISHED);
        assert_eq!(AttemptEnd::Closed.close_code(), CLOSE_FINISHED);
        assert_eq!(AttemptEnd::Shutdown.close_code(), CLOSE_FINISHED);
    }

    #[tokio::test]
    async fn test_accessors_before_connect() {
        let client = RemoteAuthClient::new(ClientConfig::default());

        assert_eq!(client.qr_login().await, Err(AuthError::NotConnected));
        assert_eq!(client.token().await, Err(AuthError::NotConnected));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert!(!client.is_running());
        assert!(client.status().is_none());
        assert!(client.current_qr().is_none());
        assert!(client.latency().is_none());
        assert!(client.average_latency().is_none());
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_config() {
        let client = RemoteAuthClient::new(ClientConfig::new("https://not-a-websocket.example"));
        assert!(matches!(
            client.connect(true).await,
            Err(AuthError::Config(_))
        ));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_without_connect_is_noop() {
        let client = RemoteAuthClient::new(ClientConfig::default());
        client.disconnect().await;
        client.disconnect().await;
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_closure_login_hook() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let hook = move |token: String| {
            let counter = Arc::clone(&counter);
            async move {
                assert_eq!(token, "TOKEN123");
                counter.fetch_add(1, Ordering::SeqCst);
            }
        };

        hook.on_token("TOKEN123".to_string()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let client = RemoteAuthClient::new(ClientConfig::default()).with_login_hook(hook);
        assert!(format!("{client:?}").contains("has_login_hook: true"));
    }
}

//! WebSocket transport to the remote auth gateway.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use remauth_proto::{ClientFrame, CloseCode, ServerFrame};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::HOST;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use crate::config::ClientConfig;
use crate::error::AuthError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code reported when the peer sent a close frame without a code.
const NO_STATUS_RECEIVED: u16 = 1005;

/// Close code reported when the stream ended without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

/// Outcome of a [`GatewayTransport::receive`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// A decoded gateway frame.
    Frame(ServerFrame),
    /// The connection ended, either by the peer or by the idle timeout.
    Closed(CloseCode),
}

/// One WebSocket connection to the gateway.
///
/// Owned by a single task; `send` and `receive` take `&mut self` so writes
/// can never interleave.
pub struct GatewayTransport {
    stream: WsStream,
    last_activity: Instant,
    closed: bool,
}

impl GatewayTransport {
    /// Open a connection using the endpoint, `Host` header, and extra headers
    /// from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NetworkFailure`] if the socket or upgrade fails or
    /// exceeds the connect timeout, and [`AuthError::Config`] if a header is
    /// invalid.
    pub async fn connect(config: &ClientConfig) -> Result<Self, AuthError> {
        let mut request = config
            .gateway_url
            .as_str()
            .into_client_request()
            .map_err(|e| AuthError::Config(format!("invalid gateway url: {e}")))?;

        let host = config.host_header()?;
        let headers = request.headers_mut();
        headers.insert(
            HOST,
            HeaderValue::from_str(&host)
                .map_err(|e| AuthError::Config(format!("invalid host header: {e}")))?,
        );
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| AuthError::Config(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| AuthError::Config(format!("invalid value for {name}: {e}")))?;
            headers.insert(name, value);
        }

        debug!(url = %config.gateway_url, host = %host, "connecting to remote auth gateway");

        let (stream, _response) =
            tokio::time::timeout(config.connect_timeout(), tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| AuthError::NetworkFailure("connect timed out".to_string()))?
                .map_err(|e| AuthError::NetworkFailure(format!("failed to connect: {e}")))?;

        Ok(Self {
            stream,
            last_activity: Instant::now(),
            closed: false,
        })
    }

    /// Serialize and write a frame.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NetworkFailure`] if the write fails or the
    /// connection is already closed.
    pub async fn send(&mut self, frame: &ClientFrame) -> Result<(), AuthError> {
        if self.closed {
            return Err(AuthError::NetworkFailure("connection closed".to_string()));
        }

        let json = frame.to_json()?;
        trace!(op = frame.op(), "sending frame");
        self.stream
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| AuthError::NetworkFailure(format!("failed to send {}: {e}", frame.op())))
    }

    /// Wait for the next frame.
    ///
    /// The idle deadline runs from the last inbound message, so dropping this
    /// future (for example in a `select!`) and calling again does not extend
    /// it. On expiry the result is [`CloseCode::Local`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ProtocolViolation`] for a text frame that does not
    /// decode, and [`AuthError::NetworkFailure`] for transport errors.
    pub async fn receive(&mut self, idle_timeout: Duration) -> Result<Received, AuthError> {
        if self.closed {
            return Ok(Received::Closed(CloseCode::Peer(ABNORMAL_CLOSURE)));
        }

        loop {
            let deadline = self.last_activity + idle_timeout;
            let Ok(next) = tokio::time::timeout_at(deadline, self.stream.next()).await else {
                debug!(idle_secs = idle_timeout.as_secs(), "no frame within idle timeout");
                return Ok(Received::Closed(CloseCode::Local));
            };

            let message = match next {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(AuthError::NetworkFailure(e.to_string())),
                None => {
                    self.closed = true;
                    return Ok(Received::Closed(CloseCode::Peer(ABNORMAL_CLOSURE)));
                }
            };
            self.last_activity = Instant::now();

            match message {
                Message::Text(text) => {
                    trace!(frame = %text.as_str(), "received frame");
                    return Ok(Received::Frame(ServerFrame::from_json(text.as_str())?));
                }
                Message::Close(frame) => {
                    let code = frame.map_or(NO_STATUS_RECEIVED, |f| u16::from(f.code));
                    return Ok(Received::Closed(CloseCode::Peer(code)));
                }
                Message::Binary(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    /// Send a close frame with `code` and release the socket. Repeated calls
    /// are no-ops.
    pub async fn close(&mut self, code: u16) {
        if self.closed {
            return;
        }
        self.closed = true;

        let frame = CloseFrame {
            code: WsCloseCode::from(code),
            reason: "".into(),
        };
        if let Err(e) = self.stream.close(Some(frame)).await {
            trace!(error = %e, "close handshake did not complete");
        }
    }

    /// Whether [`close`](Self::close) ran or the peer ended the stream.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }
}

impl std::fmt::Debug for GatewayTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayTransport")
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

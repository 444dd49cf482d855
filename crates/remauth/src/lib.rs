//! remauth - remote authentication gateway client
//!
//! Connects to a cross-device login gateway, performs the RSA key handshake,
//! exposes a short-lived login URL for a QR code, and resolves to a session
//! token once a remote device approves the request (or to a cancellation).
//!
//! ```no_run
//! use remauth::{ClientConfig, RemoteAuthClient};
//!
//! # async fn run() -> Result<(), remauth::AuthError> {
//! let client = RemoteAuthClient::new(ClientConfig::default());
//! client.connect(true).await?;
//!
//! let login = client.qr_login().await?;
//! println!("scan {login} within {:?}", login.remaining());
//!
//! let token = client.token().await?;
//! client.disconnect().await;
//! # let _ = token;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod crypto;
pub mod error;
pub mod gateway;

pub use config::ClientConfig;
pub use error::AuthError;
pub use gateway::{
    AuthStatus, ConnectionState, LoginHook, QrLogin, ReconnectConfig, RemoteAuthClient,
    SessionEvent,
};
pub use remauth_proto::RemoteUser;

//! # remauth-proto
//!
//! Wire definitions for the remote auth gateway: the JSON frames exchanged over
//! the socket, the close codes the gateway uses to end a session, and the
//! decoded identity of the user who scanned the QR code.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod close;
pub mod error;
pub mod frames;
pub mod user;

pub use close::{CloseClass, CloseCode};
pub use error::ProtoError;
pub use frames::{ClientFrame, ServerFrame};
pub use user::RemoteUser;

/// Version sent in the gateway URL's `v` query parameter.
pub const GATEWAY_VERSION: u32 = 1;

//! Gateway frame definitions.
//!
//! Every frame is a JSON object whose `op` field names the operation; the
//! remaining fields are the payload for that op.

use serde::{Deserialize, Serialize};

use crate::ProtoError;

/// Frames sent by the gateway to the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ServerFrame {
    /// First frame of every connection.
    Hello {
        /// Heartbeat interval in milliseconds.
        heartbeat_interval: u64,
        /// Lifetime of the login request in milliseconds.
        timeout_ms: u64,
    },
    /// Challenge encrypted with the client's public key.
    NonceProof {
        /// Base64 RSA-OAEP ciphertext of the nonce.
        encrypted_nonce: String,
    },
    /// The login request is ready to be scanned.
    PendingRemoteInit {
        /// Opaque identifier embedded in the QR login URL.
        fingerprint: String,
    },
    /// A device scanned the QR code and is awaiting confirmation.
    PendingFinish {
        /// Base64 RSA-OAEP ciphertext of `id:discriminator:avatar:username`.
        encrypted_user_payload: String,
    },
    /// The remote device approved the login.
    Finish {
        /// Base64 RSA-OAEP ciphertext of the session token.
        encrypted_token: String,
    },
    /// The remote device denied the login.
    Cancel,
    /// Acknowledges the last heartbeat.
    HeartbeatAck,
}

impl ServerFrame {
    /// Wire name of this frame's op.
    #[must_use]
    pub const fn op(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::NonceProof { .. } => "nonce_proof",
            Self::PendingRemoteInit { .. } => "pending_remote_init",
            Self::PendingFinish { .. } => "pending_finish",
            Self::Finish { .. } => "finish",
            Self::Cancel => "cancel",
            Self::HeartbeatAck => "heartbeat_ack",
        }
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtoError> {
        serde_json::to_string(self).map_err(|e| ProtoError::Encoding(e.to_string()))
    }

    /// Deserialize from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown ops or missing/mistyped payload fields.
    pub fn from_json(json: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(json).map_err(|e| ProtoError::Decoding(e.to_string()))
    }
}

/// Frames sent by the client to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Announces the client's public key.
    Init {
        /// SPKI public key body, without PEM armor or newlines.
        encoded_public_key: String,
    },
    /// Answer to the gateway's nonce challenge.
    NonceProof {
        /// URL-safe, unpadded base64 SHA-256 of the decrypted nonce.
        proof: String,
    },
    /// Keepalive.
    Heartbeat,
}

impl ClientFrame {
    /// Create an init frame.
    #[must_use]
    pub fn init(encoded_public_key: impl Into<String>) -> Self {
        Self::Init {
            encoded_public_key: encoded_public_key.into(),
        }
    }

    /// Create a nonce proof frame.
    #[must_use]
    pub fn nonce_proof(proof: impl Into<String>) -> Self {
        Self::NonceProof {
            proof: proof.into(),
        }
    }

    /// Wire name of this frame's op.
    #[must_use]
    pub const fn op(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::NonceProof { .. } => "nonce_proof",
            Self::Heartbeat => "heartbeat",
        }
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtoError> {
        serde_json::to_string(self).map_err(|e| ProtoError::Encoding(e.to_string()))
    }

    /// Deserialize from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn from_json(json: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(json).map_err(|e| ProtoError::Decoding(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hello() {
        let frame = ServerFrame::from_json(
            r#"{"op":"hello","heartbeat_interval":41250,"timeout_ms":120000}"#,
        )
        .expect("hello should parse");

        assert_eq!(
            frame,
            ServerFrame::Hello {
                heartbeat_interval: 41250,
                timeout_ms: 120_000,
            }
        );
        assert_eq!(frame.op(), "hello");
    }

    #[test]
    fn test_parse_op_only_frames() {
        let cancel = ServerFrame::from_json(r#"{"op":"cancel"}"#).expect("cancel");
        assert_eq!(cancel, ServerFrame::Cancel);

        let ack = ServerFrame::from_json(r#"{"op":"heartbeat_ack"}"#).expect("ack");
        assert_eq!(ack, ServerFrame::HeartbeatAck);
    }

    #[test]
    fn test_parse_ignores_extra_fields() {
        let frame =
            ServerFrame::from_json(r#"{"op":"pending_remote_init","fingerprint":"abc123","extra":1}"#)
                .expect("extra fields should be ignored");
        assert_eq!(
            frame,
            ServerFrame::PendingRemoteInit {
                fingerprint: "abc123".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_op_rejected() {
        let result = ServerFrame::from_json(r#"{"op":"dispatch","t":"READY"}"#);
        assert!(matches!(result, Err(ProtoError::Decoding(_))));
    }

    #[test]
    fn test_missing_field_rejected() {
        let result = ServerFrame::from_json(r#"{"op":"finish"}"#);
        assert!(matches!(result, Err(ProtoError::Decoding(_))));

        let result = ServerFrame::from_json(r#"{"op":"hello","heartbeat_interval":"soon"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_client_frames_wire_shape() {
        let json = ClientFrame::Heartbeat.to_json().expect("heartbeat");
        assert_eq!(json, r#"{"op":"heartbeat"}"#);

        let json = ClientFrame::init("MIIBIjAN").to_json().expect("init");
        assert_eq!(json, r#"{"op":"init","encoded_public_key":"MIIBIjAN"}"#);

        let json = ClientFrame::nonce_proof("q1w2e3").to_json().expect("proof");
        assert_eq!(json, r#"{"op":"nonce_proof","proof":"q1w2e3"}"#);
    }

    #[test]
    fn test_nonce_proof_op_is_shared() {
        let inbound = ServerFrame::NonceProof {
            encrypted_nonce: "AAAA".to_string(),
        };
        let outbound = ClientFrame::nonce_proof("BBBB");
        assert_eq!(inbound.op(), outbound.op());
    }
}

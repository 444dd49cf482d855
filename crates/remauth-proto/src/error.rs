//! Error types for the remauth-proto crate.

use thiserror::Error;

/// Errors that can occur while encoding or decoding gateway frames.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Failed to encode a frame.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Failed to decode a frame (unknown op or malformed field).
    #[error("decoding error: {0}")]
    Decoding(String),

    /// Missing required field.
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtoError::Decoding("unknown variant `bogus`".to_string());
        assert_eq!(err.to_string(), "decoding error: unknown variant `bogus`");

        let err = ProtoError::MissingField("username");
        assert_eq!(err.to_string(), "missing required field: username");
    }
}

//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering event encoding and decoding failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to encode an event for the wire.
    #[error("failed to encode event: {0}")]
    Encode(String),

    /// Failed to decode an event from the wire.
    #[error("failed to decode event: {0}")]
    Decode(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Decode(err.to_string())
        } else {
            ProtocolError::Encode(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_display() {
        let err = ProtocolError::Decode("unexpected end of input".to_string());
        assert_eq!(
            err.to_string(),
            "failed to decode event: unexpected end of input"
        );
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let protocol_err: ProtocolError = json_err.into();
        assert!(matches!(protocol_err, ProtocolError::Decode(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProtocolError>();
    }
}

//! Codec for encoding and decoding sockit envelopes.
//!
//! Envelopes travel as JSON text, one envelope per websocket frame, so no
//! length prefix is needed.

use bytes::Bytes;
use thiserror::Error;

use crate::message::Message;

/// Maximum encoded envelope size (64 KiB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Envelope exceeds maximum size.
    #[error("Message size {0} exceeds maximum {MAX_MESSAGE_SIZE}")]
    MessageTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Structurally valid JSON that is not a usable envelope.
    #[error("Invalid message: {0}")]
    Invalid(&'static str),
}

/// Encode an envelope to bytes.
///
/// # Errors
///
/// Returns an error if the envelope is too large or serialization fails.
pub fn encode(message: &Message) -> Result<Bytes, ProtocolError> {
    let payload = serde_json::to_vec(message)?;

    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(payload.len()));
    }

    Ok(Bytes::from(payload))
}

/// Decode an envelope from bytes.
///
/// # Errors
///
/// Returns an error if the data is too large, is not valid JSON, or has no action.
pub fn decode(data: &[u8]) -> Result<Message, ProtocolError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(data.len()));
    }

    let message: Message = serde_json::from_slice(data)?;
    if message.action.is_empty() {
        return Err(ProtocolError::Invalid("action cannot be empty"));
    }

    Ok(message)
}

/// Decode an envelope from a text frame.
///
/// # Errors
///
/// See [`decode`].
pub fn decode_str(text: &str) -> Result<Message, ProtocolError> {
    decode(text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_decode_roundtrip() {
        let message = Message::to_room("move", "lobby")
            .with_sender("alice")
            .with_body(json!({"x": 1, "y": [2, 3]}));

        let encoded = encode(&message).unwrap();
        let decoded = decode(&encoded).unwrap();
        assert_eq!(message, decoded);
    }

    #[test]
    fn test_decode_rejects_empty_action() {
        match decode_str(r#"{"action":"","target":"lobby"}"#) {
            Err(ProtocolError::Invalid(_)) => {}
            other => panic!("Expected Invalid error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        match decode(b"not json") {
            Err(ProtocolError::Json(_)) => {}
            other => panic!("Expected Json error, got {:?}", other),
        }

        // Missing required `target`.
        assert!(decode_str(r#"{"action":"x"}"#).is_err());
    }

    #[test]
    fn test_message_too_large() {
        let big = "a".repeat(MAX_MESSAGE_SIZE + 1);
        let message = Message::to_room("blob", "lobby").with_body(json!(big));

        match encode(&message) {
            Err(ProtocolError::MessageTooLarge(_)) => {}
            other => panic!("Expected MessageTooLarge error, got {:?}", other),
        }

        let raw = vec![b' '; MAX_MESSAGE_SIZE + 1];
        assert!(matches!(
            decode(&raw),
            Err(ProtocolError::MessageTooLarge(_))
        ));
    }
}

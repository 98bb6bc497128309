//! The message envelope exchanged between clients and rooms.
//!
//! An envelope is a flat JSON object. Field names and field order are part of
//! the wire contract and must not change:
//!
//! ```text
//! {"action":…,"message_body":…,"IsTargetClient":…,"target":…,"sender":…}
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::{self, ProtocolError};

/// The unit of routed communication.
///
/// `target` names either a room or a client; `is_target_client` says which.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Application-defined action name.
    pub action: String,

    /// Free-form body.
    #[serde(rename = "message_body", default)]
    pub body: Value,

    /// Whether `target` is a client slug rather than a room slug.
    #[serde(rename = "IsTargetClient", default)]
    pub is_target_client: bool,

    /// Room or client slug this message is addressed to.
    pub target: String,

    /// Slug of the client that produced this message.
    #[serde(default)]
    pub sender: String,
}

impl Message {
    /// Create a message addressed to a room.
    #[must_use]
    pub fn to_room(action: impl Into<String>, room: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            body: Value::Null,
            is_target_client: false,
            target: room.into(),
            sender: String::new(),
        }
    }

    /// Create a message addressed to a single client.
    #[must_use]
    pub fn to_client(action: impl Into<String>, client: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            body: Value::Null,
            is_target_client: true,
            target: client.into(),
            sender: String::new(),
        }
    }

    /// Set the sender slug.
    #[must_use]
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    /// Set the message body.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    /// Whether this message is addressed to a room.
    #[must_use]
    pub fn is_target_room(&self) -> bool {
        !self.is_target_client
    }

    /// Serialize to the wire form.
    ///
    /// # Errors
    ///
    /// Returns an error if the encoded envelope exceeds the size limit.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        codec::encode(self)
    }
}

//! Membership events.
//!
//! Every join and leave produces a [`MembershipEvent`]. The event goes to the
//! affected room's event queue and to the mesh-wide feed returned by
//! [`Mesh::events`](crate::Mesh::events).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MembershipEventKind {
    /// A client was added to a room.
    ClientJoinedRoom,
    /// A client was removed from a room.
    ClientLeftRoom,
}

impl MembershipEventKind {
    /// Get the wire name of the event kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientJoinedRoom => "client-joined-room",
            Self::ClientLeftRoom => "client-left-room",
        }
    }
}

impl fmt::Display for MembershipEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A join/leave notification: `(kind, room, client)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MembershipEvent {
    /// What happened.
    pub kind: MembershipEventKind,
    /// Room slug.
    pub room: String,
    /// Client slug.
    pub client: String,
}

impl MembershipEvent {
    /// Create a `client-joined-room` event.
    #[must_use]
    pub fn joined(room: impl Into<String>, client: impl Into<String>) -> Self {
        Self {
            kind: MembershipEventKind::ClientJoinedRoom,
            room: room.into(),
            client: client.into(),
        }
    }

    /// Create a `client-left-room` event.
    #[must_use]
    pub fn left(room: impl Into<String>, client: impl Into<String>) -> Self {
        Self {
            kind: MembershipEventKind::ClientLeftRoom,
            room: room.into(),
            client: client.into(),
        }
    }

    /// Borrow the event as a `(kind, room, client)` tuple of strings.
    #[must_use]
    pub fn as_parts(&self) -> (&'static str, &str, &str) {
        (self.kind.as_str(), &self.room, &self.client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_parts() {
        let event = MembershipEvent::joined("lobby", "alice");
        assert_eq!(event.as_parts(), ("client-joined-room", "lobby", "alice"));

        let event = MembershipEvent::left("lobby", "alice");
        assert_eq!(event.kind.to_string(), "client-left-room");
    }

    #[test]
    fn test_event_serializes_with_wire_names() {
        let event = MembershipEvent::left("lobby", "bob");
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"kind":"client-left-room","room":"lobby","client":"bob"}"#
        );
    }
}

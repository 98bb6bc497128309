//! Rooms.
//!
//! A room is a named group of clients with its own inbound message queue,
//! membership-event queue and teardown signal. The mesh keeps the sending
//! half ([`RoomSlot`]); the room's behavior runner owns the receiving half
//! ([`Room`]).

use crate::client::Client;
use crate::event::MembershipEvent;
use parking_lot::RwLock;
use sockit_protocol::Message;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Maximum room slug length.
pub const MAX_SLUG_LENGTH: usize = 256;

/// Members of a room, keyed by client slug.
pub type Members = HashMap<String, Client>;

/// Validate a room slug.
///
/// # Errors
///
/// Returns an error message if the slug is invalid.
pub fn validate_slug(slug: &str) -> Result<(), &'static str> {
    if slug.is_empty() {
        return Err("Room slug cannot be empty");
    }
    if slug.len() > MAX_SLUG_LENGTH {
        return Err("Room slug too long");
    }
    if slug.chars().any(char::is_control) {
        return Err("Room slug contains control characters");
    }
    Ok(())
}

/// Outcome of a non-blocking push onto a bounded queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The item was queued.
    Accepted,
    /// The queue was full and the item was dropped.
    Full,
    /// The receiving side is gone and the item was dropped.
    Closed,
}

impl Delivery {
    /// Whether the item was queued.
    #[must_use]
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

pub(crate) fn try_push<T>(tx: &mpsc::Sender<T>, item: T) -> Delivery {
    match tx.try_send(item) {
        Ok(()) => Delivery::Accepted,
        Err(TrySendError::Full(_)) => Delivery::Full,
        Err(TrySendError::Closed(_)) => Delivery::Closed,
    }
}

/// Something a room's runner has to process.
#[derive(Debug, Clone)]
pub enum RoomInput {
    /// A message addressed to the room.
    Message(Arc<Message>),
    /// A membership change in the room.
    Event(MembershipEvent),
}

/// The runner-facing side of a room.
///
/// Handed to [`RoomBehavior::run`](crate::RoomBehavior::run) exactly once,
/// when the room is created.
#[derive(Debug)]
pub struct Room {
    id: u64,
    slug: String,
    created_by: String,
    members: Arc<RwLock<Members>>,
    messages: mpsc::Receiver<Arc<Message>>,
    events: mpsc::Receiver<MembershipEvent>,
    teardown: CancellationToken,
}

impl Room {
    /// Get the numeric room id (creation order).
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Get the room slug.
    #[must_use]
    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// Get the slug of the client that created the room.
    #[must_use]
    pub fn created_by(&self) -> &str {
        &self.created_by
    }

    /// Snapshot of the current members.
    #[must_use]
    pub fn members(&self) -> Members {
        self.members.read().clone()
    }

    /// Get the number of current members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.read().len()
    }

    /// Check if a client is currently a member.
    #[must_use]
    pub fn is_member(&self, client: &str) -> bool {
        self.members.read().contains_key(client)
    }

    /// Check whether teardown has been signalled.
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.teardown.is_cancelled()
    }

    /// Wait until the room is torn down.
    pub async fn torn_down(&self) {
        self.teardown.cancelled().await;
    }

    /// Receive the next membership event or message.
    ///
    /// Pending membership events are returned ahead of pending messages, so
    /// a member's join is seen before anything it sends. Queued items are
    /// drained before teardown is reported. Returns `None` once the room has
    /// been torn down and both queues are empty.
    pub async fn recv(&mut self) -> Option<RoomInput> {
        tokio::select! {
            biased;

            Some(event) = self.events.recv() => Some(RoomInput::Event(event)),
            Some(message) = self.messages.recv() => Some(RoomInput::Message(message)),
            () = self.teardown.cancelled() => None,
        }
    }

    /// Receive the next message addressed to this room.
    ///
    /// Returns `None` when the mesh has dropped the room.
    pub async fn recv_message(&mut self) -> Option<Arc<Message>> {
        self.messages.recv().await
    }

    /// Receive the next membership event for this room.
    ///
    /// Returns `None` when the mesh has dropped the room.
    pub async fn recv_event(&mut self) -> Option<MembershipEvent> {
        self.events.recv().await
    }
}

/// The mesh-side half of a room, stored in the registry.
#[derive(Debug)]
pub(crate) struct RoomSlot {
    pub(crate) id: u64,
    pub(crate) created_by: String,
    pub(crate) members: Arc<RwLock<Members>>,
    messages: mpsc::Sender<Arc<Message>>,
    events: mpsc::Sender<MembershipEvent>,
    teardown: CancellationToken,
}

impl RoomSlot {
    /// Create both halves of a room.
    pub(crate) fn new(
        id: u64,
        slug: &str,
        created_by: &str,
        capacity: usize,
        teardown: CancellationToken,
    ) -> (Self, Room) {
        let (message_tx, message_rx) = mpsc::channel(capacity);
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let members = Arc::new(RwLock::new(Members::new()));

        let slot = Self {
            id,
            created_by: created_by.to_string(),
            members: Arc::clone(&members),
            messages: message_tx,
            events: event_tx,
            teardown: teardown.clone(),
        };

        let room = Room {
            id,
            slug: slug.to_string(),
            created_by: created_by.to_string(),
            members,
            messages: message_rx,
            events: event_rx,
            teardown,
        };

        (slot, room)
    }

    pub(crate) fn deliver(&self, message: Arc<Message>) -> Delivery {
        try_push(&self.messages, message)
    }

    pub(crate) fn notify(&self, event: MembershipEvent) -> Delivery {
        try_push(&self.events, event)
    }

    pub(crate) fn member_count(&self) -> usize {
        self.members.read().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    /// Fire the teardown signal. Firing twice is harmless.
    pub(crate) fn teardown(&self, slug: &str) {
        if !self.teardown.is_cancelled() {
            debug!(room = %slug, id = self.id, "Room teardown signalled");
        }
        self.teardown.cancel();
    }
}

//! Per-room behavior.
//!
//! The mesh starts one [`RoomBehavior::run`] task per room, exactly once, as
//! soon as the room is registered. The task owns the room's queues and is
//! expected to return once the room is torn down.

use crate::mesh::Mesh;
use crate::room::{Delivery, Room, RoomInput};
use async_trait::async_trait;
use tracing::{debug, trace, warn};

/// Domain logic attached to every room.
#[async_trait]
pub trait RoomBehavior: Send + Sync + 'static {
    /// Drive a room until its teardown signal fires.
    async fn run(&self, room: Room, mesh: Mesh);
}

/// Fans every room message out to the room's current members.
///
/// The sender does not get its own message back. Members whose outbound sink
/// is full miss the message.
#[derive(Debug, Clone, Copy, Default)]
pub struct BroadcastBehavior;

#[async_trait]
impl RoomBehavior for BroadcastBehavior {
    async fn run(&self, mut room: Room, _mesh: Mesh) {
        debug!(room = %room.slug(), id = room.id(), "Broadcast behavior started");

        while let Some(input) = room.recv().await {
            match input {
                RoomInput::Message(message) => {
                    let mut recipients = 0usize;
                    for (slug, client) in room.members() {
                        if slug == message.sender {
                            continue;
                        }
                        match client.try_deliver(message.clone()) {
                            Delivery::Accepted => recipients += 1,
                            Delivery::Full => {
                                warn!(room = %room.slug(), client = %slug, "Client sink full, dropping message");
                            }
                            Delivery::Closed => {
                                trace!(room = %room.slug(), client = %slug, "Client gone, skipping");
                            }
                        }
                    }
                    trace!(
                        room = %room.slug(),
                        action = %message.action,
                        recipients,
                        "Broadcast message"
                    );
                }
                RoomInput::Event(event) => {
                    trace!(room = %room.slug(), client = %event.client, kind = %event.kind, "Membership event");
                }
            }
        }

        debug!(room = %room.slug(), "Broadcast behavior stopped");
    }
}

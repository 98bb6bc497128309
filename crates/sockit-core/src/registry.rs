//! The authoritative client/room/membership state.
//!
//! Only the mesh actor mutates a [`Registry`], one command at a time, while
//! holding the write lock. Each room's membership map is shared with its
//! [`Room`], so the index and the room's own view are the same storage.

use crate::client::{Client, ClientSink};
use crate::event::MembershipEvent;
use crate::mesh::{MeshError, RoomInfo, GLOBAL_ROOM, GLOBAL_ROOM_CREATOR};
use crate::room::{validate_slug, Delivery, Members, Room, RoomSlot};
use sockit_protocol::Message;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Side effects of one registry operation, applied by the actor after the
/// write lock is released.
#[derive(Debug, Default)]
pub(crate) struct Changes {
    /// Events for the mesh-wide feed.
    pub(crate) events: Vec<MembershipEvent>,
    /// Rooms whose runners must be started.
    pub(crate) created: Vec<Room>,
    /// Slugs of rooms torn down by the operation.
    pub(crate) deleted: Vec<String>,
    /// Per-room events dropped because the room's queue was full.
    pub(crate) dropped_events: u64,
}

#[derive(Debug)]
pub(crate) struct Registry {
    clients: HashMap<String, Client>,
    rooms: HashMap<String, RoomSlot>,
    next_room_id: u64,
    room_queue_capacity: usize,
    root: CancellationToken,
}

impl Registry {
    /// Create a registry holding only the global room.
    ///
    /// Room teardown signals are children of `root`, so cancelling it tears
    /// every room down.
    pub(crate) fn new(room_queue_capacity: usize, root: CancellationToken) -> (Self, Room) {
        let mut registry = Self {
            clients: HashMap::new(),
            rooms: HashMap::new(),
            next_room_id: 0,
            room_queue_capacity: room_queue_capacity.max(1),
            root,
        };
        let global = registry.insert_room(GLOBAL_ROOM, GLOBAL_ROOM_CREATOR);
        (registry, global)
    }

    fn insert_room(&mut self, slug: &str, created_by: &str) -> Room {
        let id = self.next_room_id;
        self.next_room_id += 1;

        let (slot, room) = RoomSlot::new(
            id,
            slug,
            created_by,
            self.room_queue_capacity,
            self.root.child_token(),
        );
        self.rooms.insert(slug.to_string(), slot);

        debug!(room = %slug, id, created_by = %created_by, "Room created");
        room
    }

    /// Admit a client and join it to the global room.
    ///
    /// Re-registering a slug replaces the stored handle everywhere it is held.
    pub(crate) fn register(&mut self, client: Client, changes: &mut Changes) {
        let slug = client.slug().to_string();

        if self.clients.insert(slug.clone(), client.clone()).is_some() {
            debug!(client = %slug, "Client re-registered, replacing handle");
            for slot in self.rooms.values() {
                if let Some(entry) = slot.members.write().get_mut(&slug) {
                    *entry = client.clone();
                }
            }
        }

        if let Err(e) = self.join(GLOBAL_ROOM, &slug, changes) {
            warn!(client = %slug, error = %e, "Failed to join client to the global room");
        }
    }

    /// Remove a client from every room, then from the registry.
    ///
    /// Returns `false` if the client was unknown.
    pub(crate) fn unregister(&mut self, slug: &str, changes: &mut Changes) -> bool {
        if !self.clients.contains_key(slug) {
            return false;
        }

        for room in self.client_rooms(slug) {
            self.remove_member(&room, slug, changes);
        }

        self.clients.remove(slug);
        debug!(client = %slug, "Client unregistered");
        true
    }

    /// Unregister a client only if its stored handle writes into `sink`.
    ///
    /// Returns `false` if the slug is unknown or now belongs to another sink.
    pub(crate) fn unregister_connection(
        &mut self,
        slug: &str,
        sink: &ClientSink,
        changes: &mut Changes,
    ) -> bool {
        let owned = self
            .clients
            .get(slug)
            .is_some_and(|client| client.uses_sink(sink));
        if !owned {
            debug!(client = %slug, "Slug taken over by a newer connection, keeping it");
            return false;
        }
        self.unregister(slug, changes)
    }

    /// Create a room unless it already exists.
    pub(crate) fn create_room(
        &mut self,
        slug: &str,
        created_by: &str,
        changes: &mut Changes,
    ) -> Result<RoomInfo, MeshError> {
        validate_slug(slug).map_err(MeshError::InvalidSlug)?;

        if let Some(existing) = self.room_info(slug) {
            return Ok(existing);
        }

        let room = self.insert_room(slug, created_by);
        let info = RoomInfo {
            id: room.id(),
            slug: slug.to_string(),
            created_by: created_by.to_string(),
            member_count: 0,
        };
        changes.created.push(room);
        Ok(info)
    }

    /// Tear a room down and forget it.
    ///
    /// Returns `Ok(false)` if the room did not exist.
    pub(crate) fn delete_room(&mut self, slug: &str, changes: &mut Changes) -> Result<bool, MeshError> {
        if slug == GLOBAL_ROOM {
            return Err(MeshError::ReservedRoom(slug.to_string()));
        }
        Ok(self.teardown_room(slug, changes))
    }

    fn teardown_room(&mut self, slug: &str, changes: &mut Changes) -> bool {
        match self.rooms.remove(slug) {
            Some(slot) => {
                slot.teardown(slug);
                changes.deleted.push(slug.to_string());
                true
            }
            None => false,
        }
    }

    /// Join a registered client to a room, creating the room if needed.
    ///
    /// Returns `Ok(false)` if the client was already a member.
    pub(crate) fn join(
        &mut self,
        room: &str,
        client: &str,
        changes: &mut Changes,
    ) -> Result<bool, MeshError> {
        validate_slug(room).map_err(MeshError::InvalidSlug)?;

        let handle = self
            .clients
            .get(client)
            .cloned()
            .ok_or_else(|| MeshError::UnknownClient(client.to_string()))?;

        if !self.rooms.contains_key(room) {
            let created = self.insert_room(room, client);
            changes.created.push(created);
        }

        let Some(slot) = self.rooms.get(room) else {
            return Ok(false);
        };

        if slot.members.read().contains_key(client) {
            return Ok(false);
        }
        slot.members.write().insert(client.to_string(), handle);

        debug!(
            room = %room,
            client = %client,
            members = slot.member_count(),
            "Client joined room"
        );

        emit(room, slot, MembershipEvent::joined(room, client), changes);
        Ok(true)
    }

    /// Remove a client from a room.
    ///
    /// Returns `Ok(false)` if the client was not a member. Registered clients
    /// stay in the global room until they unregister.
    pub(crate) fn leave(
        &mut self,
        room: &str,
        client: &str,
        changes: &mut Changes,
    ) -> Result<bool, MeshError> {
        if room == GLOBAL_ROOM {
            return Err(MeshError::ReservedRoom(room.to_string()));
        }
        Ok(self.remove_member(room, client, changes))
    }

    fn remove_member(&mut self, room: &str, client: &str, changes: &mut Changes) -> bool {
        let Some(slot) = self.rooms.get(room) else {
            return false;
        };

        if slot.members.write().remove(client).is_none() {
            return false;
        }

        debug!(
            room = %room,
            client = %client,
            members = slot.member_count(),
            "Client left room"
        );

        emit(room, slot, MembershipEvent::left(room, client), changes);

        if room != GLOBAL_ROOM && slot.is_empty() {
            self.teardown_room(room, changes);
        }

        true
    }

    /// Push a message onto its target room's queue.
    ///
    /// Returns `None` if no room matches the target.
    pub(crate) fn route(&self, message: Message) -> Option<Delivery> {
        self.rooms
            .get(&message.target)
            .map(|slot| slot.deliver(Arc::new(message)))
    }

    /// Tear every room down and forget all state.
    pub(crate) fn clear(&mut self) {
        for (slug, slot) in self.rooms.drain() {
            slot.teardown(&slug);
        }
        self.clients.clear();
    }

    pub(crate) fn clients(&self) -> HashMap<String, Client> {
        self.clients.clone()
    }

    pub(crate) fn client(&self, slug: &str) -> Option<Client> {
        self.clients.get(slug).cloned()
    }

    pub(crate) fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub(crate) fn room_slugs(&self) -> Vec<String> {
        self.rooms.keys().cloned().collect()
    }

    pub(crate) fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub(crate) fn has_room(&self, slug: &str) -> bool {
        self.rooms.contains_key(slug)
    }

    pub(crate) fn room_info(&self, slug: &str) -> Option<RoomInfo> {
        self.rooms.get(slug).map(|slot| RoomInfo {
            id: slot.id,
            slug: slug.to_string(),
            created_by: slot.created_by.clone(),
            member_count: slot.member_count(),
        })
    }

    pub(crate) fn room_members(&self, slug: &str) -> Option<Members> {
        self.rooms.get(slug).map(|slot| slot.members.read().clone())
    }

    pub(crate) fn memberships(&self) -> HashMap<String, Members> {
        self.rooms
            .iter()
            .map(|(slug, slot)| (slug.clone(), slot.members.read().clone()))
            .collect()
    }

    pub(crate) fn total_memberships(&self) -> usize {
        self.rooms.values().map(RoomSlot::member_count).sum()
    }

    pub(crate) fn client_rooms(&self, client: &str) -> Vec<String> {
        self.rooms
            .iter()
            .filter(|(_, slot)| slot.members.read().contains_key(client))
            .map(|(slug, _)| slug.clone())
            .collect()
    }
}

/// Queue an event for the room's runner and the mesh-wide feed.
fn emit(room: &str, slot: &RoomSlot, event: MembershipEvent, changes: &mut Changes) {
    match slot.notify(event.clone()) {
        Delivery::Accepted => {}
        Delivery::Full => {
            warn!(
                room = %room,
                client = %event.client,
                kind = %event.kind,
                "Room event queue full, dropping membership event"
            );
            changes.dropped_events += 1;
        }
        Delivery::Closed => {
            debug!(room = %room, kind = %event.kind, "Room runner gone, dropping membership event");
        }
    }
    changes.events.push(event);
}

//! The mesh coordinator.
//!
//! [`Mesh`] is a cheap, cloneable handle to a single coordinator task that
//! owns the client registry, the room registry and the membership index.
//! Every mutation (connect, disconnect, room create/delete, join, leave) is a
//! command processed one at a time by that task; message dispatch goes
//! through a separate bounded queue drained by the same task. Read accessors
//! take point-in-time snapshots under a shared lock and never wait on the
//! coordinator.

use crate::behavior::RoomBehavior;
use crate::client::{Client, ClientSink};
use crate::event::MembershipEvent;
use crate::registry::{Changes, Registry};
use crate::room::{Delivery, Members, Room};
use parking_lot::RwLock;
use serde::Serialize;
use sockit_protocol::Message;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

/// Slug of the room every connected client belongs to.
pub const GLOBAL_ROOM: &str = "mesh-global";

/// Recorded creator of the global room.
pub const GLOBAL_ROOM_CREATOR: &str = "Gawd";

/// Mesh errors.
#[derive(Debug, Error)]
pub enum MeshError {
    /// The coordinator has shut down.
    #[error("Mesh coordinator is not running")]
    Closed,

    /// The dispatch queue is full.
    #[error("Dispatch queue is full")]
    DispatchQueueFull,

    /// The client is not registered.
    #[error("Unknown client: {0}")]
    UnknownClient(String),

    /// The room cannot be deleted.
    #[error("Room is reserved: {0}")]
    ReservedRoom(String),

    /// Invalid room slug.
    #[error("Invalid room slug: {0}")]
    InvalidSlug(&'static str),
}

/// Mesh configuration.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// Bound of each room's inbound message queue and event queue.
    pub room_queue_capacity: usize,
    /// Bound of the coordinator's dispatch queue.
    pub dispatch_queue_capacity: usize,
    /// Bound of the coordinator's command queue.
    pub command_queue_capacity: usize,
    /// Buffer of the mesh-wide membership event feed.
    pub event_feed_capacity: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            room_queue_capacity: 1,
            dispatch_queue_capacity: 1,
            command_queue_capacity: 256,
            event_feed_capacity: 1024,
        }
    }
}

/// Public description of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomInfo {
    /// Creation-order id (the global room is 0).
    pub id: u64,
    /// Room slug.
    pub slug: String,
    /// Slug of the creating client.
    pub created_by: String,
    /// Current number of members.
    pub member_count: usize,
}

/// Mesh statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MeshStats {
    /// Number of registered clients.
    pub client_count: usize,
    /// Number of live rooms.
    pub room_count: usize,
    /// Sum of all room memberships.
    pub total_memberships: usize,
    /// Messages queued onto a room.
    pub messages_routed: u64,
    /// Messages dropped because the target room's queue was full or closed.
    pub messages_dropped: u64,
    /// Messages dropped because no room matched the target.
    pub messages_unroutable: u64,
    /// Membership events dropped because a room's event queue was full.
    pub events_dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    routed: AtomicU64,
    dropped: AtomicU64,
    unroutable: AtomicU64,
    events_dropped: AtomicU64,
}

struct Shared {
    name: String,
    config: MeshConfig,
    registry: RwLock<Registry>,
    feed: broadcast::Sender<MembershipEvent>,
    counters: Counters,
}

/// Commands processed by the coordinator task.
#[derive(Debug)]
enum Command {
    Register {
        client: Client,
        respond_to: oneshot::Sender<()>,
    },
    Unregister {
        slug: String,
        respond_to: oneshot::Sender<bool>,
    },
    UnregisterConnection {
        slug: String,
        sink: ClientSink,
        respond_to: oneshot::Sender<bool>,
    },
    CreateRoom {
        slug: String,
        created_by: String,
        respond_to: oneshot::Sender<Result<RoomInfo, MeshError>>,
    },
    DeleteRoom {
        slug: String,
        respond_to: oneshot::Sender<Result<bool, MeshError>>,
    },
    JoinRoom {
        room: String,
        client: String,
        respond_to: oneshot::Sender<Result<bool, MeshError>>,
    },
    LeaveRoom {
        room: String,
        client: String,
        respond_to: oneshot::Sender<Result<bool, MeshError>>,
    },
}

/// Handle to the mesh coordinator.
///
/// The coordinator and every room runner keep running until [`Mesh::shutdown`]
/// is called; dropping the handles does not stop them.
#[derive(Clone)]
pub struct Mesh {
    shared: Arc<Shared>,
    commands: mpsc::Sender<Command>,
    dispatch: mpsc::Sender<Message>,
    shutdown: CancellationToken,
}

impl fmt::Debug for Mesh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mesh")
            .field("name", &self.shared.name)
            .field("shut_down", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Mesh {
    /// Start a mesh with default configuration.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(name: impl Into<String>, behavior: Arc<dyn RoomBehavior>) -> Self {
        Self::with_config(name, MeshConfig::default(), behavior)
    }

    /// Start a mesh with custom configuration.
    ///
    /// Creates the global room, starts its behavior and spawns the
    /// coordinator task. Must be called from within a Tokio runtime.
    #[must_use]
    pub fn with_config(
        name: impl Into<String>,
        config: MeshConfig,
        behavior: Arc<dyn RoomBehavior>,
    ) -> Self {
        let name = name.into();
        info!(mesh = %name, "Creating mesh with config: {:?}", config);

        let shutdown = CancellationToken::new();
        let (registry, global) = Registry::new(config.room_queue_capacity, shutdown.clone());
        let (command_tx, command_rx) = mpsc::channel(config.command_queue_capacity.max(1));
        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.dispatch_queue_capacity.max(1));
        let (feed, _) = broadcast::channel(config.event_feed_capacity.max(1));

        let mesh = Self {
            shared: Arc::new(Shared {
                name,
                config,
                registry: RwLock::new(registry),
                feed,
                counters: Counters::default(),
            }),
            commands: command_tx,
            dispatch: dispatch_tx,
            shutdown,
        };

        let actor = MeshActor {
            mesh: mesh.clone(),
            behavior,
            commands: command_rx,
            dispatch: dispatch_rx,
        };
        actor.start_runner(global);
        tokio::spawn(actor.run());

        mesh
    }

    /// Get the application name the mesh was created with.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Get the mesh configuration.
    #[must_use]
    pub fn config(&self) -> &MeshConfig {
        &self.shared.config
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, MeshError> {
        if self.shutdown.is_cancelled() {
            return Err(MeshError::Closed);
        }

        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| MeshError::Closed)?;

        rx.await.map_err(|_| MeshError::Closed)
    }

    /// Admit a client and join it to the global room.
    ///
    /// Re-registering a slug replaces the previous handle.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Closed`] if the coordinator has shut down.
    pub async fn register_client(&self, client: Client) -> Result<(), MeshError> {
        self.request(|respond_to| Command::Register { client, respond_to })
            .await
    }

    /// Remove a client from every room and from the registry.
    ///
    /// Returns `false` if the client was unknown.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Closed`] if the coordinator has shut down.
    pub async fn unregister_client(&self, slug: &str) -> Result<bool, MeshError> {
        let slug = slug.to_string();
        self.request(|respond_to| Command::Unregister { slug, respond_to })
            .await
    }

    /// Unregister a client only if it is still bound to `sink`.
    ///
    /// Lets a closing connection clean up without evicting a newer connection
    /// that re-registered the same slug. Returns `false` if nothing was removed.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Closed`] if the coordinator has shut down.
    pub async fn unregister_connection(
        &self,
        slug: &str,
        sink: &ClientSink,
    ) -> Result<bool, MeshError> {
        let slug = slug.to_string();
        let sink = sink.clone();
        self.request(|respond_to| Command::UnregisterConnection {
            slug,
            sink,
            respond_to,
        })
        .await
    }

    /// Create a room, or return the existing one with that slug.
    ///
    /// The room's behavior is started only when the room is new.
    ///
    /// # Errors
    ///
    /// Returns an error if the slug is invalid or the coordinator has shut down.
    pub async fn create_room(&self, slug: &str, created_by: &str) -> Result<RoomInfo, MeshError> {
        let slug = slug.to_string();
        let created_by = created_by.to_string();
        self.request(|respond_to| Command::CreateRoom {
            slug,
            created_by,
            respond_to,
        })
        .await?
    }

    /// Tear a room down and remove it.
    ///
    /// Returns `false` if the room did not exist.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::ReservedRoom`] for the global room, or
    /// [`MeshError::Closed`] if the coordinator has shut down.
    pub async fn delete_room(&self, slug: &str) -> Result<bool, MeshError> {
        let slug = slug.to_string();
        self.request(|respond_to| Command::DeleteRoom { slug, respond_to })
            .await?
    }

    /// Join a registered client to a room, creating the room if needed.
    ///
    /// Returns `false` if the client was already a member.
    ///
    /// # Errors
    ///
    /// Returns an error if the client is not registered, the slug is invalid,
    /// or the coordinator has shut down.
    pub async fn join_room(&self, room: &str, client: &str) -> Result<bool, MeshError> {
        let room = room.to_string();
        let client = client.to_string();
        self.request(|respond_to| Command::JoinRoom {
            room,
            client,
            respond_to,
        })
        .await?
    }

    /// Remove a client from a room, deleting the room if it becomes empty.
    ///
    /// Returns `false` if the client was not a member.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::ReservedRoom`] for the global room, which a
    /// client only leaves by unregistering, or [`MeshError::Closed`] if the
    /// coordinator has shut down.
    pub async fn leave_room(&self, room: &str, client: &str) -> Result<bool, MeshError> {
        let room = room.to_string();
        let client = client.to_string();
        self.request(|respond_to| Command::LeaveRoom {
            room,
            client,
            respond_to,
        })
        .await?
    }

    /// Submit a message for routing, waiting for space on the dispatch queue.
    ///
    /// Succeeds even if the message is later dropped for an unknown target
    /// or a full room queue.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Closed`] if the coordinator has shut down.
    pub async fn submit(&self, message: Message) -> Result<(), MeshError> {
        if self.shutdown.is_cancelled() {
            return Err(MeshError::Closed);
        }
        self.dispatch
            .send(message)
            .await
            .map_err(|_| MeshError::Closed)
    }

    /// Submit a message for routing without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::DispatchQueueFull`] if the dispatch queue is full,
    /// or [`MeshError::Closed`] if the coordinator has shut down.
    pub fn try_submit(&self, message: Message) -> Result<(), MeshError> {
        if self.shutdown.is_cancelled() {
            return Err(MeshError::Closed);
        }
        self.dispatch.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => MeshError::DispatchQueueFull,
            TrySendError::Closed(_) => MeshError::Closed,
        })
    }

    /// Subscribe to the mesh-wide membership event feed.
    ///
    /// Observers that fall behind lose the oldest events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<MembershipEvent> {
        self.shared.feed.subscribe()
    }

    /// Snapshot of all registered clients.
    #[must_use]
    pub fn clients(&self) -> HashMap<String, Client> {
        self.shared.registry.read().clients()
    }

    /// Look up a registered client.
    #[must_use]
    pub fn client(&self, slug: &str) -> Option<Client> {
        self.shared.registry.read().client(slug)
    }

    /// Get the auth metadata of a registered client.
    #[must_use]
    pub fn client_auth_metadata(&self, slug: &str) -> Option<Vec<String>> {
        self.client(slug).map(|c| c.auth_metadata().to_vec())
    }

    /// Get all room slugs.
    #[must_use]
    pub fn rooms(&self) -> Vec<String> {
        self.shared.registry.read().room_slugs()
    }

    /// Check if a room exists.
    #[must_use]
    pub fn room_exists(&self, slug: &str) -> bool {
        self.shared.registry.read().has_room(slug)
    }

    /// Describe a room.
    #[must_use]
    pub fn room_info(&self, slug: &str) -> Option<RoomInfo> {
        self.shared.registry.read().room_info(slug)
    }

    /// Snapshot of one room's members.
    #[must_use]
    pub fn room_members(&self, slug: &str) -> Option<Members> {
        self.shared.registry.read().room_members(slug)
    }

    /// Snapshot of the whole membership index.
    #[must_use]
    pub fn memberships(&self) -> HashMap<String, Members> {
        self.shared.registry.read().memberships()
    }

    /// Get the rooms a client belongs to.
    #[must_use]
    pub fn client_rooms(&self, slug: &str) -> Vec<String> {
        self.shared.registry.read().client_rooms(slug)
    }

    /// Get mesh statistics.
    #[must_use]
    pub fn stats(&self) -> MeshStats {
        let counters = &self.shared.counters;
        let registry = self.shared.registry.read();
        MeshStats {
            client_count: registry.client_count(),
            room_count: registry.room_count(),
            total_memberships: registry.total_memberships(),
            messages_routed: counters.routed.load(Ordering::Relaxed),
            messages_dropped: counters.dropped.load(Ordering::Relaxed),
            messages_unroutable: counters.unroutable.load(Ordering::Relaxed),
            events_dropped: counters.events_dropped.load(Ordering::Relaxed),
        }
    }

    /// Stop the coordinator and tear every room down.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Check whether the coordinator has been told to stop.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// The coordinator task.
struct MeshActor {
    mesh: Mesh,
    behavior: Arc<dyn RoomBehavior>,
    commands: mpsc::Receiver<Command>,
    dispatch: mpsc::Receiver<Message>,
}

impl MeshActor {
    #[instrument(skip_all, name = "sockit.mesh", fields(mesh = %self.mesh.shared.name))]
    async fn run(mut self) {
        info!("Mesh coordinator started");

        loop {
            tokio::select! {
                biased;

                () = self.mesh.shutdown.cancelled() => {
                    info!("Mesh coordinator received shutdown signal");
                    break;
                }

                Some(command) = self.commands.recv() => self.handle_command(command),

                Some(message) = self.dispatch.recv() => self.route(message),
            }
        }

        self.mesh.shared.registry.write().clear();
        info!("Mesh coordinator stopped");
    }

    fn handle_command(&self, command: Command) {
        let mut changes = Changes::default();

        match command {
            Command::Register { client, respond_to } => {
                self.mesh.shared.registry.write().register(client, &mut changes);
                self.apply(changes);
                let _ = respond_to.send(());
            }

            Command::Unregister { slug, respond_to } => {
                let known = self.mesh.shared.registry.write().unregister(&slug, &mut changes);
                self.apply(changes);
                let _ = respond_to.send(known);
            }

            Command::UnregisterConnection {
                slug,
                sink,
                respond_to,
            } => {
                let removed = self
                    .mesh
                    .shared
                    .registry
                    .write()
                    .unregister_connection(&slug, &sink, &mut changes);
                self.apply(changes);
                let _ = respond_to.send(removed);
            }

            Command::CreateRoom {
                slug,
                created_by,
                respond_to,
            } => {
                let result = self
                    .mesh
                    .shared
                    .registry
                    .write()
                    .create_room(&slug, &created_by, &mut changes);
                self.apply(changes);
                let _ = respond_to.send(result);
            }

            Command::DeleteRoom { slug, respond_to } => {
                let result = self.mesh.shared.registry.write().delete_room(&slug, &mut changes);
                if let Err(e) = &result {
                    warn!(room = %slug, error = %e, "Refusing to delete room");
                }
                self.apply(changes);
                let _ = respond_to.send(result);
            }

            Command::JoinRoom {
                room,
                client,
                respond_to,
            } => {
                let result = self
                    .mesh
                    .shared
                    .registry
                    .write()
                    .join(&room, &client, &mut changes);
                self.apply(changes);
                let _ = respond_to.send(result);
            }

            Command::LeaveRoom {
                room,
                client,
                respond_to,
            } => {
                let result = self
                    .mesh
                    .shared
                    .registry
                    .write()
                    .leave(&room, &client, &mut changes);
                self.apply(changes);
                let _ = respond_to.send(result);
            }
        }
    }

    /// Apply the side effects of a command once the write lock is released.
    fn apply(&self, changes: Changes) {
        let shared = &self.mesh.shared;

        if changes.dropped_events > 0 {
            shared
                .counters
                .events_dropped
                .fetch_add(changes.dropped_events, Ordering::Relaxed);
        }

        for room in changes.created {
            self.start_runner(room);
        }

        for slug in changes.deleted {
            info!(room = %slug, "Room deleted");
        }

        for event in changes.events {
            // No observers is fine.
            let _ = shared.feed.send(event);
        }
    }

    fn start_runner(&self, room: Room) {
        debug!(room = %room.slug(), id = room.id(), "Starting room behavior");

        let behavior = Arc::clone(&self.behavior);
        let mesh = self.mesh.clone();
        tokio::spawn(async move {
            behavior.run(room, mesh).await;
        });
    }

    fn route(&self, message: Message) {
        let target = message.target.clone();
        let outcome = self.mesh.shared.registry.read().route(message);
        let counters = &self.mesh.shared.counters;

        match outcome {
            Some(Delivery::Accepted) => {
                counters.routed.fetch_add(1, Ordering::Relaxed);
                trace!(room = %target, "Routed message");
            }
            Some(Delivery::Full) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(room = %target, "Room inbound queue full, dropping message");
            }
            Some(Delivery::Closed) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(room = %target, "Room behavior gone, dropping message");
            }
            None => {
                counters.unroutable.fetch_add(1, Ordering::Relaxed);
                debug!(target = %target, "No room for message target, dropping");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::BroadcastBehavior;
    use std::time::Duration;

    fn mesh() -> Mesh {
        Mesh::new("test-game", Arc::new(BroadcastBehavior))
    }

    fn client(slug: &str) -> (Client, mpsc::Sender<Arc<Message>>, mpsc::Receiver<Arc<Message>>) {
        let (tx, rx) = mpsc::channel(8);
        (Client::new(slug, vec![format!("token:{slug}")], &tx), tx, rx)
    }

    #[tokio::test]
    async fn test_mesh_starts_with_global_room() {
        let mesh = mesh();

        assert_eq!(mesh.name(), "test-game");
        assert_eq!(mesh.rooms(), vec![GLOBAL_ROOM.to_string()]);
        let info = mesh.room_info(GLOBAL_ROOM).unwrap();
        assert_eq!(info.id, 0);
        assert_eq!(info.created_by, GLOBAL_ROOM_CREATOR);
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let mesh = mesh();
        let (alice, _tx, _rx) = client("alice");

        mesh.register_client(alice).await.unwrap();

        assert!(mesh.clients().contains_key("alice"));
        assert_eq!(
            mesh.client_auth_metadata("alice"),
            Some(vec!["token:alice".to_string()])
        );
        assert_eq!(mesh.client_auth_metadata("nobody"), None);
        assert_eq!(mesh.client_rooms("alice"), vec![GLOBAL_ROOM.to_string()]);
        assert!(mesh.memberships()[GLOBAL_ROOM].contains_key("alice"));
    }

    #[tokio::test]
    async fn test_delete_global_room_refused() {
        let mesh = mesh();

        assert!(matches!(
            mesh.delete_room(GLOBAL_ROOM).await,
            Err(MeshError::ReservedRoom(_))
        ));
        assert!(mesh.room_exists(GLOBAL_ROOM));
    }

    #[tokio::test]
    async fn test_delete_room_twice() {
        let mesh = mesh();

        mesh.create_room("arena", "alice").await.unwrap();
        assert!(mesh.delete_room("arena").await.unwrap());
        assert!(!mesh.delete_room("arena").await.unwrap());
        assert!(!mesh.room_exists("arena"));
    }

    #[tokio::test]
    async fn test_create_room_invalid_slug() {
        let mesh = mesh();
        assert!(matches!(
            mesh.create_room("", "alice").await,
            Err(MeshError::InvalidSlug(_))
        ));
    }

    #[tokio::test]
    async fn test_join_unknown_client() {
        let mesh = mesh();
        assert!(matches!(
            mesh.join_room("lobby", "ghost").await,
            Err(MeshError::UnknownClient(_))
        ));
        assert!(!mesh.room_exists("lobby"));
    }

    #[tokio::test]
    async fn test_stats() {
        let mesh = mesh();
        let (alice, _tx1, _rx1) = client("alice");
        let (bob, _tx2, _rx2) = client("bob");

        mesh.register_client(alice).await.unwrap();
        mesh.register_client(bob).await.unwrap();
        mesh.join_room("lobby", "alice").await.unwrap();

        let stats = mesh.stats();
        assert_eq!(stats.client_count, 2);
        assert_eq!(stats.room_count, 2);
        assert_eq!(stats.total_memberships, 3);
    }

    #[tokio::test]
    async fn test_shutdown_closes_mesh() {
        let mesh = mesh();
        let (alice, _tx, _rx) = client("alice");

        mesh.shutdown();
        assert!(mesh.is_shut_down());

        assert!(matches!(
            mesh.register_client(alice).await,
            Err(MeshError::Closed)
        ));
        assert!(matches!(
            mesh.try_submit(Message::to_room("x", GLOBAL_ROOM)),
            Err(MeshError::Closed)
        ));

        // The coordinator clears its registry on the way out.
        tokio::time::timeout(Duration::from_secs(1), async {
            while mesh.room_exists(GLOBAL_ROOM) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_try_submit_reports_full_dispatch_queue() {
        let mesh = mesh();
        assert_eq!(mesh.config().dispatch_queue_capacity, 1);

        // Single-threaded runtime: the coordinator cannot drain between the
        // two calls because nothing here yields.
        mesh.try_submit(Message::to_room("first", GLOBAL_ROOM)).unwrap();
        assert!(matches!(
            mesh.try_submit(Message::to_room("second", GLOBAL_ROOM)),
            Err(MeshError::DispatchQueueFull)
        ));

        tokio::time::timeout(Duration::from_secs(1), async {
            while mesh.stats().messages_routed == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        mesh.try_submit(Message::to_room("third", GLOBAL_ROOM)).unwrap();
    }

    #[tokio::test]
    async fn test_leave_global_room_refused() {
        let mesh = mesh();
        let (alice, _tx, _rx) = client("alice");
        mesh.register_client(alice).await.unwrap();

        assert!(matches!(
            mesh.leave_room(GLOBAL_ROOM, "alice").await,
            Err(MeshError::ReservedRoom(_))
        ));
        assert!(mesh.room_members(GLOBAL_ROOM).unwrap().contains_key("alice"));
    }

    #[tokio::test]
    async fn test_unregister_connection_keeps_newer_registration() {
        let mesh = mesh();
        let (old, old_tx, _old_rx) = client("alice");
        let (new, new_tx, _new_rx) = client("alice");

        mesh.register_client(old).await.unwrap();
        mesh.register_client(new).await.unwrap();

        assert!(!mesh.unregister_connection("alice", &old_tx).await.unwrap());
        assert!(mesh.client("alice").unwrap().uses_sink(&new_tx));

        assert!(mesh.unregister_connection("alice", &new_tx).await.unwrap());
        assert!(mesh.client("alice").is_none());
    }

    #[tokio::test]
    async fn test_feed_reports_joins_and_leaves() {
        let mesh = mesh();
        let mut events = mesh.events();
        let (alice, _tx, _rx) = client("alice");

        mesh.register_client(alice).await.unwrap();
        mesh.join_room("lobby", "alice").await.unwrap();
        mesh.leave_room("lobby", "alice").await.unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            MembershipEvent::joined(GLOBAL_ROOM, "alice")
        );
        assert_eq!(
            events.recv().await.unwrap(),
            MembershipEvent::joined("lobby", "alice")
        );
        assert_eq!(
            events.recv().await.unwrap(),
            MembershipEvent::left("lobby", "alice")
        );
        assert!(!mesh.room_exists("lobby"));
    }
}

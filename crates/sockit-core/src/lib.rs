//! # sockit-core
//!
//! Room membership and message routing for the sockit realtime mesh.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Mesh** - The coordinator owning clients, rooms and memberships
//! - **Room** - A named group of clients with its own queues and lifecycle
//! - **Client** - A weak handle onto a transport-owned connection
//! - **RoomBehavior** - Per-room domain logic, started once per room
//! - **MembershipEvent** - Join/leave notifications
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐ register/join ┌─────────────┐ messages/events ┌──────────────┐
//! │  Transport  │──────────────▶│    Mesh     │────────────────▶│ RoomBehavior │
//! └─────────────┘    submit     └─────────────┘   (per room)    └──────────────┘
//!                                      │
//!                                      ▼
//!                               ┌─────────────┐
//!                               │ Event feed  │
//!                               └─────────────┘
//! ```

pub mod behavior;
pub mod client;
pub mod event;
pub mod mesh;
mod registry;
pub mod room;

pub use behavior::{BroadcastBehavior, RoomBehavior};
pub use client::{Client, ClientSink};
pub use event::{MembershipEvent, MembershipEventKind};
pub use mesh::{Mesh, MeshConfig, MeshError, MeshStats, RoomInfo, GLOBAL_ROOM};
pub use room::{Delivery, Members, Room, RoomInput};
pub use sockit_protocol::Message;

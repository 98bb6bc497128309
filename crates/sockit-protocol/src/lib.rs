//! # sockit-protocol
//!
//! Wire envelope for the sockit room mesh.
//!
//! Every message exchanged between clients, the mesh and room behaviors is a
//! [`Message`]: an action name, a free-form JSON body, a sender slug and a
//! target that is either a room or a single client.
//!
//! ## Example
//!
//! ```rust
//! use sockit_protocol::{codec, Message};
//!
//! let message = Message::to_room("chat", "lobby").with_sender("alice");
//!
//! let encoded = codec::encode(&message).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(message, decoded);
//! ```

pub mod codec;
pub mod message;

pub use codec::{decode, encode, ProtocolError, MAX_MESSAGE_SIZE};
pub use message::Message;

//! Client handles.
//!
//! A [`Client`] is what the transport hands to the mesh when a connection is
//! admitted. The outbound sink stays owned by the transport; the handle only
//! keeps a weak sender, so a dropped connection shows up as a failed delivery
//! instead of a dangling reference.

use crate::room::{try_push, Delivery};
use sockit_protocol::Message;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outbound sink type owned by the transport.
pub type ClientSink = mpsc::Sender<Arc<Message>>;

/// An opaque reference to a connected peer.
#[derive(Debug, Clone)]
pub struct Client {
    slug: String,
    auth_metadata: Vec<String>,
    sink: mpsc::WeakSender<Arc<Message>>,
}

impl Client {
    /// Create a client handle over a transport-owned sink.
    #[must_use]
    pub fn new(slug: impl Into<String>, auth_metadata: Vec<String>, sink: &ClientSink) -> Self {
        Self {
            slug: slug.into(),
            auth_metadata,
            sink: sink.downgrade(),
        }
    }

    /// Get the client slug.
    #[must_use]
    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// Get the opaque auth metadata attached by the transport.
    #[must_use]
    pub fn auth_metadata(&self) -> &[String] {
        &self.auth_metadata
    }

    /// Check whether the transport still holds the sink open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.sink.upgrade().is_some_and(|tx| !tx.is_closed())
    }

    /// Check whether this handle writes into `sink`.
    #[must_use]
    pub fn uses_sink(&self, sink: &ClientSink) -> bool {
        self.sink.upgrade().is_some_and(|tx| tx.same_channel(sink))
    }

    /// Try to hand a message to the client's transport without waiting.
    ///
    /// A sink the transport has already dropped reports [`Delivery::Closed`].
    pub fn try_deliver(&self, message: Arc<Message>) -> Delivery {
        match self.sink.upgrade() {
            Some(tx) => try_push(&tx, message),
            None => Delivery::Closed,
        }
    }
}

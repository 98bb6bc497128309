//! Shared fixtures for sockit benchmarks.

use async_trait::async_trait;
use sockit_core::{Client, Mesh, MeshConfig, Message, Room, RoomBehavior, RoomInput};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Barrier};

/// Room behavior that consumes every message and counts it.
#[derive(Debug, Default)]
pub struct DrainBehavior {
    received: Arc<AtomicU64>,
}

impl DrainBehavior {
    /// Create a behavior reporting into `received`.
    #[must_use]
    pub fn new(received: Arc<AtomicU64>) -> Self {
        Self { received }
    }
}

#[async_trait]
impl RoomBehavior for DrainBehavior {
    async fn run(&self, mut room: Room, _mesh: Mesh) {
        while let Some(input) = room.recv().await {
            if let RoomInput::Message(_) = input {
                self.received.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Queue sizes large enough that benchmarks measure routing, not drops.
#[must_use]
pub fn roomy_config() -> MeshConfig {
    MeshConfig {
        room_queue_capacity: 65_536,
        dispatch_queue_capacity: 65_536,
        command_queue_capacity: 4_096,
        event_feed_capacity: 65_536,
    }
}

/// A room-targeted message with a string body of `body_size` bytes.
#[must_use]
pub fn sample_message(room: &str, body_size: usize) -> Message {
    Message::to_room("bench", room)
        .with_sender("bench-client")
        .with_body(serde_json::Value::String("x".repeat(body_size)))
}

/// A connected client: the handle given to the mesh plus the transport side.
pub struct BenchClient {
    pub sink: mpsc::Sender<Arc<Message>>,
    pub outbound: mpsc::Receiver<Arc<Message>>,
}

/// Register `count` clients and join them all to `room`.
///
/// # Panics
///
/// Panics if the mesh rejects a registration or join.
pub async fn join_clients(mesh: &Mesh, room: &str, count: usize, buffer: usize) -> Vec<BenchClient> {
    let mut clients = Vec::with_capacity(count);
    for i in 0..count {
        let slug = format!("client-{i}");
        let (sink, outbound) = mpsc::channel(buffer);
        mesh.register_client(Client::new(slug.clone(), Vec::new(), &sink))
            .await
            .expect("register");
        mesh.join_room(room, &slug).await.expect("join");
        clients.push(BenchClient { sink, outbound });
    }
    clients
}

/// Run `setup`, then wait on `barrier` whether or not it succeeded.
///
/// Every participant reaches the barrier, so one failed client cannot hold
/// the others forever.
pub async fn setup_then_wait<T, E>(
    setup: impl Future<Output = Result<T, E>>,
    barrier: &Barrier,
) -> Result<T, E> {
    let result = setup.await;
    barrier.wait().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_failed_setup_still_reaches_barrier() {
        let barrier = Arc::new(Barrier::new(2));

        let task = {
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                setup_then_wait(async { Err::<(), _>("connection refused") }, &barrier).await
            })
        };

        timeout(Duration::from_secs(2), barrier.wait())
            .await
            .expect("barrier never released");
        assert_eq!(task.await.unwrap(), Err("connection refused"));
    }

    #[tokio::test]
    async fn test_successful_setup_returns_value() {
        let barrier = Barrier::new(1);
        let value = setup_then_wait(async { Ok::<_, ()>(7) }, &barrier).await;
        assert_eq!(value, Ok(7));
    }
}

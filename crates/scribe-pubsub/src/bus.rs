//! The shared message bus seam.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// One serialized edit on the bus, tagged with its topic.
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// Per-document topic the message was published to.
    pub topic: String,
    /// Serialized edit payload (JSON).
    pub payload: Vec<u8>,
}

/// A shared message bus with per-document broadcast topics.
///
/// Implementations may be backed by any pub/sub system that offers
/// at-least-once broadcast delivery to every attached instance. The
/// in-process [`MemoryBus`] serves tests and single-machine clusters.
#[async_trait]
pub trait EditBus: Send + Sync {
    /// Publish a message to its topic, fanning out to all subscribers.
    async fn publish(&self, message: BusMessage) -> Result<()>;

    /// Attach a subscriber receiving every subsequently published
    /// message on any topic. Local topic filtering is the receiver's
    /// concern.
    fn subscribe(&self) -> broadcast::Receiver<BusMessage>;
}

/// In-process bus: a single broadcast channel shared by all instances
/// wired to it.
pub struct MemoryBus {
    sender: broadcast::Sender<BusMessage>,
}

impl MemoryBus {
    /// Create a bus with the given subscriber backlog capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EditBus for MemoryBus {
    async fn publish(&self, message: BusMessage) -> Result<()> {
        // A send error only means no subscriber is currently attached;
        // fan-out to zero receivers is not a failure.
        let _ = self.sender.send(message);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_receives_published_messages() {
        let bus = MemoryBus::default();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(BusMessage {
            topic: "editor.doc.doc-1".to_string(),
            payload: b"payload".to_vec(),
        })
        .await
        .unwrap();

        assert_eq!(first.recv().await.unwrap().payload, b"payload");
        assert_eq!(second.recv().await.unwrap().topic, "editor.doc.doc-1");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_not_an_error() {
        let bus = MemoryBus::default();
        bus.publish(BusMessage {
            topic: "editor.doc.doc-1".to_string(),
            payload: Vec::new(),
        })
        .await
        .unwrap();
    }
}

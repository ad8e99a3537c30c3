//! Connected sessions and their document subscriptions.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use scribe_core::Edit;
use scribe_pubsub::Delivery;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::session::message::ServerMessage;

/// Sessions connected to this instance, and who is subscribed where.
///
/// Outbound frames go through each session's unbounded channel; the
/// socket writer task drains it. A send failure means the socket is
/// gone and the session is pruned on its disconnect path.
#[derive(Default)]
pub struct SessionRegistry {
    senders: DashMap<Uuid, mpsc::UnboundedSender<ServerMessage>>,
    /// doc id -> session id -> user id
    subscribers: DashMap<String, HashMap<Uuid, String>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session_id: Uuid, sender: mpsc::UnboundedSender<ServerMessage>) {
        self.senders.insert(session_id, sender);
        debug!(%session_id, "session registered");
    }

    /// Remove a session entirely. Returns the `(doc, user)` pairs it
    /// was subscribed to, for departure broadcasts.
    pub fn unregister(&self, session_id: Uuid) -> Vec<(String, String)> {
        self.senders.remove(&session_id);
        let mut departed = Vec::new();
        for mut entry in self.subscribers.iter_mut() {
            if let Some(user_id) = entry.value_mut().remove(&session_id) {
                departed.push((entry.key().clone(), user_id));
            }
        }
        self.subscribers.retain(|_, sessions| !sessions.is_empty());
        debug!(%session_id, subscriptions = departed.len(), "session unregistered");
        departed
    }

    /// Subscribe a session to a document. Returns `false` when it was
    /// already subscribed.
    pub fn subscribe(&self, doc_id: &str, session_id: Uuid, user_id: &str) -> bool {
        self.subscribers
            .entry(doc_id.to_string())
            .or_default()
            .insert(session_id, user_id.to_string())
            .is_none()
    }

    /// Drop one subscription. Returns the user id it carried.
    pub fn unsubscribe(&self, doc_id: &str, session_id: Uuid) -> Option<String> {
        let user_id = self
            .subscribers
            .get_mut(doc_id)
            .and_then(|mut sessions| sessions.remove(&session_id));
        if user_id.is_some() {
            self.subscribers
                .remove_if(doc_id, |_, sessions| sessions.is_empty());
        }
        user_id
    }

    /// User id under which a session subscribed to a document, if any.
    pub fn subscription_user(&self, doc_id: &str, session_id: Uuid) -> Option<String> {
        self.subscribers
            .get(doc_id)
            .and_then(|sessions| sessions.get(&session_id).cloned())
    }

    pub fn subscriber_count(&self, doc_id: &str) -> usize {
        self.subscribers
            .get(doc_id)
            .map(|sessions| sessions.len())
            .unwrap_or(0)
    }

    pub fn session_count(&self) -> usize {
        self.senders.len()
    }

    /// Send one frame to one session. `false` when the session or its
    /// socket is gone.
    pub fn send(&self, session_id: Uuid, message: ServerMessage) -> bool {
        match self.senders.get(&session_id) {
            Some(sender) => sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Send a frame to every subscriber of a document, optionally
    /// skipping one session.
    pub fn broadcast(&self, doc_id: &str, message: &ServerMessage, except: Option<Uuid>) {
        let targets: Vec<Uuid> = match self.subscribers.get(doc_id) {
            Some(sessions) => sessions
                .keys()
                .copied()
                .filter(|id| Some(*id) != except)
                .collect(),
            None => return,
        };
        for session_id in targets {
            self.send(session_id, message.clone());
        }
    }
}

/// Fan-in from the bus: a durable edit reaches every local subscriber
/// of its document, the author's session included. Clients dedupe by
/// `(serverId, serverSeqNum)` against acks they already hold.
#[async_trait]
impl Delivery for SessionRegistry {
    async fn deliver(&self, edit: Edit) -> Result<()> {
        let doc_id = edit.doc_id.clone();
        self.broadcast(
            &doc_id,
            &ServerMessage::OperationBroadcast { edit },
            None,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_type(message: &ServerMessage) -> &'static str {
        match message {
            ServerMessage::OperationBroadcast { .. } => "broadcast",
            ServerMessage::UserJoined { .. } => "joined",
            _ => "other",
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_subscribers_only() {
        let registry = SessionRegistry::new();
        let (sender_a, mut recv_a) = mpsc::unbounded_channel();
        let (sender_b, mut recv_b) = mpsc::unbounded_channel();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        registry.register(a, sender_a);
        registry.register(b, sender_b);

        assert!(registry.subscribe("doc-1", a, "alice"));
        let edit = Edit::insert("doc-1", "bob", "server-a", 'x', "m", 1);
        registry.deliver(edit).await.unwrap();

        let received = recv_a.recv().await.unwrap();
        assert_eq!(frame_type(&received), "broadcast");
        assert!(recv_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn except_skips_the_named_session() {
        let registry = SessionRegistry::new();
        let (sender_a, mut recv_a) = mpsc::unbounded_channel();
        let (sender_b, mut recv_b) = mpsc::unbounded_channel();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        registry.register(a, sender_a);
        registry.register(b, sender_b);
        registry.subscribe("doc-1", a, "alice");
        registry.subscribe("doc-1", b, "bob");

        let joined = ServerMessage::UserJoined {
            doc_id: "doc-1".to_string(),
            user_id: "bob".to_string(),
        };
        registry.broadcast("doc-1", &joined, Some(b));

        assert_eq!(frame_type(&recv_a.recv().await.unwrap()), "joined");
        assert!(recv_b.try_recv().is_err());
    }

    #[test]
    fn unregister_reports_departed_subscriptions() {
        let registry = SessionRegistry::new();
        let (sender, _receiver) = mpsc::unbounded_channel();
        let session = Uuid::new_v4();
        registry.register(session, sender);
        registry.subscribe("doc-1", session, "alice");
        registry.subscribe("doc-2", session, "alice");

        let mut departed = registry.unregister(session);
        departed.sort();
        assert_eq!(
            departed,
            vec![
                ("doc-1".to_string(), "alice".to_string()),
                ("doc-2".to_string(), "alice".to_string()),
            ]
        );
        assert_eq!(registry.subscriber_count("doc-1"), 0);
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn duplicate_subscribe_is_reported() {
        let registry = SessionRegistry::new();
        let (sender, _receiver) = mpsc::unbounded_channel();
        let session = Uuid::new_v4();
        registry.register(session, sender);

        assert!(registry.subscribe("doc-1", session, "alice"));
        assert!(!registry.subscribe("doc-1", session, "alice"));
        assert_eq!(registry.unsubscribe("doc-1", session).as_deref(), Some("alice"));
        assert_eq!(registry.unsubscribe("doc-1", session), None);
    }
}

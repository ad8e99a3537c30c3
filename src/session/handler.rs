//! Per-connection protocol handling.

use std::sync::Arc;

use anyhow::Result;
use anyhow::bail;
use scribe_core::Edit;
use scribe_core::EditKind;
use scribe_core::now_unix_ms;
use scribe_index::position;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::session::message::ClientMessage;
use crate::session::message::ServerMessage;
use crate::state::AppState;

/// One client connection's view of the protocol.
///
/// Created when the socket upgrades; the returned receiver feeds the
/// socket writer task. Every inbound text frame goes through
/// [`handle_text`]; failures turn into `ERROR` frames rather than
/// closing the connection.
///
/// [`handle_text`]: SessionHandler::handle_text
pub struct SessionHandler {
    state: Arc<AppState>,
    session_id: Uuid,
}

impl SessionHandler {
    /// Register a new session and emit the `CONNECTED` greeting.
    pub fn connect(state: Arc<AppState>) -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let session_id = Uuid::new_v4();
        let (sender, receiver) = mpsc::unbounded_channel();
        state.sessions.register(session_id, sender);
        state.sessions.send(
            session_id,
            ServerMessage::Connected {
                server_id: state.instance.id.clone(),
                timestamp: now_unix_ms(),
            },
        );
        info!(%session_id, "session connected");
        (Self { state, session_id }, receiver)
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Process one inbound frame. Parse and protocol errors are sent
    /// back as `ERROR` frames.
    pub async fn handle_text(&self, text: &str) {
        let message: ClientMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(error) => {
                debug!(session_id = %self.session_id, %error, "unparseable frame");
                self.send_error(format!("malformed message: {error}"));
                return;
            }
        };
        if let Err(error) = self.handle(message).await {
            warn!(session_id = %self.session_id, %error, "request failed");
            self.send_error(error.to_string());
        }
    }

    /// Tear down the session and announce departures.
    pub fn disconnect(&self) {
        for (doc_id, user_id) in self.state.sessions.unregister(self.session_id) {
            self.state.sessions.broadcast(
                &doc_id,
                &ServerMessage::UserLeft { doc_id: doc_id.clone(), user_id },
                None,
            );
        }
        info!(session_id = %self.session_id, "session disconnected");
    }

    async fn handle(&self, message: ClientMessage) -> Result<()> {
        match message {
            ClientMessage::Subscribe { doc_id, user_id } => {
                self.subscribe(doc_id, user_id).await
            }
            ClientMessage::Operation {
                doc_id,
                user_id: _,
                kind,
                character,
                before,
                after,
                position,
            } => {
                self.operation(doc_id, kind, character, before, after, position)
                    .await
            }
            ClientMessage::SyncRequest {
                doc_id,
                version_vector: _,
            } => {
                // Acknowledged without a computed diff; clients refetch
                // document state over HTTP when they suspect drift.
                self.send(ServerMessage::SyncResponse { doc_id });
                Ok(())
            }
            ClientMessage::Unsubscribe { doc_id } => {
                self.unsubscribe(doc_id);
                Ok(())
            }
            ClientMessage::Ping => {
                self.send(ServerMessage::Pong {
                    timestamp: now_unix_ms(),
                });
                Ok(())
            }
        }
    }

    async fn subscribe(&self, doc_id: String, user_id: String) -> Result<()> {
        // Re-subscribing just refreshes the snapshot; only a first
        // subscription announces the user to the room.
        let newly = self.state.sessions.subscribe(&doc_id, self.session_id, &user_id);

        let content = self.state.reconciler.content(&doc_id).await?;
        let version_vector = self.state.reconciler.vector(&doc_id).await?;
        self.send(ServerMessage::Subscribed {
            doc_id: doc_id.clone(),
            content,
            version_vector,
        });
        if newly {
            self.state.sessions.broadcast(
                &doc_id,
                &ServerMessage::UserJoined {
                    doc_id: doc_id.clone(),
                    user_id,
                },
                Some(self.session_id),
            );
        }
        Ok(())
    }

    fn unsubscribe(&self, doc_id: String) {
        if let Some(user_id) = self.state.sessions.unsubscribe(&doc_id, self.session_id) {
            self.state.sessions.broadcast(
                &doc_id,
                &ServerMessage::UserLeft {
                    doc_id: doc_id.clone(),
                    user_id,
                },
                Some(self.session_id),
            );
        }
        self.send(ServerMessage::Unsubscribed { doc_id });
    }

    async fn operation(
        &self,
        doc_id: String,
        kind: EditKind,
        character: Option<char>,
        before: Option<String>,
        after: Option<String>,
        position: Option<String>,
    ) -> Result<()> {
        // The edit carries the user this session subscribed as, never a
        // client-claimed identity.
        let Some(user_id) = self
            .state
            .sessions
            .subscription_user(&doc_id, self.session_id)
        else {
            bail!("not subscribed to document '{doc_id}'");
        };

        let edit = match kind {
            EditKind::Insert => {
                let Some(character) = character else {
                    bail!("insert requires a character");
                };
                let position = position::between(before.as_deref(), after.as_deref())?;
                let seq = self.state.sequencer.next(&doc_id).await?;
                Edit::insert(
                    &doc_id,
                    &user_id,
                    &self.state.instance.id,
                    character,
                    position,
                    seq,
                )
            }
            EditKind::Delete => {
                let Some(position) = position else {
                    bail!("delete requires a position");
                };
                let seq = self.state.sequencer.next(&doc_id).await?;
                Edit::delete(&doc_id, &user_id, &self.state.instance.id, position, seq)
            }
        };

        let ack = ServerMessage::OperationAck {
            doc_id: edit.doc_id.clone(),
            server_id: edit.server_id.clone(),
            seq: edit.seq,
            position: edit.position.clone(),
            timestamp: edit.created_at_ms,
        };
        self.state.buffer.add(edit).await?;
        self.send(ack);
        Ok(())
    }

    fn send(&self, message: ServerMessage) {
        self.state.sessions.send(self.session_id, message);
    }

    fn send_error(&self, message: String) {
        self.send(ServerMessage::Error {
            message,
            timestamp: now_unix_ms(),
        });
    }
}

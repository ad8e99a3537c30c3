//! Wire messages for the editor WebSocket protocol.
//!
//! Every frame is a JSON object tagged by `type`. Client frames carry
//! intent (subscribe, edit, sync); server frames carry acknowledged
//! state. Inserts name their neighbors and the server assigns the
//! fractional position, so clients never invent position keys.

use scribe_core::Edit;
use scribe_core::EditKind;
use scribe_core::VersionVector;
use serde::Deserialize;
use serde::Serialize;

/// Frames sent by the editor client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "SUBSCRIBE", rename_all = "camelCase")]
    Subscribe { doc_id: String, user_id: String },

    #[serde(rename = "OPERATION", rename_all = "camelCase")]
    Operation {
        doc_id: String,
        /// Informational only; the server stamps edits with the user
        /// the session subscribed as.
        #[serde(default)]
        user_id: String,
        #[serde(rename = "operationType")]
        kind: EditKind,
        /// Required for inserts.
        #[serde(default)]
        character: Option<char>,
        /// Position key of the character left of the insert point.
        /// Absent means inserting at the head.
        #[serde(default, rename = "beforePosition")]
        before: Option<String>,
        /// Position key of the character right of the insert point.
        /// Absent means inserting at the tail.
        #[serde(default, rename = "afterPosition")]
        after: Option<String>,
        /// Position key of the character to delete.
        #[serde(default, rename = "position")]
        position: Option<String>,
    },

    #[serde(rename = "SYNC_REQUEST", rename_all = "camelCase")]
    SyncRequest {
        doc_id: String,
        /// What the client has applied so far, per origin server.
        #[serde(default, rename = "versionVector")]
        version_vector: VersionVector,
    },

    #[serde(rename = "UNSUBSCRIBE", rename_all = "camelCase")]
    Unsubscribe { doc_id: String },

    #[serde(rename = "PING")]
    Ping,
}

/// Frames sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// First frame on every connection.
    #[serde(rename = "CONNECTED", rename_all = "camelCase")]
    Connected { server_id: String, timestamp: u64 },

    /// Subscription succeeded; carries the current snapshot.
    #[serde(rename = "SUBSCRIBED", rename_all = "camelCase")]
    Subscribed {
        doc_id: String,
        content: String,
        #[serde(rename = "versionVector")]
        version_vector: VersionVector,
    },

    /// The edit was sequenced and buffered; `seq` and `position` are
    /// its permanent identity.
    #[serde(rename = "OPERATION_ACK", rename_all = "camelCase")]
    OperationAck {
        doc_id: String,
        server_id: String,
        #[serde(rename = "serverSeqNum")]
        seq: u64,
        #[serde(rename = "fractionalPosition")]
        position: String,
        timestamp: u64,
    },

    /// A durable edit from any instance, fanned out to subscribers.
    #[serde(rename = "OPERATION_BROADCAST")]
    OperationBroadcast {
        #[serde(flatten)]
        edit: Edit,
    },

    /// Acknowledges a sync request. Carries no diff; clients that
    /// suspect drift refetch document state over HTTP.
    #[serde(rename = "SYNC_RESPONSE", rename_all = "camelCase")]
    SyncResponse { doc_id: String },

    #[serde(rename = "UNSUBSCRIBED", rename_all = "camelCase")]
    Unsubscribed { doc_id: String },

    #[serde(rename = "PONG")]
    Pong { timestamp: u64 },

    #[serde(rename = "USER_JOINED", rename_all = "camelCase")]
    UserJoined { doc_id: String, user_id: String },

    #[serde(rename = "USER_LEFT", rename_all = "camelCase")]
    UserLeft { doc_id: String, user_id: String },

    #[serde(rename = "ERROR")]
    Error { message: String, timestamp: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_parse_by_type_tag() {
        let subscribe: ClientMessage = serde_json::from_str(
            r#"{"type":"SUBSCRIBE","docId":"doc-1","userId":"user-1"}"#,
        )
        .unwrap();
        match subscribe {
            ClientMessage::Subscribe { doc_id, user_id } => {
                assert_eq!(doc_id, "doc-1");
                assert_eq!(user_id, "user-1");
            }
            other => panic!("unexpected frame {other:?}"),
        }

        let operation: ClientMessage = serde_json::from_str(
            r#"{"type":"OPERATION","docId":"doc-1","userId":"user-1",
                "operationType":"INSERT","character":"h","beforePosition":"f"}"#,
        )
        .unwrap();
        match operation {
            ClientMessage::Operation {
                kind,
                character,
                before,
                after,
                ..
            } => {
                assert_eq!(kind, EditKind::Insert);
                assert_eq!(character, Some('h'));
                assert_eq!(before.as_deref(), Some("f"));
                assert_eq!(after, None);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn sync_request_defaults_to_an_empty_vector() {
        let frame: ClientMessage =
            serde_json::from_str(r#"{"type":"SYNC_REQUEST","docId":"doc-1"}"#).unwrap();
        match frame {
            ClientMessage::SyncRequest { version_vector, .. } => {
                assert!(version_vector.is_empty());
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn broadcast_flattens_the_edit_fields() {
        let message = ServerMessage::OperationBroadcast {
            edit: Edit::insert("doc-1", "user-1", "server-a", 'h', "m", 3),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "OPERATION_BROADCAST");
        assert_eq!(json["docId"], "doc-1");
        assert_eq!(json["operationType"], "INSERT");
        assert_eq!(json["serverSeqNum"], 3);
    }

    #[test]
    fn server_frames_use_protocol_field_names() {
        let ack = ServerMessage::OperationAck {
            doc_id: "doc-1".to_string(),
            server_id: "server-a".to_string(),
            seq: 9,
            position: "mm".to_string(),
            timestamp: 1,
        };
        let json = serde_json::to_value(&ack).unwrap();
        assert_eq!(json["type"], "OPERATION_ACK");
        assert_eq!(json["serverSeqNum"], 9);
        assert_eq!(json["fractionalPosition"], "mm");
    }
}

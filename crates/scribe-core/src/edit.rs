//! The unit of the per-document operation log.

use serde::Deserialize;
use serde::Serialize;

use crate::time::now_unix_ms;

/// Kind of an edit: insert one character, or delete one character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EditKind {
    /// Insert `character` at `position`.
    Insert,
    /// Logically delete the character at `position`.
    Delete,
}

impl EditKind {
    /// String representation matching the wire protocol.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Delete => "DELETE",
        }
    }
}

/// One accepted edit, as persisted to the durable operation log.
///
/// For a fixed `(doc_id, server_id)` pair, `seq` values are strictly
/// increasing and assigned exactly once by that server's sequencer.
/// Edits are never deleted; the only mutation after creation is setting
/// `applied` once the snapshot reconciler has materialized the edit.
///
/// Field names on the wire follow the session protocol: `docId`,
/// `operationType`, `fractionalPosition`, `serverSeqNum` and so on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edit {
    /// Document this edit belongs to.
    pub doc_id: String,
    /// User who authored the edit.
    pub user_id: String,
    /// Server instance that sequenced the edit.
    pub server_id: String,
    /// Insert or delete.
    #[serde(rename = "operationType")]
    pub kind: EditKind,
    /// The inserted character. Absent for deletes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character: Option<char>,
    /// Fractional position key. Never reused or mutated once assigned.
    #[serde(rename = "fractionalPosition")]
    pub position: String,
    /// Per-(document, server) sequence number.
    #[serde(rename = "serverSeqNum")]
    pub seq: u64,
    /// Creation time, Unix milliseconds.
    #[serde(rename = "timestamp")]
    pub created_at_ms: u64,
    /// Whether the snapshot reconciler has applied this edit.
    #[serde(default)]
    pub applied: bool,
}

impl Edit {
    /// Build an insert edit. `seq` is assigned later by the sequencer.
    pub fn insert(
        doc_id: impl Into<String>,
        user_id: impl Into<String>,
        server_id: impl Into<String>,
        character: char,
        position: impl Into<String>,
        seq: u64,
    ) -> Self {
        Self {
            doc_id: doc_id.into(),
            user_id: user_id.into(),
            server_id: server_id.into(),
            kind: EditKind::Insert,
            character: Some(character),
            position: position.into(),
            seq,
            created_at_ms: now_unix_ms(),
            applied: false,
        }
    }

    /// Build a delete edit targeting an existing position key.
    pub fn delete(
        doc_id: impl Into<String>,
        user_id: impl Into<String>,
        server_id: impl Into<String>,
        position: impl Into<String>,
        seq: u64,
    ) -> Self {
        Self {
            doc_id: doc_id.into(),
            user_id: user_id.into(),
            server_id: server_id.into(),
            kind: EditKind::Delete,
            character: None,
            position: position.into(),
            seq,
            created_at_ms: now_unix_ms(),
            applied: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_field_names_match_protocol() {
        let edit = Edit::insert("doc-1", "user-1", "server-a", 'h', "m", 7);
        let json = serde_json::to_value(&edit).unwrap();

        assert_eq!(json["docId"], "doc-1");
        assert_eq!(json["userId"], "user-1");
        assert_eq!(json["serverId"], "server-a");
        assert_eq!(json["operationType"], "INSERT");
        assert_eq!(json["character"], "h");
        assert_eq!(json["fractionalPosition"], "m");
        assert_eq!(json["serverSeqNum"], 7);
        assert_eq!(json["applied"], false);
    }

    #[test]
    fn delete_omits_character() {
        let edit = Edit::delete("doc-1", "user-1", "server-a", "m", 8);
        let json = serde_json::to_value(&edit).unwrap();

        assert_eq!(json["operationType"], "DELETE");
        assert!(json.get("character").is_none());
    }

    #[test]
    fn roundtrip() {
        let edit = Edit::insert("doc-1", "user-1", "server-a", 'x', "mm", 3);
        let json = serde_json::to_string(&edit).unwrap();
        let back: Edit = serde_json::from_str(&json).unwrap();
        assert_eq!(edit, back);
    }
}

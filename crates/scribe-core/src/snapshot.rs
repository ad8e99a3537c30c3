//! Materialized snapshot rows.

use serde::Deserialize;
use serde::Serialize;

/// One materialized character of a document.
///
/// The ordered (by `position`, lexicographically) sequence of active
/// rows for a document is its current text. Rows are append-only:
/// a delete flips `active` to `false`, it never removes the row, so
/// replaying the same change-capture event twice has no second effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRow {
    /// Document this row belongs to.
    pub doc_id: String,
    /// Fractional position key. Never mutated after creation.
    #[serde(rename = "fractionalPosition")]
    pub position: String,
    /// The character, absent once logically deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character: Option<char>,
    /// Origin server of the insert that created this row.
    pub server_id: String,
    /// Sequence number of the insert that created this row.
    #[serde(rename = "serverSeqNum")]
    pub seq: u64,
    /// False once the character has been logically deleted.
    pub active: bool,
}

impl SnapshotRow {
    /// Build an active row from the parts of an applied insert.
    pub fn new(
        doc_id: impl Into<String>,
        position: impl Into<String>,
        character: char,
        server_id: impl Into<String>,
        seq: u64,
    ) -> Self {
        Self {
            doc_id: doc_id.into(),
            position: position.into(),
            character: Some(character),
            server_id: server_id.into(),
            seq,
            active: true,
        }
    }
}

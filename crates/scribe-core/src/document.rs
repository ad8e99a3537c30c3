//! Read-only document metadata.

use serde::Deserialize;
use serde::Serialize;

/// Metadata for a document, owned by an external metadata service.
///
/// The synchronization core consumes this read-only, for existence and
/// ownership checks. Sharing, permissions and notification workflows
/// live entirely outside this workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMeta {
    /// Stable document identifier.
    pub doc_id: String,
    /// Display title.
    pub title: String,
    /// Owning user.
    pub owner_id: String,
    /// Whether non-collaborators may request access.
    pub allow_access_requests: bool,
    /// Creation time, Unix milliseconds.
    pub created_at_ms: u64,
    /// Last update time, Unix milliseconds.
    pub updated_at_ms: u64,
}

//! Storage trait seams.

use anyhow::Result;
use async_trait::async_trait;
use scribe_core::DocumentMeta;
use scribe_core::Edit;
use scribe_core::SnapshotRow;
use scribe_core::VersionVector;

/// Durable append-only log of accepted edits.
///
/// Edits are queryable by `(doc, server, sequence range)`. Rows are
/// never deleted; the only mutation is [`mark_applied`].
///
/// [`mark_applied`]: EditStore::mark_applied
#[async_trait]
pub trait EditStore: Send + Sync {
    /// Append a batch of edits in order. The whole batch succeeds or
    /// fails; callers treat failure as "nothing was written".
    async fn append_edits(&self, edits: &[Edit]) -> Result<()>;

    /// Highest persisted sequence number for `(doc_id, server_id)`,
    /// zero when that pair has no edits.
    async fn max_seq(&self, doc_id: &str, server_id: &str) -> Result<u64>;

    /// Edits for `(doc_id, server_id)` with `from <= seq <= to`,
    /// ordered by sequence number.
    async fn edits_in_range(
        &self,
        doc_id: &str,
        server_id: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<Edit>>;

    /// Every edit for a document, ordered by creation time.
    async fn edits_for_doc(&self, doc_id: &str) -> Result<Vec<Edit>>;

    /// Set the `applied` flag on one edit. Idempotent.
    async fn mark_applied(&self, doc_id: &str, server_id: &str, seq: u64) -> Result<()>;
}

/// Materialized per-character table of the snapshot view.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Insert a new active row. Returns `false` without writing when a
    /// row with the same `(doc, server, seq)` provenance already
    /// exists — the authoritative idempotence check.
    async fn insert_row(&self, row: SnapshotRow) -> Result<bool>;

    /// Mark the active row at `(doc_id, position)` inactive. Returns
    /// `false` when no active row exists there (already deleted or
    /// never inserted).
    async fn deactivate_row(&self, doc_id: &str, position: &str) -> Result<bool>;

    /// Active rows for a document, ordered by position key.
    async fn active_rows(&self, doc_id: &str) -> Result<Vec<SnapshotRow>>;

    /// All rows (active and inactive) created by one origin server,
    /// ordered by sequence number.
    async fn rows_for_server(&self, doc_id: &str, server_id: &str) -> Result<Vec<SnapshotRow>>;

    /// Whether a row with this exact provenance exists.
    async fn row_exists(&self, doc_id: &str, server_id: &str, seq: u64) -> Result<bool>;
}

/// Per-document version vector entries.
#[async_trait]
pub trait VersionVectorStore: Send + Sync {
    /// Advance the `(doc_id, server_id)` entry to `seq`. Monotonic:
    /// a smaller value than the stored one is ignored.
    async fn advance(&self, doc_id: &str, server_id: &str, seq: u64) -> Result<()>;

    /// The full vector for a document. Empty when unknown.
    async fn vector(&self, doc_id: &str) -> Result<VersionVector>;
}

/// Read-only view of document metadata owned by an external service.
#[async_trait]
pub trait DocumentDirectory: Send + Sync {
    /// Metadata for a document, `None` when it does not exist.
    async fn get(&self, doc_id: &str) -> Result<Option<DocumentMeta>>;

    /// Existence check.
    async fn exists(&self, doc_id: &str) -> Result<bool> {
        Ok(self.get(doc_id).await?.is_some())
    }
}

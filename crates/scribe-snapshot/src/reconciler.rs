//! Applies captured edits to the snapshot tables.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use dashmap::DashMap;
use scribe_core::Edit;
use scribe_core::EditKind;
use scribe_core::SeqRange;
use scribe_core::SnapshotRow;
use scribe_core::VersionVector;
use scribe_storage::EditStore;
use scribe_storage::SnapshotStore;
use scribe_storage::VersionVectorStore;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::feed::ChangeFeed;

/// Pause before retrying an event whose application failed.
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Result of applying one captured edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The edit changed the snapshot.
    Applied,
    /// The edit had been applied before; the vector was still
    /// advanced so a crash between the two apply steps heals.
    Duplicate,
}

/// Materializes the edit log into per-character snapshot rows and
/// per-document version vectors.
///
/// Application is a two-step write: the snapshot row first, the
/// version vector second. The feed redelivers on any crash between
/// the steps; the redelivered event finds the row already present,
/// takes the duplicate path, and advances the vector it missed. The
/// snapshot therefore never claims an edit it does not hold.
pub struct Reconciler {
    snapshots: Arc<dyn SnapshotStore>,
    vectors: Arc<dyn VersionVectorStore>,
    edits: Arc<dyn EditStore>,
    /// Highest seq this process has finished applying, per
    /// `(doc, origin server)`. A fast path only; the authoritative
    /// duplicate check is row existence.
    last_processed: DashMap<(String, String), u64>,
}

impl Reconciler {
    pub fn new(
        snapshots: Arc<dyn SnapshotStore>,
        vectors: Arc<dyn VersionVectorStore>,
        edits: Arc<dyn EditStore>,
    ) -> Self {
        Self {
            snapshots,
            vectors,
            edits,
            last_processed: DashMap::new(),
        }
    }

    /// Apply one captured edit. Idempotent: replaying any prefix of
    /// the feed leaves the snapshot unchanged.
    pub async fn apply(&self, edit: &Edit) -> Result<ApplyOutcome> {
        let key = (edit.doc_id.clone(), edit.server_id.clone());
        let last = self.last_processed.get(&key).map(|entry| *entry).unwrap_or(0);

        if edit.seq <= last {
            debug!(doc_id = %edit.doc_id, seq = edit.seq, "already processed, skipping");
            return Ok(ApplyOutcome::Duplicate);
        }
        if edit.seq > last + 1 {
            // The capture pipeline should deliver contiguously per
            // origin; a jump means events were lost upstream of us.
            warn!(
                doc_id = %edit.doc_id,
                server_id = %edit.server_id,
                expected = last + 1,
                got = edit.seq,
                "sequence gap in change feed"
            );
        }

        let outcome = match edit.kind {
            EditKind::Insert => self.apply_insert(edit).await?,
            EditKind::Delete => self.apply_delete(edit).await?,
        };

        // Advanced on the duplicate path too: a redelivery after a
        // crash between row write and vector write lands here.
        self.vectors
            .advance(&edit.doc_id, &edit.server_id, edit.seq)
            .await
            .context("failed to advance version vector")?;
        self.edits
            .mark_applied(&edit.doc_id, &edit.server_id, edit.seq)
            .await
            .context("failed to mark edit applied")?;
        self.last_processed
            .entry(key)
            .and_modify(|seq| *seq = (*seq).max(edit.seq))
            .or_insert(edit.seq);

        Ok(outcome)
    }

    async fn apply_insert(&self, edit: &Edit) -> Result<ApplyOutcome> {
        let character = edit
            .character
            .context("insert edit without a character")?;
        let row = SnapshotRow::new(
            &edit.doc_id,
            &edit.position,
            character,
            &edit.server_id,
            edit.seq,
        );
        if self.snapshots.insert_row(row).await? {
            Ok(ApplyOutcome::Applied)
        } else {
            debug!(
                doc_id = %edit.doc_id,
                server_id = %edit.server_id,
                seq = edit.seq,
                "row already materialized"
            );
            Ok(ApplyOutcome::Duplicate)
        }
    }

    async fn apply_delete(&self, edit: &Edit) -> Result<ApplyOutcome> {
        // Deactivation is naturally idempotent: the second delivery
        // finds the row already inactive.
        if self
            .snapshots
            .deactivate_row(&edit.doc_id, &edit.position)
            .await?
        {
            Ok(ApplyOutcome::Applied)
        } else {
            debug!(
                doc_id = %edit.doc_id,
                position = %edit.position,
                "no active row at position, delete already applied"
            );
            Ok(ApplyOutcome::Duplicate)
        }
    }

    /// Current text of a document: its active rows in position order.
    pub async fn content(&self, doc_id: &str) -> Result<String> {
        let rows = self.snapshots.active_rows(doc_id).await?;
        Ok(rows.iter().filter_map(|row| row.character).collect())
    }

    /// The document's version vector.
    pub async fn vector(&self, doc_id: &str) -> Result<VersionVector> {
        self.vectors.vector(doc_id).await
    }

    /// Per-origin sequence ranges a client is missing relative to the
    /// snapshot.
    pub async fn missing(
        &self,
        doc_id: &str,
        client: &VersionVector,
    ) -> Result<BTreeMap<String, SeqRange>> {
        Ok(self.vector(doc_id).await?.missing_from(client))
    }

    /// Sequence ranges absent from the materialized rows of each
    /// origin, up to that origin's vector entry. Non-empty output
    /// means capture events were lost and the log must be replayed.
    pub async fn detect_gaps(&self, doc_id: &str) -> Result<BTreeMap<String, Vec<SeqRange>>> {
        let vector = self.vector(doc_id).await?;
        let mut gaps: BTreeMap<String, Vec<SeqRange>> = BTreeMap::new();
        for (server_id, highest) in vector.iter() {
            let rows = self.snapshots.rows_for_server(doc_id, server_id).await?;
            let mut expected = 1u64;
            let mut server_gaps = Vec::new();
            for row in &rows {
                if row.seq > expected {
                    server_gaps.push(SeqRange {
                        from: expected,
                        to: row.seq - 1,
                    });
                }
                expected = expected.max(row.seq + 1);
            }
            if expected <= highest {
                server_gaps.push(SeqRange {
                    from: expected,
                    to: highest,
                });
            }
            if !server_gaps.is_empty() {
                gaps.insert(server_id.to_string(), server_gaps);
            }
        }
        Ok(gaps)
    }

    /// Consume the change feed until it closes or `shutdown` fires.
    ///
    /// Acks only after a successful apply. A failed apply backs off
    /// and relies on redelivery; a malformed payload is acked and
    /// dropped so it cannot wedge the feed.
    pub async fn run(self: Arc<Self>, feed: Arc<dyn ChangeFeed>, shutdown: CancellationToken) {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("snapshot reconciler stopping");
                    return;
                }
                next = feed.next() => match next {
                    Ok(Some(event)) => event,
                    Ok(None) => {
                        info!("change feed closed, reconciler stopping");
                        return;
                    }
                    Err(error) => {
                        warn!(%error, "change feed read failed");
                        tokio::time::sleep(RETRY_BACKOFF).await;
                        continue;
                    }
                },
            };

            let edit: Edit = match serde_json::from_slice(&event.payload) {
                Ok(edit) => edit,
                Err(error) => {
                    warn!(offset = event.offset, %error, "dropping malformed capture event");
                    if let Err(error) = feed.ack(event.offset).await {
                        warn!(offset = event.offset, %error, "ack failed");
                    }
                    continue;
                }
            };

            match self.apply(&edit).await {
                Ok(outcome) => {
                    debug!(
                        doc_id = %edit.doc_id,
                        seq = edit.seq,
                        ?outcome,
                        "capture event processed"
                    );
                    if let Err(error) = feed.ack(event.offset).await {
                        warn!(offset = event.offset, %error, "ack failed");
                    }
                }
                Err(error) => {
                    warn!(
                        doc_id = %edit.doc_id,
                        seq = edit.seq,
                        %error,
                        "apply failed, leaving event unacked"
                    );
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
            }
        }
    }
}

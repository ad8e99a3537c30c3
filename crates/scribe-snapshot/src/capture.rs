//! Change capture at the edit-log seam.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use scribe_core::Edit;
use scribe_storage::EditStore;
use tracing::warn;

use crate::feed::MemoryFeedProducer;

/// An [`EditStore`] wrapper that emits every successfully appended
/// edit to a change feed, in append order.
///
/// This stands in for a database-level capture pipeline: the emit
/// happens after the append returns, so the feed only ever carries
/// durable edits. A crash between append and emit loses the feed
/// event, which the reconciler's gap detection surfaces later.
pub struct CapturedStore<S: EditStore> {
    inner: Arc<S>,
    producer: MemoryFeedProducer,
}

impl<S: EditStore> CapturedStore<S> {
    pub fn new(inner: Arc<S>, producer: MemoryFeedProducer) -> Self {
        Self { inner, producer }
    }

    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }
}

#[async_trait]
impl<S: EditStore> EditStore for CapturedStore<S> {
    async fn append_edits(&self, edits: &[Edit]) -> Result<()> {
        self.inner.append_edits(edits).await?;
        for edit in edits {
            match serde_json::to_vec(edit) {
                Ok(payload) => self.producer.push(payload),
                Err(error) => {
                    warn!(doc_id = %edit.doc_id, seq = edit.seq, %error, "capture emit failed");
                }
            }
        }
        Ok(())
    }

    async fn max_seq(&self, doc_id: &str, server_id: &str) -> Result<u64> {
        self.inner.max_seq(doc_id, server_id).await
    }

    async fn edits_in_range(
        &self,
        doc_id: &str,
        server_id: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<Edit>> {
        self.inner.edits_in_range(doc_id, server_id, from, to).await
    }

    async fn edits_for_doc(&self, doc_id: &str) -> Result<Vec<Edit>> {
        self.inner.edits_for_doc(doc_id).await
    }

    async fn mark_applied(&self, doc_id: &str, server_id: &str, seq: u64) -> Result<()> {
        self.inner.mark_applied(doc_id, server_id, seq).await
    }
}

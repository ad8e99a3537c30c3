//! Write-path batching for accepted edits.
//!
//! Sequenced edits land in a per-document buffer and are persisted in
//! batches, either when a buffer reaches the flush threshold or when
//! the background ticker fires. Persistence is the commit point:
//! fan-out to other instances happens only after a batch is durable,
//! and a failed batch is pushed back to the front of its buffer so no
//! accepted edit is dropped and order is preserved for the retry.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use dashmap::DashMap;
use scribe_core::Edit;
use scribe_core::constants::DEFAULT_FLUSH_INTERVAL_MS;
use scribe_core::constants::DEFAULT_FLUSH_THRESHOLD;
use scribe_pubsub::FanoutPublisher;
use scribe_storage::EditStore;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Buffer size that triggers an immediate flush.
    pub flush_threshold: usize,
    /// Ticker period for flushing partial buffers.
    pub flush_interval: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
        }
    }
}

impl BufferConfig {
    pub fn new(flush_threshold: usize, flush_interval: Duration) -> Self {
        assert!(flush_threshold > 0, "flush threshold must be positive");
        assert!(
            !flush_interval.is_zero(),
            "flush interval must be positive"
        );
        Self {
            flush_threshold,
            flush_interval,
        }
    }
}

/// One document's buffer. The pending lock is held only to push or
/// swap the batch out, never across storage writes; the flush lock
/// serializes flushes so retried batches keep log order.
#[derive(Default)]
struct DocBuffer {
    pending: Mutex<Vec<Edit>>,
    flushing: Mutex<()>,
}

/// Per-document edit batching in front of the durable log.
pub struct OperationBuffer {
    store: Arc<dyn EditStore>,
    publisher: FanoutPublisher,
    config: BufferConfig,
    buffers: DashMap<String, Arc<DocBuffer>>,
}

impl OperationBuffer {
    pub fn new(
        store: Arc<dyn EditStore>,
        publisher: FanoutPublisher,
        config: BufferConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            config,
            buffers: DashMap::new(),
        }
    }

    /// Buffer one accepted edit. Flushes inline when the document's
    /// buffer reaches the threshold; the flush error, if any, is the
    /// caller's to surface, with the batch pushed back for retry.
    pub async fn add(&self, edit: Edit) -> Result<()> {
        let doc_id = edit.doc_id.clone();
        let buffer = self.buffer_for(&doc_id);
        let reached_threshold = {
            let mut pending = buffer.pending.lock().await;
            pending.push(edit);
            pending.len() >= self.config.flush_threshold
        };
        if reached_threshold {
            self.flush_doc(&doc_id, &buffer).await?;
        }
        Ok(())
    }

    /// Flush one document's buffer now. Returns the number of edits
    /// persisted.
    pub async fn flush(&self, doc_id: &str) -> Result<usize> {
        let Some(buffer) = self.buffers.get(doc_id).map(|entry| entry.value().clone()) else {
            return Ok(0);
        };
        self.flush_doc(doc_id, &buffer).await
    }

    /// Flush every document. Attempts all buffers even when some
    /// fail; used on the ticker and during graceful shutdown.
    pub async fn flush_all(&self) -> Result<usize> {
        let doc_ids: Vec<String> = self.buffers.iter().map(|entry| entry.key().clone()).collect();
        let mut flushed = 0usize;
        let mut failed = 0usize;
        for doc_id in doc_ids {
            match self.flush(&doc_id).await {
                Ok(count) => flushed += count,
                Err(error) => {
                    failed += 1;
                    warn!(doc_id = %doc_id, %error, "flush failed, batch retained");
                }
            }
        }
        anyhow::ensure!(failed == 0, "{failed} document buffer(s) failed to flush");
        Ok(flushed)
    }

    /// Number of buffered, not-yet-durable edits for a document.
    pub async fn pending_len(&self, doc_id: &str) -> usize {
        match self.buffers.get(doc_id).map(|entry| entry.value().clone()) {
            Some(buffer) => buffer.pending.lock().await.len(),
            None => 0,
        }
    }

    /// Periodic flushing until `shutdown` fires, then one final drain.
    pub fn spawn_ticker(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.flush_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        if let Err(error) = self.flush_all().await {
                            warn!(%error, "final flush incomplete at shutdown");
                        }
                        info!("operation buffer ticker stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        // Errors are logged per document inside flush_all;
                        // retained batches go around again next tick.
                        let _ = self.flush_all().await;
                    }
                }
            }
        })
    }

    fn buffer_for(&self, doc_id: &str) -> Arc<DocBuffer> {
        self.buffers
            .entry(doc_id.to_string())
            .or_default()
            .clone()
    }

    /// Swap the batch out under the pending lock, release it, then
    /// persist and publish. Concurrent adds land in the fresh buffer
    /// without waiting on the store.
    async fn flush_doc(&self, doc_id: &str, buffer: &DocBuffer) -> Result<usize> {
        let _ordering = buffer.flushing.lock().await;
        let batch = std::mem::take(&mut *buffer.pending.lock().await);
        if batch.is_empty() {
            return Ok(0);
        }
        let batch_len = batch.len();

        if let Err(error) = self.store.append_edits(&batch).await {
            buffer.pending.lock().await.splice(0..0, batch);
            warn!(doc_id, batch_len, %error, "batch persist failed, pushed back");
            return Err(error);
        }

        // Durable from here on. Publish failures are logged only:
        // reconciliation repairs any missed fan-out from the log.
        for edit in &batch {
            if let Err(error) = self.publisher.publish_edit(edit).await {
                warn!(doc_id, seq = edit.seq, %error, "fan-out publish failed");
            }
        }
        debug!(doc_id, batch_len, "flushed edit batch");
        Ok(batch_len)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use scribe_pubsub::EditBus;
    use scribe_pubsub::MemoryBus;
    use scribe_storage::MemoryStore;

    use super::*;

    fn publisher(bus: &Arc<MemoryBus>) -> FanoutPublisher {
        FanoutPublisher::new(Arc::clone(bus) as Arc<dyn EditBus>)
    }

    fn edit(seq: u64) -> Edit {
        Edit::insert("doc-1", "user-1", "server-a", 'x', format!("m{seq}"), seq)
    }

    #[tokio::test]
    async fn reaching_the_threshold_flushes() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(MemoryBus::default());
        let buffer = OperationBuffer::new(
            store.clone(),
            publisher(&bus),
            BufferConfig::new(2, Duration::from_secs(60)),
        );

        buffer.add(edit(1)).await.unwrap();
        assert_eq!(buffer.pending_len("doc-1").await, 1);
        assert!(store.edits_for_doc("doc-1").await.unwrap().is_empty());

        buffer.add(edit(2)).await.unwrap();
        assert_eq!(buffer.pending_len("doc-1").await, 0);
        assert_eq!(store.edits_for_doc("doc-1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn explicit_flush_drains_a_partial_buffer() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(MemoryBus::default());
        let buffer = OperationBuffer::new(
            store.clone(),
            publisher(&bus),
            BufferConfig::new(50, Duration::from_secs(60)),
        );

        buffer.add(edit(1)).await.unwrap();
        assert_eq!(buffer.flush("doc-1").await.unwrap(), 1);
        assert_eq!(buffer.pending_len("doc-1").await, 0);
        assert_eq!(store.edits_for_doc("doc-1").await.unwrap().len(), 1);

        assert_eq!(buffer.flush("doc-1").await.unwrap(), 0);
        assert_eq!(buffer.flush("doc-absent").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn published_only_after_persisted_and_in_order() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(MemoryBus::default());
        let mut received = bus.subscribe();
        let buffer = OperationBuffer::new(
            store.clone(),
            publisher(&bus),
            BufferConfig::new(3, Duration::from_secs(60)),
        );

        for seq in 1..=3 {
            buffer.add(edit(seq)).await.unwrap();
        }

        for expected_seq in 1..=3u64 {
            let message = received.recv().await.unwrap();
            let published: Edit = serde_json::from_slice(&message.payload).unwrap();
            assert_eq!(published.seq, expected_seq);
        }
        assert_eq!(store.edits_for_doc("doc-1").await.unwrap().len(), 3);
    }

    /// Fails the first `failures` appends, then delegates to a real
    /// in-memory store.
    struct FlakyStore {
        inner: MemoryStore,
        remaining_failures: SyncMutex<usize>,
    }

    #[async_trait]
    impl EditStore for FlakyStore {
        async fn append_edits(&self, edits: &[Edit]) -> Result<()> {
            {
                let mut remaining = self.remaining_failures.lock();
                if *remaining > 0 {
                    *remaining -= 1;
                    anyhow::bail!("log unavailable");
                }
            }
            self.inner.append_edits(edits).await
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

    #[tokio::test]
    async fn failed_batch_is_pushed_back_and_retried_in_order() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            remaining_failures: SyncMutex::new(1),
        });
        let bus = Arc::new(MemoryBus::default());
        let buffer = OperationBuffer::new(
            store.clone(),
            publisher(&bus),
            BufferConfig::new(2, Duration::from_secs(60)),
        );

        buffer.add(edit(1)).await.unwrap();
        assert!(buffer.add(edit(2)).await.is_err());
        assert_eq!(buffer.pending_len("doc-1").await, 2);
        assert!(store.inner.edits_for_doc("doc-1").await.unwrap().is_empty());

        assert_eq!(buffer.flush("doc-1").await.unwrap(), 2);
        let persisted = store.inner.edits_for_doc("doc-1").await.unwrap();
        assert_eq!(persisted.len(), 2);
        assert_eq!(persisted[0].seq, 1);
        assert_eq!(persisted[1].seq, 2);
    }

    /// Blocks inside `append_edits` until released, so tests can
    /// observe the buffer while a flush is in flight.
    struct GatedStore {
        inner: MemoryStore,
        entered: tokio::sync::Semaphore,
        release: tokio::sync::Semaphore,
    }

    #[async_trait]
    impl EditStore for GatedStore {
        async fn append_edits(&self, edits: &[Edit]) -> Result<()> {
            self.entered.add_permits(1);
            self.release.acquire().await.unwrap().forget();
            self.inner.append_edits(edits).await
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

    #[tokio::test]
    async fn adds_are_not_blocked_behind_a_slow_flush() {
        let store = Arc::new(GatedStore {
            inner: MemoryStore::new(),
            entered: tokio::sync::Semaphore::new(0),
            release: tokio::sync::Semaphore::new(0),
        });
        let bus = Arc::new(MemoryBus::default());
        let buffer = Arc::new(OperationBuffer::new(
            store.clone(),
            publisher(&bus),
            BufferConfig::new(2, Duration::from_secs(60)),
        ));

        let flusher = tokio::spawn({
            let buffer = Arc::clone(&buffer);
            async move {
                buffer.add(edit(1)).await.unwrap();
                buffer.add(edit(2)).await.unwrap();
            }
        });
        // The threshold flush is now stuck inside the store write.
        store.entered.acquire().await.unwrap().forget();

        // A concurrent add on the same document completes immediately.
        tokio::time::timeout(Duration::from_millis(100), buffer.add(edit(3)))
            .await
            .expect("add blocked behind an in-flight flush")
            .unwrap();
        assert_eq!(buffer.pending_len("doc-1").await, 1);

        store.release.add_permits(1);
        flusher.await.unwrap();

        store.release.add_permits(1);
        assert_eq!(buffer.flush("doc-1").await.unwrap(), 1);
        let persisted = store.inner.edits_for_doc("doc-1").await.unwrap();
        assert_eq!(persisted.len(), 3);
        assert_eq!(persisted[2].seq, 3);
    }

    #[tokio::test]
    async fn ticker_flushes_partial_buffers() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(MemoryBus::default());
        let buffer = Arc::new(OperationBuffer::new(
            store.clone(),
            publisher(&bus),
            BufferConfig::new(50, Duration::from_millis(20)),
        ));

        let shutdown = CancellationToken::new();
        let ticker = Arc::clone(&buffer).spawn_ticker(shutdown.clone());

        buffer.add(edit(1)).await.unwrap();
        for _ in 0..100 {
            if buffer.pending_len("doc-1").await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(store.edits_for_doc("doc-1").await.unwrap().len(), 1);

        shutdown.cancel();
        ticker.await.unwrap();
    }
}

//! In-memory storage backend.

use std::collections::BTreeMap;
use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use scribe_core::DocumentMeta;
use scribe_core::Edit;
use scribe_core::SnapshotRow;
use scribe_core::VersionVector;

use crate::DocumentDirectory;
use crate::EditStore;
use crate::SnapshotStore;
use crate::VersionVectorStore;

#[derive(Default)]
struct Inner {
    /// (doc, server) -> seq -> edit. BTreeMap keeps range queries ordered.
    edits: HashMap<(String, String), BTreeMap<u64, Edit>>,
    /// doc -> rows in insertion order.
    rows: HashMap<String, Vec<SnapshotRow>>,
    /// doc -> vector.
    vectors: HashMap<String, VersionVector>,
    /// doc -> metadata.
    documents: HashMap<String, DocumentMeta>,
}

/// In-memory implementation of every storage trait.
///
/// Backs tests and single-node development. All operations take a
/// short process-local lock; nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document into the directory (test/composition helper;
    /// in production the metadata service owns this data).
    pub fn put_document(&self, meta: DocumentMeta) {
        self.inner.write().documents.insert(meta.doc_id.clone(), meta);
    }
}

#[async_trait]
impl EditStore for MemoryStore {
    async fn append_edits(&self, edits: &[Edit]) -> Result<()> {
        let mut inner = self.inner.write();
        for edit in edits {
            inner
                .edits
                .entry((edit.doc_id.clone(), edit.server_id.clone()))
                .or_default()
                .insert(edit.seq, edit.clone());
        }
        Ok(())
    }

    async fn max_seq(&self, doc_id: &str, server_id: &str) -> Result<u64> {
        let inner = self.inner.read();
        Ok(inner
            .edits
            .get(&(doc_id.to_string(), server_id.to_string()))
            .and_then(|log| log.keys().next_back().copied())
            .unwrap_or(0))
    }

    async fn edits_in_range(
        &self,
        doc_id: &str,
        server_id: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<Edit>> {
        let inner = self.inner.read();
        Ok(inner
            .edits
            .get(&(doc_id.to_string(), server_id.to_string()))
            .map(|log| log.range(from..=to).map(|(_, edit)| edit.clone()).collect())
            .unwrap_or_default())
    }

    async fn edits_for_doc(&self, doc_id: &str) -> Result<Vec<Edit>> {
        let inner = self.inner.read();
        let mut edits: Vec<Edit> = inner
            .edits
            .iter()
            .filter(|((doc, _), _)| doc == doc_id)
            .flat_map(|(_, log)| log.values().cloned())
            .collect();
        edits.sort_by_key(|edit| (edit.created_at_ms, edit.seq));
        Ok(edits)
    }

    async fn mark_applied(&self, doc_id: &str, server_id: &str, seq: u64) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(edit) = inner
            .edits
            .get_mut(&(doc_id.to_string(), server_id.to_string()))
            .and_then(|log| log.get_mut(&seq))
        {
            edit.applied = true;
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn insert_row(&self, row: SnapshotRow) -> Result<bool> {
        let mut inner = self.inner.write();
        let rows = inner.rows.entry(row.doc_id.clone()).or_default();
        let exists = rows
            .iter()
            .any(|existing| existing.server_id == row.server_id && existing.seq == row.seq);
        if exists {
            return Ok(false);
        }
        rows.push(row);
        Ok(true)
    }

    async fn deactivate_row(&self, doc_id: &str, position: &str) -> Result<bool> {
        let mut inner = self.inner.write();
        if let Some(rows) = inner.rows.get_mut(doc_id) {
            if let Some(row) = rows
                .iter_mut()
                .find(|row| row.position == position && row.active)
            {
                row.active = false;
                row.character = None;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn active_rows(&self, doc_id: &str) -> Result<Vec<SnapshotRow>> {
        let inner = self.inner.read();
        let mut rows: Vec<SnapshotRow> = inner
            .rows
            .get(doc_id)
            .map(|rows| rows.iter().filter(|row| row.active).cloned().collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| a.position.cmp(&b.position));
        Ok(rows)
    }

    async fn rows_for_server(&self, doc_id: &str, server_id: &str) -> Result<Vec<SnapshotRow>> {
        let inner = self.inner.read();
        let mut rows: Vec<SnapshotRow> = inner
            .rows
            .get(doc_id)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row.server_id == server_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by_key(|row| row.seq);
        Ok(rows)
    }

    async fn row_exists(&self, doc_id: &str, server_id: &str, seq: u64) -> Result<bool> {
        let inner = self.inner.read();
        Ok(inner
            .rows
            .get(doc_id)
            .map(|rows| {
                rows.iter()
                    .any(|row| row.server_id == server_id && row.seq == seq)
            })
            .unwrap_or(false))
    }
}

#[async_trait]
impl VersionVectorStore for MemoryStore {
    async fn advance(&self, doc_id: &str, server_id: &str, seq: u64) -> Result<()> {
        let mut inner = self.inner.write();
        inner
            .vectors
            .entry(doc_id.to_string())
            .or_default()
            .observe(server_id, seq);
        Ok(())
    }

    async fn vector(&self, doc_id: &str) -> Result<VersionVector> {
        let inner = self.inner.read();
        Ok(inner.vectors.get(doc_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl DocumentDirectory for MemoryStore {
    async fn get(&self, doc_id: &str) -> Result<Option<DocumentMeta>> {
        let inner = self.inner.read();
        Ok(inner.documents.get(doc_id).cloned())
    }
}

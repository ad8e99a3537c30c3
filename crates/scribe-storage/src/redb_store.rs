//! Durable storage backend on redb.
//!
//! One database file per node holds four tables:
//!
//! - `edit_log`: `(doc, server, seq) -> Edit` — the append-only
//!   operation log, range-queryable per origin.
//! - `snapshot_rows`: `(doc, position, server, seq) -> SnapshotRow` —
//!   key order doubles as position order for content reads.
//! - `row_provenance`: `(doc, server, seq) -> position` — secondary
//!   index for idempotence checks and per-origin gap scans.
//! - `version_vectors`: `(doc, server) -> seq`.
//! - `documents`: `doc -> DocumentMeta` (read-mostly mirror of the
//!   external metadata service).

use std::path::Path;
use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use redb::Database;
use redb::ReadableTable;
use redb::TableDefinition;
use scribe_core::DocumentMeta;
use scribe_core::Edit;
use scribe_core::SnapshotRow;
use scribe_core::VersionVector;
use snafu::ResultExt;
use snafu::Snafu;

use crate::DocumentDirectory;
use crate::EditStore;
use crate::SnapshotStore;
use crate::VersionVectorStore;

const EDIT_LOG: TableDefinition<(&str, &str, u64), &[u8]> = TableDefinition::new("edit_log");
const SNAPSHOT_ROWS: TableDefinition<(&str, &str, &str, u64), &[u8]> =
    TableDefinition::new("snapshot_rows");
const ROW_PROVENANCE: TableDefinition<(&str, &str, u64), &str> =
    TableDefinition::new("row_provenance");
const VERSION_VECTORS: TableDefinition<(&str, &str), u64> = TableDefinition::new("version_vectors");
const DOCUMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("documents");

/// Durable implementation of the storage traits, backed by redb.
pub struct RedbStore {
    db: Database,
    path: PathBuf,
}

impl RedbStore {
    /// Create or open a store at the given path.
    ///
    /// Creates the parent directory and all tables if missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RedbStoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirectorySnafu { path: parent })?;
        }

        let db = Database::create(&path).context(OpenDatabaseSnafu { path: &path })?;

        let write_txn = db.begin_write().context(BeginWriteSnafu)?;
        {
            write_txn.open_table(EDIT_LOG).context(OpenTableSnafu)?;
            write_txn.open_table(SNAPSHOT_ROWS).context(OpenTableSnafu)?;
            write_txn.open_table(ROW_PROVENANCE).context(OpenTableSnafu)?;
            write_txn.open_table(VERSION_VECTORS).context(OpenTableSnafu)?;
            write_txn.open_table(DOCUMENTS).context(OpenTableSnafu)?;
        }
        write_txn.commit().context(CommitSnafu)?;

        Ok(Self { db, path })
    }

    /// Path of the underlying database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Seed a document into the directory table.
    pub fn put_document(&self, meta: &DocumentMeta) -> Result<(), RedbStoreError> {
        let write_txn = self.db.begin_write().context(BeginWriteSnafu)?;
        {
            let mut table = write_txn.open_table(DOCUMENTS).context(OpenTableSnafu)?;
            let serialized = serde_json::to_vec(meta).context(SerializeSnafu)?;
            table
                .insert(meta.doc_id.as_str(), serialized.as_slice())
                .context(WriteSnafu)?;
        }
        write_txn.commit().context(CommitSnafu)?;
        Ok(())
    }
}

#[async_trait]
impl EditStore for RedbStore {
    async fn append_edits(&self, edits: &[Edit]) -> Result<()> {
        let write_txn = self.db.begin_write().context(BeginWriteSnafu)?;
        {
            let mut table = write_txn.open_table(EDIT_LOG).context(OpenTableSnafu)?;
            for edit in edits {
                let serialized = serde_json::to_vec(edit).context(SerializeSnafu)?;
                table
                    .insert(
                        (edit.doc_id.as_str(), edit.server_id.as_str(), edit.seq),
                        serialized.as_slice(),
                    )
                    .context(WriteSnafu)?;
            }
        }
        write_txn.commit().context(CommitSnafu)?;
        Ok(())
    }

    async fn max_seq(&self, doc_id: &str, server_id: &str) -> Result<u64> {
        let read_txn = self.db.begin_read().context(BeginReadSnafu)?;
        let table = read_txn.open_table(EDIT_LOG).context(OpenTableSnafu)?;

        let mut max = 0;
        let range = table
            .range((doc_id, server_id, 0)..=(doc_id, server_id, u64::MAX))
            .context(ReadSnafu)?;
        for item in range {
            let (key, _) = item.context(ReadSnafu)?;
            max = key.value().2;
        }
        Ok(max)
    }

    async fn edits_in_range(
        &self,
        doc_id: &str,
        server_id: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<Edit>> {
        let read_txn = self.db.begin_read().context(BeginReadSnafu)?;
        let table = read_txn.open_table(EDIT_LOG).context(OpenTableSnafu)?;

        let mut edits = Vec::new();
        let range = table
            .range((doc_id, server_id, from)..=(doc_id, server_id, to))
            .context(ReadSnafu)?;
        for item in range {
            let (_, value) = item.context(ReadSnafu)?;
            let edit: Edit = serde_json::from_slice(value.value()).context(DeserializeSnafu)?;
            edits.push(edit);
        }
        Ok(edits)
    }

    async fn edits_for_doc(&self, doc_id: &str) -> Result<Vec<Edit>> {
        let read_txn = self.db.begin_read().context(BeginReadSnafu)?;
        let table = read_txn.open_table(EDIT_LOG).context(OpenTableSnafu)?;

        let mut edits = Vec::new();
        let range = table.range((doc_id, "", 0)..).context(ReadSnafu)?;
        for item in range {
            let (key, value) = item.context(ReadSnafu)?;
            if key.value().0 != doc_id {
                break;
            }
            let edit: Edit = serde_json::from_slice(value.value()).context(DeserializeSnafu)?;
            edits.push(edit);
        }
        edits.sort_by_key(|edit| (edit.created_at_ms, edit.seq));
        Ok(edits)
    }

    async fn mark_applied(&self, doc_id: &str, server_id: &str, seq: u64) -> Result<()> {
        let write_txn = self.db.begin_write().context(BeginWriteSnafu)?;
        {
            let mut table = write_txn.open_table(EDIT_LOG).context(OpenTableSnafu)?;
            let existing = table
                .get((doc_id, server_id, seq))
                .context(ReadSnafu)?
                .map(|value| value.value().to_vec());
            // Unknown edits have nothing to flag.
            if let Some(existing) = existing {
                let mut edit: Edit = serde_json::from_slice(&existing).context(DeserializeSnafu)?;
                edit.applied = true;
                let serialized = serde_json::to_vec(&edit).context(SerializeSnafu)?;
                table
                    .insert((doc_id, server_id, seq), serialized.as_slice())
                    .context(WriteSnafu)?;
            }
        }
        write_txn.commit().context(CommitSnafu)?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for RedbStore {
    async fn insert_row(&self, row: SnapshotRow) -> Result<bool> {
        let write_txn = self.db.begin_write().context(BeginWriteSnafu)?;
        let inserted = {
            let mut provenance = write_txn
                .open_table(ROW_PROVENANCE)
                .context(OpenTableSnafu)?;
            let key = (row.doc_id.as_str(), row.server_id.as_str(), row.seq);
            if provenance.get(key).context(ReadSnafu)?.is_some() {
                false
            } else {
                provenance
                    .insert(key, row.position.as_str())
                    .context(WriteSnafu)?;
                let mut rows = write_txn.open_table(SNAPSHOT_ROWS).context(OpenTableSnafu)?;
                let serialized = serde_json::to_vec(&row).context(SerializeSnafu)?;
                rows.insert(
                    (
                        row.doc_id.as_str(),
                        row.position.as_str(),
                        row.server_id.as_str(),
                        row.seq,
                    ),
                    serialized.as_slice(),
                )
                .context(WriteSnafu)?;
                true
            }
        };
        write_txn.commit().context(CommitSnafu)?;
        Ok(inserted)
    }

    async fn deactivate_row(&self, doc_id: &str, position: &str) -> Result<bool> {
        let write_txn = self.db.begin_write().context(BeginWriteSnafu)?;
        let deactivated = {
            let mut table = write_txn.open_table(SNAPSHOT_ROWS).context(OpenTableSnafu)?;

            // Find the first still-active row at this position.
            let mut target: Option<(String, u64, SnapshotRow)> = None;
            {
                let range = table
                    .range((doc_id, position, "", 0)..)
                    .context(ReadSnafu)?;
                for item in range {
                    let (key, value) = item.context(ReadSnafu)?;
                    let (key_doc, key_position, key_server, key_seq) = key.value();
                    if key_doc != doc_id || key_position != position {
                        break;
                    }
                    let row: SnapshotRow =
                        serde_json::from_slice(value.value()).context(DeserializeSnafu)?;
                    if row.active {
                        target = Some((key_server.to_string(), key_seq, row));
                        break;
                    }
                }
            }

            match target {
                Some((server_id, seq, mut row)) => {
                    row.active = false;
                    row.character = None;
                    let serialized = serde_json::to_vec(&row).context(SerializeSnafu)?;
                    table
                        .insert(
                            (doc_id, position, server_id.as_str(), seq),
                            serialized.as_slice(),
                        )
                        .context(WriteSnafu)?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit().context(CommitSnafu)?;
        Ok(deactivated)
    }

    async fn active_rows(&self, doc_id: &str) -> Result<Vec<SnapshotRow>> {
        let read_txn = self.db.begin_read().context(BeginReadSnafu)?;
        let table = read_txn.open_table(SNAPSHOT_ROWS).context(OpenTableSnafu)?;

        let mut rows = Vec::new();
        let range = table.range((doc_id, "", "", 0)..).context(ReadSnafu)?;
        for item in range {
            let (key, value) = item.context(ReadSnafu)?;
            if key.value().0 != doc_id {
                break;
            }
            let row: SnapshotRow = serde_json::from_slice(value.value()).context(DeserializeSnafu)?;
            if row.active {
                rows.push(row);
            }
        }
        // Key order is position order already.
        Ok(rows)
    }

    async fn rows_for_server(&self, doc_id: &str, server_id: &str) -> Result<Vec<SnapshotRow>> {
        let read_txn = self.db.begin_read().context(BeginReadSnafu)?;
        let table = read_txn.open_table(SNAPSHOT_ROWS).context(OpenTableSnafu)?;

        let mut rows = Vec::new();
        let range = table.range((doc_id, "", "", 0)..).context(ReadSnafu)?;
        for item in range {
            let (key, value) = item.context(ReadSnafu)?;
            if key.value().0 != doc_id {
                break;
            }
            if key.value().2 != server_id {
                continue;
            }
            let row: SnapshotRow = serde_json::from_slice(value.value()).context(DeserializeSnafu)?;
            rows.push(row);
        }
        rows.sort_by_key(|row| row.seq);
        Ok(rows)
    }

    async fn row_exists(&self, doc_id: &str, server_id: &str, seq: u64) -> Result<bool> {
        let read_txn = self.db.begin_read().context(BeginReadSnafu)?;
        let table = read_txn
            .open_table(ROW_PROVENANCE)
            .context(OpenTableSnafu)?;
        Ok(table
            .get((doc_id, server_id, seq))
            .context(ReadSnafu)?
            .is_some())
    }
}

#[async_trait]
impl VersionVectorStore for RedbStore {
    async fn advance(&self, doc_id: &str, server_id: &str, seq: u64) -> Result<()> {
        let write_txn = self.db.begin_write().context(BeginWriteSnafu)?;
        {
            let mut table = write_txn
                .open_table(VERSION_VECTORS)
                .context(OpenTableSnafu)?;
            let current = table
                .get((doc_id, server_id))
                .context(ReadSnafu)?
                .map(|value| value.value())
                .unwrap_or(0);
            if seq > current {
                table.insert((doc_id, server_id), seq).context(WriteSnafu)?;
            }
        }
        write_txn.commit().context(CommitSnafu)?;
        Ok(())
    }

    async fn vector(&self, doc_id: &str) -> Result<VersionVector> {
        let read_txn = self.db.begin_read().context(BeginReadSnafu)?;
        let table = read_txn
            .open_table(VERSION_VECTORS)
            .context(OpenTableSnafu)?;

        let mut vector = VersionVector::new();
        let range = table.range((doc_id, "")..).context(ReadSnafu)?;
        for item in range {
            let (key, value) = item.context(ReadSnafu)?;
            let (key_doc, key_server) = key.value();
            if key_doc != doc_id {
                break;
            }
            vector.observe(key_server, value.value());
        }
        Ok(vector)
    }
}

#[async_trait]
impl DocumentDirectory for RedbStore {
    async fn get(&self, doc_id: &str) -> Result<Option<DocumentMeta>> {
        let read_txn = self.db.begin_read().context(BeginReadSnafu)?;
        let table = read_txn.open_table(DOCUMENTS).context(OpenTableSnafu)?;
        match table.get(doc_id).context(ReadSnafu)? {
            Some(value) => {
                let meta: DocumentMeta =
                    serde_json::from_slice(value.value()).context(DeserializeSnafu)?;
                Ok(Some(meta))
            }
            None => Ok(None),
        }
    }
}

/// Redb storage errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RedbStoreError {
    #[snafu(display("failed to create directory {}: {source}", path.display()))]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to open database at {}: {source}", path.display()))]
    OpenDatabase {
        path: PathBuf,
        #[snafu(source(from(redb::DatabaseError, Box::new)))]
        source: Box<redb::DatabaseError>,
    },

    #[snafu(display("failed to begin write transaction: {source}"))]
    BeginWrite {
        #[snafu(source(from(redb::TransactionError, Box::new)))]
        source: Box<redb::TransactionError>,
    },

    #[snafu(display("failed to begin read transaction: {source}"))]
    BeginRead {
        #[snafu(source(from(redb::TransactionError, Box::new)))]
        source: Box<redb::TransactionError>,
    },

    #[snafu(display("failed to open table: {source}"))]
    OpenTable {
        #[snafu(source(from(redb::TableError, Box::new)))]
        source: Box<redb::TableError>,
    },

    #[snafu(display("failed to commit transaction: {source}"))]
    Commit {
        #[snafu(source(from(redb::CommitError, Box::new)))]
        source: Box<redb::CommitError>,
    },

    #[snafu(display("table write failed: {source}"))]
    Write {
        #[snafu(source(from(redb::StorageError, Box::new)))]
        source: Box<redb::StorageError>,
    },

    #[snafu(display("table read failed: {source}"))]
    Read {
        #[snafu(source(from(redb::StorageError, Box::new)))]
        source: Box<redb::StorageError>,
    },

    #[snafu(display("failed to serialize value: {source}"))]
    Serialize { source: serde_json::Error },

    #[snafu(display("failed to deserialize stored value: {source}"))]
    Deserialize { source: serde_json::Error },
}

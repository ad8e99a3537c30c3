//! Storage contracts and backends for the edit log and the snapshot.
//!
//! The core exposes explicit typed read/write contracts instead of a
//! mapping layer: [`EditStore`] for the durable append-only operation
//! log, [`SnapshotStore`] and [`VersionVectorStore`] for the
//! materialized view, and [`DocumentDirectory`] for read-only document
//! metadata lookups.
//!
//! Two backends are provided:
//!
//! - [`MemoryStore`] — in-process maps, used by tests and single-node
//!   development setups.
//! - [`RedbStore`] — durable tables backed by redb, one file per node.
//!
//! Which backend a deployment uses is an adapter detail; everything
//! above this crate talks to the traits only.

mod memory;
mod redb_store;
mod traits;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;
pub use redb_store::RedbStoreError;
pub use traits::DocumentDirectory;
pub use traits::EditStore;
pub use traits::SnapshotStore;
pub use traits::VersionVectorStore;

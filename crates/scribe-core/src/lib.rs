//! Shared domain types for the scribe synchronization core.
//!
//! Every other crate in the workspace builds on the types defined here:
//!
//! - [`Edit`] — the unit of the per-document operation log
//! - [`VersionVector`] — per-origin highest-applied-sequence map
//! - [`SnapshotRow`] — one materialized character of a document
//! - [`DocumentMeta`] — read-only document metadata owned elsewhere
//!
//! The crate is deliberately free of I/O and async so that the storage,
//! pub/sub and session layers can all depend on it without pulling in a
//! runtime.

pub mod constants;
mod document;
mod edit;
mod snapshot;
mod time;
mod vector;

pub use document::DocumentMeta;
pub use edit::Edit;
pub use edit::EditKind;
pub use snapshot::SnapshotRow;
pub use time::now_unix_ms;
pub use vector::SeqRange;
pub use vector::VersionVector;

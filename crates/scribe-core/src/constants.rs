//! Workspace-wide constants.

/// Default operation-buffer size threshold before an immediate flush.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 50;

/// Default period of the background buffer flush ticker, in milliseconds.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 500;

/// Number of virtual positions each live instance contributes to the
/// consistent-hash ring.
pub const VIRTUAL_NODES_PER_INSTANCE: usize = 150;

/// Smallest character of the position-key alphabet (inclusive sentinel).
pub const MIN_POSITION_CHAR: char = 'a';

/// Largest character of the position-key alphabet (inclusive sentinel).
pub const MAX_POSITION_CHAR: char = 'z';

/// Per-document fan-out topic prefix. The full topic for a document is
/// `editor.doc.{doc_id}`.
pub const DOC_TOPIC_PREFIX: &str = "editor.doc.";

//! Snapshot reconciliation.
//!
//! Edits become durable in the operation log first; a change-capture
//! feed then replays each logged edit to the [`Reconciler`], which
//! materializes it into the per-character snapshot table and advances
//! the document's version vector. The feed is at-least-once, so every
//! application step is idempotent: the authoritative duplicate check
//! is the existence of a snapshot row with the same
//! `(doc, server, seq)` provenance.

mod capture;
mod feed;
mod reconciler;

pub use capture::CapturedStore;
pub use feed::ChangeFeed;
pub use feed::FeedEvent;
pub use feed::MemoryFeed;
pub use feed::MemoryFeedProducer;
pub use reconciler::ApplyOutcome;
pub use reconciler::Reconciler;

//! Cross-instance fan-out of persisted edits.
//!
//! The bridge decouples "edit is durable" from "edit is visible to a
//! remote collaborator": after the operation buffer persists a batch,
//! the [`FanoutPublisher`] serializes each edit to its per-document
//! topic on a shared [`EditBus`]; every instance (including the
//! publishing one) runs a [`FanoutSubscriber`] task that receives bus
//! messages and hands them to its local [`Delivery`] sink, which
//! forwards to locally-connected clients only.
//!
//! Delivery is asynchronous and at-least-once. Receivers tolerate
//! duplicates: snapshot application downstream is idempotent by
//! `(doc, server, seq)`.

mod bridge;
mod bus;
mod topic;

pub use bridge::Delivery;
pub use bridge::FanoutError;
pub use bridge::FanoutPublisher;
pub use bridge::FanoutSubscriber;
pub use bus::BusMessage;
pub use bus::EditBus;
pub use bus::MemoryBus;
pub use topic::doc_topic;

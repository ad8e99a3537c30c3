//! Ordering primitives for the synchronization core.
//!
//! - [`position`] generates fractional position keys strictly between
//!   two existing keys, with no renumbering of neighbors.
//! - [`Sequencer`] assigns per-(document, origin-server) monotonic
//!   sequence numbers, rehydrated lazily from the durable edit log.

pub mod position;
mod sequencer;

pub use position::PositionError;
pub use position::between;
pub use sequencer::Sequencer;

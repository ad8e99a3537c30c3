//! Synchronization core of a collaborative text editor: accepts
//! character edits over WebSocket sessions, sequences and persists
//! them, fans them out across instances, and reconciles the durable
//! log into per-document snapshots.

pub mod config;
pub mod server;
pub mod session;
pub mod state;

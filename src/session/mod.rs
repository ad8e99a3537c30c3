//! WebSocket session protocol.

mod handler;
mod message;
mod registry;

pub use handler::SessionHandler;
pub use message::ClientMessage;
pub use message::ServerMessage;
pub use registry::SessionRegistry;

//! WebSocket control channel
//!
//! Listeners request blocks and report cursor moves here and receive status
//! transitions back. Audio is fetched separately over HTTP by fingerprint.

pub mod handler;
pub mod messages;
pub mod processor;
pub mod state;

pub use handler::ws_handler;
pub use messages::{IncomingMessage, MessageRoute, OutgoingMessage};

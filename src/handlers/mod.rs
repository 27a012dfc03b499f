//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check endpoint
//! - `audio` - Synthesized audio by fingerprint
//! - `documents` - Document registration
//! - `stats` - Scheduler and usage counters
//! - `ws` - Listener control channel

pub mod api;
pub mod audio;
pub mod documents;
pub mod stats;
pub mod ws;

pub use ws::ws_handler;

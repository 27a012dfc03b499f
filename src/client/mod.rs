//! Listener-side buffering
//!
//! Decides when a listening client asks for more audio, how much, and how it
//! reacts to status transitions. Independent of the transport: commands
//! convert into control channel messages.

pub mod blocks;
pub mod controller;

pub use blocks::{BlockState, BlockTracker};
pub use controller::{BufferingConfig, ClientCommand, PlaybackController, PlaybackState};

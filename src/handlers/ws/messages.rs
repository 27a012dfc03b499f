//! Control channel message types
//!
//! JSON text frames tagged by `type`.

use serde::{Deserialize, Serialize};

use crate::core::fingerprint::AudioFormat;
use crate::core::scheduler::StatusUpdate;

/// Maximum number of block indices in one `synthesize` message
pub const MAX_BLOCK_INDICES: usize = 256;

/// Maximum length of document, model and voice identifiers
pub const MAX_ID_SIZE: usize = 256;

/// Accepted playback speed range
pub const SPEED_RANGE: std::ops::RangeInclusive<f32> = 0.25..=4.0;

// =============================================================================
// Incoming Messages (Client -> Server)
// =============================================================================

#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum IncomingMessage {
    /// First-message authentication for browser clients
    #[serde(rename = "auth")]
    Auth { token: String },

    /// Request a batch of blocks, nearest to the cursor first
    #[serde(rename = "synthesize")]
    Synthesize {
        document_id: String,
        block_indices: Vec<usize>,
        cursor: usize,
        model: String,
        voice: String,
        #[serde(default)]
        speed: Option<f32>,
        #[serde(default)]
        format: Option<AudioFormat>,
        #[serde(default)]
        sample_rate: Option<u32>,
    },

    /// Reading position changed; queued blocks outside the window are evicted
    #[serde(rename = "cursor_moved")]
    CursorMoved { document_id: String, cursor: usize },
}

// =============================================================================
// Outgoing Messages (Server -> Client)
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutgoingMessage {
    #[serde(rename = "ready")]
    Ready {
        connection_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },

    #[serde(rename = "authenticated")]
    Authenticated {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// Per-block state transition
    #[serde(rename = "status")]
    Status(StatusUpdate),

    /// Connection-level capacity problem; some blocks were not accepted
    #[serde(rename = "degraded")]
    Degraded {
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },

    /// Rejected frame; the connection stays open unless followed by a close
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl OutgoingMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        OutgoingMessage::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Routed to the socket sender task
#[derive(Debug)]
pub enum MessageRoute {
    Outgoing(OutgoingMessage),
    Close,
}

#[derive(Debug, PartialEq)]
pub enum ValidationError {
    TooManyBlocks { count: usize, max: usize },
    InvalidIdentifier { field: &'static str, size: usize, max: usize },
    InvalidSpeed(f32),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::TooManyBlocks { count, max } => {
                write!(f, "Too many block indices: {count} (max {max})")
            }
            ValidationError::InvalidIdentifier { field, size, max } => {
                write!(f, "Field '{field}' must be 1 to {max} bytes, got {size}")
            }
            ValidationError::InvalidSpeed(speed) => write!(
                f,
                "Speed {speed} is outside {}..={}",
                SPEED_RANGE.start(),
                SPEED_RANGE.end()
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

fn check_id(field: &'static str, value: &str) -> Result<(), ValidationError> {
    let size = value.len();
    if size == 0 || size > MAX_ID_SIZE {
        return Err(ValidationError::InvalidIdentifier {
            field,
            size,
            max: MAX_ID_SIZE,
        });
    }
    Ok(())
}

impl IncomingMessage {
    /// Reject oversized or malformed fields before they reach the scheduler
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            IncomingMessage::Synthesize {
                document_id,
                block_indices,
                model,
                voice,
                speed,
                ..
            } => {
                if block_indices.len() > MAX_BLOCK_INDICES {
                    return Err(ValidationError::TooManyBlocks {
                        count: block_indices.len(),
                        max: MAX_BLOCK_INDICES,
                    });
                }
                check_id("document_id", document_id)?;
                check_id("model", model)?;
                check_id("voice", voice)?;
                if let Some(speed) = speed
                    && !SPEED_RANGE.contains(speed)
                {
                    return Err(ValidationError::InvalidSpeed(*speed));
                }
            }
            IncomingMessage::CursorMoved { document_id, .. } => {
                check_id("document_id", document_id)?;
            }
            IncomingMessage::Auth { .. } => {}
        }
        Ok(())
    }
}

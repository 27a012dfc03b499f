use serde::{Deserialize, Serialize};

use crate::core::fingerprint::Fingerprint;

/// Lifecycle of one requested block as reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    Queued,
    Processing,
    Cached,
    Evicted,
    Error,
}

/// Whether an error affects one block or the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The block failed; the client may skip it or ask again.
    Transient,
    /// Nothing will succeed until the user acts (auth, quota, unknown document).
    Systemic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusError {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
}

impl StatusError {
    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn systemic(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Systemic,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_systemic(&self) -> bool {
        self.kind == ErrorKind::Systemic
    }
}

/// One status notification for `(document_id, block_idx)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub document_id: String,
    pub block_idx: usize,
    pub status: BlockStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StatusError>,
}

impl StatusUpdate {
    fn new(document_id: &str, block_idx: usize, status: BlockStatus) -> Self {
        Self {
            document_id: document_id.to_string(),
            block_idx,
            status,
            audio_ref: None,
            error: None,
        }
    }

    pub fn queued(document_id: &str, block_idx: usize) -> Self {
        Self::new(document_id, block_idx, BlockStatus::Queued)
    }

    pub fn processing(document_id: &str, block_idx: usize) -> Self {
        Self::new(document_id, block_idx, BlockStatus::Processing)
    }

    pub fn evicted(document_id: &str, block_idx: usize) -> Self {
        Self::new(document_id, block_idx, BlockStatus::Evicted)
    }

    pub fn cached(document_id: &str, block_idx: usize, fingerprint: &Fingerprint) -> Self {
        Self {
            audio_ref: Some(fingerprint.audio_ref()),
            ..Self::new(document_id, block_idx, BlockStatus::Cached)
        }
    }

    pub fn error(document_id: &str, block_idx: usize, error: StatusError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(document_id, block_idx, BlockStatus::Error)
        }
    }
}

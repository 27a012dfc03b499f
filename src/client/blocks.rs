use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::core::scheduler::{BlockStatus, StatusError, StatusUpdate};

/// Client view of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Pending,
    Queued,
    Processing,
    Cached,
    Evicted,
    Error,
}

impl std::fmt::Display for BlockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockState::Pending => write!(f, "pending"),
            BlockState::Queued => write!(f, "queued"),
            BlockState::Processing => write!(f, "processing"),
            BlockState::Cached => write!(f, "cached"),
            BlockState::Evicted => write!(f, "evicted"),
            BlockState::Error => write!(f, "error"),
        }
    }
}

impl BlockState {
    /// Audio exists or is on its way.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            BlockState::Queued | BlockState::Processing | BlockState::Cached
        )
    }

    /// Waiting on the server.
    pub fn is_outstanding(&self) -> bool {
        matches!(self, BlockState::Queued | BlockState::Processing)
    }

    /// May be asked for again by the next batch.
    pub fn is_requestable(&self) -> bool {
        matches!(self, BlockState::Pending | BlockState::Evicted)
    }
}

impl From<BlockStatus> for BlockState {
    fn from(status: BlockStatus) -> Self {
        match status {
            BlockStatus::Queued => BlockState::Queued,
            BlockStatus::Processing => BlockState::Processing,
            BlockStatus::Cached => BlockState::Cached,
            BlockStatus::Evicted => BlockState::Evicted,
            BlockStatus::Error => BlockState::Error,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlockEntry {
    pub state: BlockState,
    pub audio_ref: Option<String>,
    pub error: Option<StatusError>,
    /// Last request or status for this block
    pub updated_at: Instant,
}

/// Per-block states for one document. Blocks never seen are `Pending`.
#[derive(Debug, Default)]
pub struct BlockTracker {
    entries: BTreeMap<usize, BlockEntry>,
}

impl BlockTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, index: usize) -> BlockState {
        self.entries
            .get(&index)
            .map(|entry| entry.state)
            .unwrap_or(BlockState::Pending)
    }

    pub fn entry(&self, index: usize) -> Option<&BlockEntry> {
        self.entries.get(&index)
    }

    pub fn audio_ref(&self, index: usize) -> Option<&str> {
        self.entries
            .get(&index)
            .and_then(|entry| entry.audio_ref.as_deref())
    }

    /// Mark blocks as sent. Cached blocks are left alone.
    pub fn mark_requested(&mut self, indices: &[usize], now: Instant) {
        for &index in indices {
            let entry = self.entries.entry(index).or_insert(BlockEntry {
                state: BlockState::Pending,
                audio_ref: None,
                error: None,
                updated_at: now,
            });
            if entry.state != BlockState::Cached {
                entry.state = BlockState::Queued;
                entry.error = None;
                entry.updated_at = now;
            }
        }
    }

    /// Apply a server status. `cached` is sticky: a late `queued` or
    /// `evicted` for a block whose audio already arrived is ignored.
    pub fn apply(&mut self, update: &StatusUpdate, now: Instant) -> BlockState {
        let next = BlockState::from(update.status);
        let entry = self.entries.entry(update.block_idx).or_insert(BlockEntry {
            state: BlockState::Pending,
            audio_ref: None,
            error: None,
            updated_at: now,
        });
        if entry.state == BlockState::Cached && next != BlockState::Cached {
            return entry.state;
        }
        entry.state = next;
        entry.updated_at = now;
        if let Some(audio_ref) = &update.audio_ref {
            entry.audio_ref = Some(audio_ref.clone());
        }
        entry.error = update.error.clone();
        next
    }

    /// Mark outstanding blocks outside `[start, end]` as evicted ahead of the
    /// server's confirmation.
    pub fn evict_outside(&mut self, start: usize, end: usize, now: Instant) -> usize {
        let mut evicted = 0;
        for (index, entry) in self.entries.iter_mut() {
            if (*index < start || *index > end) && entry.state == BlockState::Queued {
                entry.state = BlockState::Evicted;
                entry.updated_at = now;
                evicted += 1;
            }
        }
        evicted
    }

    /// Drop cached audio that could not be fetched so the block is asked for
    /// again. Returns whether the block was cached.
    pub fn forget_audio(&mut self, index: usize, now: Instant) -> bool {
        match self.entries.get_mut(&index) {
            Some(entry) if entry.state == BlockState::Cached => {
                entry.state = BlockState::Pending;
                entry.audio_ref = None;
                entry.updated_at = now;
                true
            }
            _ => false,
        }
    }

    /// Make failed blocks in `range` requestable again.
    pub fn reset_errors(&mut self, range: std::ops::Range<usize>) {
        for (_, entry) in self.entries.range_mut(range) {
            if entry.state == BlockState::Error {
                entry.state = BlockState::Pending;
                entry.error = None;
            }
        }
    }

    /// Cached blocks playable back to back from `cursor`. Failed blocks are
    /// skipped during playback so they do not break the run.
    pub fn cached_run(&self, cursor: usize, end: usize) -> usize {
        let mut run = 0;
        for index in cursor..end {
            match self.state(index) {
                BlockState::Cached => run += 1,
                BlockState::Error => continue,
                _ => break,
            }
        }
        run
    }

    /// Blocks in `range` that are cached, queued or processing.
    pub fn live_count(&self, range: std::ops::Range<usize>) -> usize {
        self.entries
            .range(range)
            .filter(|(_, entry)| entry.state.is_live())
            .count()
    }

    /// Up to `limit` requestable indices in `range`, in order.
    pub fn requestable(&self, range: std::ops::Range<usize>, limit: usize) -> Vec<usize> {
        range
            .filter(|&index| self.state(index).is_requestable())
            .take(limit)
            .collect()
    }

    /// Outstanding blocks in `range` that have heard nothing for `timeout`.
    pub fn stale_outstanding(
        &self,
        range: std::ops::Range<usize>,
        now: Instant,
        timeout: Duration,
    ) -> Vec<usize> {
        self.entries
            .range(range)
            .filter(|(_, entry)| {
                entry.state.is_outstanding()
                    && now.saturating_duration_since(entry.updated_at) >= timeout
            })
            .map(|(index, _)| *index)
            .collect()
    }

    /// Outstanding blocks in `range`, for re-sending after a reconnect.
    pub fn outstanding(&self, range: std::ops::Range<usize>) -> Vec<usize> {
        self.entries
            .range(range)
            .filter(|(_, entry)| entry.state.is_outstanding())
            .map(|(index, _)| *index)
            .collect()
    }
}

//! Playback buffering state machine
//!
//! ```text
//! stopped -> buffering -> playing <-> paused
//!               |            |
//!               v            v (underrun)
//!            stopped      buffering
//! ```
//!
//! The controller performs no IO. Every transition returns the control
//! messages the caller should send; time is passed in so tests can drive it.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::blocks::{BlockState, BlockTracker};
use crate::core::scheduler::{StatusError, StatusUpdate};
use crate::handlers::ws::IncomingMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Buffering,
    Playing,
    Paused,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Stopped => write!(f, "stopped"),
            PlaybackState::Buffering => write!(f, "buffering"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
        }
    }
}

impl PlaybackState {
    /// Prefetching continues in every state except `stopped`.
    pub fn is_prefetching(&self) -> bool {
        !matches!(self, PlaybackState::Stopped)
    }

    pub fn can_play(&self) -> bool {
        matches!(self, PlaybackState::Stopped | PlaybackState::Paused)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferingConfig {
    /// Cached blocks needed at the cursor before playback starts
    pub min_to_start: usize,
    /// Live blocks ahead below which the next batch is requested
    pub refill_threshold: usize,
    pub batch_size: usize,
    /// Blocks ahead of the cursor considered for counting and requesting.
    /// Keep at or below the server's eviction window.
    pub lookahead: usize,
    /// Blocks behind the cursor the server keeps after a jump
    pub lookbehind: usize,
    /// Outstanding blocks with no status for this long are asked for again
    pub status_timeout: Duration,
    /// Failed reconnects before the connection indicator may show
    pub reconnect_failures_before_indicator: u32,
    /// Cached run at or below which the buffer counts as low
    pub low_buffer_blocks: usize,
}

impl Default for BufferingConfig {
    fn default() -> Self {
        Self {
            min_to_start: 4,
            refill_threshold: 4,
            batch_size: 8,
            lookahead: 16,
            lookbehind: 8,
            status_timeout: Duration::from_secs(10),
            reconnect_failures_before_indicator: 3,
            low_buffer_blocks: 2,
        }
    }
}

/// Control messages produced by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    Synthesize {
        document_id: String,
        block_indices: Vec<usize>,
        cursor: usize,
        model: String,
        voice: String,
    },
    CursorMoved {
        document_id: String,
        cursor: usize,
    },
}

impl From<ClientCommand> for IncomingMessage {
    fn from(command: ClientCommand) -> Self {
        match command {
            ClientCommand::Synthesize {
                document_id,
                block_indices,
                cursor,
                model,
                voice,
            } => IncomingMessage::Synthesize {
                document_id,
                block_indices,
                cursor,
                model,
                voice,
                speed: None,
                format: None,
                sample_rate: None,
            },
            ClientCommand::CursorMoved {
                document_id,
                cursor,
            } => IncomingMessage::CursorMoved {
                document_id,
                cursor,
            },
        }
    }
}

/// Drives requests for one document as the listener plays, pauses and jumps.
#[derive(Debug)]
pub struct PlaybackController {
    config: BufferingConfig,
    document_id: String,
    model: String,
    voice: String,
    block_count: usize,
    cursor: usize,
    state: PlaybackState,
    blocks: BlockTracker,
    connected: bool,
    reconnect_failures: u32,
    systemic_error: Option<StatusError>,
}

impl PlaybackController {
    pub fn new(
        config: BufferingConfig,
        document_id: impl Into<String>,
        model: impl Into<String>,
        voice: impl Into<String>,
        block_count: usize,
    ) -> Self {
        Self {
            config,
            document_id: document_id.into(),
            model: model.into(),
            voice: voice.into(),
            block_count,
            cursor: 0,
            state: PlaybackState::Stopped,
            blocks: BlockTracker::new(),
            connected: true,
            reconnect_failures: 0,
            systemic_error: None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn blocks(&self) -> &BlockTracker {
        &self.blocks
    }

    /// Set when the server reported an error that stops playback.
    pub fn systemic_error(&self) -> Option<&StatusError> {
        self.systemic_error.as_ref()
    }

    /// Audio for the block under the cursor, if it has arrived.
    pub fn current_audio(&self) -> Option<&str> {
        self.blocks.audio_ref(self.cursor)
    }

    fn horizon(&self) -> std::ops::Range<usize> {
        let end = self
            .cursor
            .saturating_add(self.config.lookahead)
            .min(self.block_count);
        self.cursor..end.max(self.cursor)
    }

    /// Cached blocks playable from the cursor without a gap.
    pub fn cached_ahead(&self) -> usize {
        self.blocks.cached_run(self.cursor, self.horizon().end)
    }

    /// Cached, queued or processing blocks ahead. Counting only cached
    /// blocks here would re-request work that is already on its way.
    pub fn live_ahead(&self) -> usize {
        self.blocks.live_count(self.horizon())
    }

    /// Near the end of the document fewer than `min_to_start` blocks remain.
    fn start_threshold(&self) -> usize {
        let remaining = self.block_count.saturating_sub(self.cursor);
        self.config.min_to_start.min(remaining).max(1)
    }

    fn transition(&mut self, next: PlaybackState) {
        if self.state != next {
            debug!(
                document_id = %self.document_id,
                from = %self.state,
                to = %next,
                cursor = self.cursor,
                "Playback state change"
            );
            self.state = next;
        }
    }

    fn synthesize(&mut self, indices: Vec<usize>, now: Instant) -> Option<ClientCommand> {
        if indices.is_empty() || !self.connected {
            return None;
        }
        self.blocks.mark_requested(&indices, now);
        Some(ClientCommand::Synthesize {
            document_id: self.document_id.clone(),
            block_indices: indices,
            cursor: self.cursor,
            model: self.model.clone(),
            voice: self.voice.clone(),
        })
    }

    fn next_batch(&mut self, now: Instant) -> Option<ClientCommand> {
        let indices = self
            .blocks
            .requestable(self.horizon(), self.config.batch_size);
        self.synthesize(indices, now)
    }

    fn refill(&mut self, now: Instant, commands: &mut Vec<ClientCommand>) {
        if !self.state.is_prefetching() || self.live_ahead() >= self.config.refill_threshold {
            return;
        }
        if let Some(command) = self.next_batch(now) {
            commands.push(command);
        }
    }

    fn try_start(&mut self) {
        if self.state == PlaybackState::Buffering && self.cached_ahead() >= self.start_threshold()
        {
            self.transition(PlaybackState::Playing);
        }
    }

    /// Start or resume playback.
    pub fn play(&mut self, now: Instant) -> Vec<ClientCommand> {
        let mut commands = Vec::new();
        if !self.state.can_play() || self.cursor >= self.block_count {
            return commands;
        }
        self.systemic_error = None;

        if self.cached_ahead() >= self.start_threshold() {
            self.transition(PlaybackState::Playing);
        } else {
            self.transition(PlaybackState::Buffering);
            if let Some(command) = self.next_batch(now) {
                commands.push(command);
            }
        }
        self.refill(now, &mut commands);
        commands
    }

    /// Stop audio output. Prefetching continues.
    pub fn pause(&mut self) {
        if self.state == PlaybackState::Playing {
            self.transition(PlaybackState::Paused);
        }
    }

    /// Abandon buffering or playback.
    pub fn stop(&mut self) {
        self.transition(PlaybackState::Stopped);
    }

    /// Jump to another block: report the cursor so the server evicts, then
    /// request a fresh batch from the new position.
    pub fn seek(&mut self, cursor: usize, now: Instant) -> Vec<ClientCommand> {
        let mut commands = Vec::new();
        self.cursor = cursor.min(self.block_count.saturating_sub(1));

        let horizon = self.horizon();
        self.blocks.reset_errors(horizon.clone());
        self.blocks.evict_outside(
            self.cursor.saturating_sub(self.config.lookbehind),
            horizon.end.saturating_sub(1),
            now,
        );

        if self.connected {
            commands.push(ClientCommand::CursorMoved {
                document_id: self.document_id.clone(),
                cursor: self.cursor,
            });
        }

        if self.state == PlaybackState::Playing && self.cached_ahead() == 0 {
            self.transition(PlaybackState::Buffering);
        }
        if self.state.is_prefetching()
            && let Some(command) = self.next_batch(now)
        {
            commands.push(command);
        }
        self.try_start();
        commands
    }

    /// The block under the cursor finished playing.
    pub fn advance(&mut self, now: Instant) -> Vec<ClientCommand> {
        let mut commands = Vec::new();
        if self.state != PlaybackState::Playing {
            return commands;
        }

        self.cursor += 1;
        self.skip_failed();
        if self.state == PlaybackState::Stopped {
            return commands;
        }
        self.refill(now, &mut commands);
        self.try_start();
        commands
    }

    /// Apply a status update from the server.
    pub fn on_status(&mut self, update: &StatusUpdate, now: Instant) -> Vec<ClientCommand> {
        let mut commands = Vec::new();
        if update.document_id != self.document_id {
            return commands;
        }

        let state = self.blocks.apply(update, now);
        if state == BlockState::Error
            && let Some(error) = &update.error
        {
            if error.is_systemic() {
                warn!(
                    document_id = %self.document_id,
                    code = %error.code,
                    "Playback stopped by server error"
                );
                self.systemic_error = Some(error.clone());
                self.transition(PlaybackState::Stopped);
                return commands;
            }
            debug!(
                document_id = %self.document_id,
                block = update.block_idx,
                code = %error.code,
                "Block failed, will be skipped"
            );
        }

        if state == BlockState::Error && update.block_idx == self.cursor {
            self.skip_failed();
        }

        self.try_start();
        self.refill(now, &mut commands);
        commands
    }

    /// Fetching announced audio failed (the server answered 404). The block
    /// goes back to pending and is requested again.
    pub fn on_audio_missing(&mut self, index: usize, now: Instant) -> Vec<ClientCommand> {
        let mut commands = Vec::new();
        if !self.blocks.forget_audio(index, now) {
            return commands;
        }
        warn!(document_id = %self.document_id, block = index, "Cached audio missing, requesting again");

        if index == self.cursor && self.state == PlaybackState::Playing {
            self.transition(PlaybackState::Buffering);
        }
        if self.state.is_prefetching()
            && self.horizon().contains(&index)
            && let Some(command) = self.synthesize(vec![index], now)
        {
            commands.push(command);
        }
        self.refill(now, &mut commands);
        commands
    }

    /// Move the cursor past failed blocks; playback stops at the end of the
    /// document and waits when the next block has not arrived.
    fn skip_failed(&mut self) {
        while self.cursor < self.block_count && self.blocks.state(self.cursor) == BlockState::Error
        {
            debug!(document_id = %self.document_id, block = self.cursor, "Skipping failed block");
            self.cursor += 1;
        }
        if self.cursor >= self.block_count {
            info!(document_id = %self.document_id, "Reached end of document");
            self.transition(PlaybackState::Stopped);
        } else if self.state == PlaybackState::Playing
            && self.blocks.state(self.cursor) != BlockState::Cached
        {
            self.transition(PlaybackState::Buffering);
        }
    }

    /// Periodic check: ask again for blocks whose status never came.
    pub fn tick(&mut self, now: Instant) -> Vec<ClientCommand> {
        let mut commands = Vec::new();
        if !self.state.is_prefetching() || !self.connected {
            return commands;
        }

        let stale = self
            .blocks
            .stale_outstanding(self.horizon(), now, self.config.status_timeout);
        if !stale.is_empty() {
            debug!(
                document_id = %self.document_id,
                blocks = stale.len(),
                "Re-requesting blocks with no status"
            );
            if let Some(command) = self.synthesize(stale, now) {
                commands.push(command);
            }
        }
        self.refill(now, &mut commands);
        commands
    }

    /// Connection dropped. Cached audio keeps playing.
    pub fn on_disconnected(&mut self) {
        if self.connected {
            info!(document_id = %self.document_id, "Control connection lost");
        }
        self.connected = false;
    }

    pub fn on_reconnect_failed(&mut self) {
        self.reconnect_failures = self.reconnect_failures.saturating_add(1);
    }

    /// Connection restored: silently re-send what is still outstanding.
    pub fn on_connected(&mut self, now: Instant) -> Vec<ClientCommand> {
        let mut commands = Vec::new();
        let was_connected = std::mem::replace(&mut self.connected, true);
        self.reconnect_failures = 0;
        if was_connected || !self.state.is_prefetching() {
            return commands;
        }

        commands.push(ClientCommand::CursorMoved {
            document_id: self.document_id.clone(),
            cursor: self.cursor,
        });
        let outstanding = self.blocks.outstanding(self.horizon());
        if let Some(command) = self.synthesize(outstanding, now) {
            commands.push(command);
        }
        self.refill(now, &mut commands);
        commands
    }

    /// Whether to show a connectivity indicator. Only when the buffer is
    /// running low and reconnecting keeps failing.
    pub fn show_connection_indicator(&self) -> bool {
        !self.connected
            && self.reconnect_failures >= self.config.reconnect_failures_before_indicator
            && self.cached_ahead() <= self.config.low_buffer_blocks
    }
}

//! Client playback buffering driven without a server

use std::time::{Duration, Instant};

use readaloud_gateway::client::{BlockState, BufferingConfig, ClientCommand, PlaybackController, PlaybackState};
use readaloud_gateway::core::fingerprint::{Fingerprint, RenderParams};
use readaloud_gateway::core::scheduler::{StatusError, StatusUpdate};
use readaloud_gateway::handlers::ws::IncomingMessage;

const DOC: &str = "book";

fn controller(block_count: usize) -> PlaybackController {
    PlaybackController::new(BufferingConfig::default(), DOC, "default", "alloy", block_count)
}

fn cached(index: usize) -> StatusUpdate {
    let fingerprint = Fingerprint::compute(
        &format!("Sentence number {index}."),
        "default",
        "alloy",
        &RenderParams::default(),
    );
    StatusUpdate::cached(DOC, index, &fingerprint)
}

fn synthesize(indices: impl IntoIterator<Item = usize>, cursor: usize) -> ClientCommand {
    ClientCommand::Synthesize {
        document_id: DOC.to_string(),
        block_indices: indices.into_iter().collect(),
        cursor,
        model: "default".to_string(),
        voice: "alloy".to_string(),
    }
}

fn cursor_moved(cursor: usize) -> ClientCommand {
    ClientCommand::CursorMoved {
        document_id: DOC.to_string(),
        cursor,
    }
}

/// Start playback and deliver audio for `indices`.
fn playing_with(indices: std::ops::Range<usize>, block_count: usize, now: Instant) -> PlaybackController {
    let mut player = controller(block_count);
    player.play(now);
    for index in indices {
        player.on_status(&cached(index), now);
    }
    player
}

#[test]
fn test_play_requests_first_batch_and_waits_for_minimum() {
    let now = Instant::now();
    let mut player = controller(100);

    let commands = player.play(now);
    assert_eq!(commands, vec![synthesize(0..8, 0)]);
    assert_eq!(player.state(), PlaybackState::Buffering);

    for index in 0..3 {
        assert!(player.on_status(&cached(index), now).is_empty());
        assert_eq!(player.state(), PlaybackState::Buffering);
    }
    player.on_status(&cached(3), now);
    assert_eq!(player.state(), PlaybackState::Playing);
    assert!(player.current_audio().unwrap().starts_with("/audio/"));
}

#[test]
fn test_playback_needs_contiguous_audio_at_cursor() {
    let now = Instant::now();
    let mut player = controller(100);
    player.play(now);

    for index in 1..6 {
        player.on_status(&cached(index), now);
    }
    assert_eq!(player.state(), PlaybackState::Buffering);
    assert_eq!(player.cached_ahead(), 0);

    player.on_status(&cached(0), now);
    assert_eq!(player.state(), PlaybackState::Playing);
    assert_eq!(player.cached_ahead(), 6);
}

#[test]
fn test_short_document_starts_with_fewer_blocks() {
    let now = Instant::now();
    let mut player = controller(2);

    assert_eq!(player.play(now), vec![synthesize(0..2, 0)]);
    player.on_status(&cached(0), now);
    assert_eq!(player.state(), PlaybackState::Buffering);
    player.on_status(&cached(1), now);
    assert_eq!(player.state(), PlaybackState::Playing);
}

#[test]
fn test_refill_when_live_blocks_run_low() {
    let now = Instant::now();
    let mut player = playing_with(0..8, 100, now);
    assert_eq!(player.state(), PlaybackState::Playing);

    for expected_cursor in 1..5 {
        assert!(player.advance(now).is_empty());
        assert_eq!(player.cursor(), expected_cursor);
    }

    let commands = player.advance(now);
    assert_eq!(player.cursor(), 5);
    assert_eq!(commands, vec![synthesize(8..16, 5)]);
    assert_eq!(player.live_ahead(), 11);
    assert_eq!(player.state(), PlaybackState::Playing);
}

#[test]
fn test_underrun_returns_to_buffering() {
    let now = Instant::now();
    let mut player = playing_with(0..4, 100, now);

    for _ in 0..4 {
        player.advance(now);
    }
    assert_eq!(player.cursor(), 4);
    assert_eq!(player.state(), PlaybackState::Buffering);

    for index in 4..8 {
        player.on_status(&cached(index), now);
    }
    assert_eq!(player.state(), PlaybackState::Playing);
}

#[test]
fn test_missing_audio_is_requested_again() {
    let now = Instant::now();
    let mut player = playing_with(0..8, 100, now);
    assert_eq!(player.state(), PlaybackState::Playing);

    let commands = player.on_audio_missing(5, now);
    assert_eq!(commands, vec![synthesize([5], 0)]);
    assert_eq!(player.blocks().state(5), BlockState::Queued);
    assert_eq!(player.state(), PlaybackState::Playing);

    let commands = player.on_audio_missing(0, now);
    assert_eq!(commands, vec![synthesize([0], 0)]);
    assert_eq!(player.state(), PlaybackState::Buffering);
    assert!(player.current_audio().is_none());

    // Already re-requested
    assert!(player.on_audio_missing(0, now).is_empty());

    player.on_status(&cached(0), now);
    player.on_status(&cached(5), now);
    assert_eq!(player.state(), PlaybackState::Playing);
    assert!(player.current_audio().is_some());
}

#[test]
fn test_pause_keeps_cursor_and_resumes() {
    let now = Instant::now();
    let mut player = playing_with(0..8, 100, now);
    player.advance(now);

    player.pause();
    assert_eq!(player.state(), PlaybackState::Paused);
    assert!(player.advance(now).is_empty());
    assert_eq!(player.cursor(), 1);

    assert!(player.play(now).is_empty());
    assert_eq!(player.state(), PlaybackState::Playing);
}

#[test]
fn test_seek_reports_cursor_and_evicts_queued_blocks() {
    let now = Instant::now();
    let mut player = controller(100);
    player.play(now);

    let commands = player.seek(50, now);
    assert_eq!(commands, vec![cursor_moved(50), synthesize(50..58, 50)]);
    assert_eq!(player.state(), PlaybackState::Buffering);
    for index in 0..8 {
        assert_eq!(player.blocks().state(index), BlockState::Evicted);
    }

    // Returning re-requests evicted blocks
    let commands = player.seek(0, now);
    assert_eq!(commands, vec![cursor_moved(0), synthesize(0..8, 0)]);
}

#[test]
fn test_seek_within_cached_audio_keeps_playing() {
    let now = Instant::now();
    let mut player = playing_with(0..8, 100, now);

    let commands = player.seek(2, now);
    assert_eq!(commands, vec![cursor_moved(2), synthesize(8..16, 2)]);
    assert_eq!(player.state(), PlaybackState::Playing);
    assert_eq!(player.cached_ahead(), 6);
}

#[test]
fn test_seek_while_stopped_only_moves_cursor() {
    let now = Instant::now();
    let mut player = controller(100);

    assert_eq!(player.seek(500, now), vec![cursor_moved(99)]);
    assert_eq!(player.cursor(), 99);
    assert_eq!(player.state(), PlaybackState::Stopped);
}

#[test]
fn test_systemic_error_stops_playback() {
    let now = Instant::now();
    let mut player = controller(100);
    player.play(now);

    let error = StatusError::systemic("usage_limit_exceeded", "quota exhausted");
    let commands = player.on_status(&StatusUpdate::error(DOC, 0, error), now);

    assert!(commands.is_empty());
    assert_eq!(player.state(), PlaybackState::Stopped);
    assert_eq!(player.systemic_error().unwrap().code, "usage_limit_exceeded");

    // Playing again clears the error
    player.play(now);
    assert!(player.systemic_error().is_none());
}

#[test]
fn test_transient_error_is_skipped() {
    let now = Instant::now();
    let mut player = playing_with(0..4, 100, now);
    let error = StatusError::transient("synthesis_failed", "backend returned 500");
    player.on_status(&StatusUpdate::error(DOC, 4, error), now);
    assert_eq!(player.state(), PlaybackState::Playing);

    for _ in 0..3 {
        player.advance(now);
    }
    let commands = player.advance(now);
    assert_eq!(player.cursor(), 5);
    assert_eq!(player.state(), PlaybackState::Buffering);
    assert_eq!(commands, vec![synthesize(8..16, 5)]);

    // A seek back makes the failed block requestable again
    player.seek(4, now);
    assert_eq!(player.blocks().state(4), BlockState::Queued);
}

#[test]
fn test_transient_error_at_cursor_moves_past_it() {
    let now = Instant::now();
    let mut player = controller(100);
    player.play(now);

    let error = StatusError::transient("empty_block", "block has no speakable text");
    player.on_status(&StatusUpdate::error(DOC, 0, error), now);
    assert_eq!(player.cursor(), 1);
    assert_eq!(player.state(), PlaybackState::Buffering);

    for index in 1..5 {
        player.on_status(&cached(index), now);
    }
    assert_eq!(player.state(), PlaybackState::Playing);
}

#[test]
fn test_playback_stops_at_end_of_document() {
    let now = Instant::now();
    let mut player = playing_with(0..3, 3, now);
    assert_eq!(player.state(), PlaybackState::Playing);

    player.advance(now);
    player.advance(now);
    assert_eq!(player.state(), PlaybackState::Playing);
    player.advance(now);
    assert_eq!(player.state(), PlaybackState::Stopped);
}

#[test]
fn test_updates_for_other_documents_are_ignored() {
    let now = Instant::now();
    let mut player = controller(100);
    player.play(now);

    let fingerprint = Fingerprint::compute("other", "default", "alloy", &RenderParams::default());
    player.on_status(&StatusUpdate::cached("other-book", 0, &fingerprint), now);
    assert_eq!(player.blocks().state(0), BlockState::Queued);
}

#[test]
fn test_tick_rerequests_blocks_without_status() {
    let start = Instant::now();
    let mut player = controller(100);
    player.play(start);

    assert!(player.tick(start + Duration::from_secs(5)).is_empty());

    player.on_status(&StatusUpdate::processing(DOC, 0), start + Duration::from_secs(9));
    let commands = player.tick(start + Duration::from_secs(11));
    assert_eq!(commands, vec![synthesize(1..8, 0)]);

    player.stop();
    assert!(player.tick(start + Duration::from_secs(60)).is_empty());
}

#[test]
fn test_disconnect_indicator_and_silent_resend() {
    let now = Instant::now();
    let mut player = playing_with(0..4, 100, now);

    player.on_disconnected();
    for _ in 0..3 {
        player.on_reconnect_failed();
    }
    // Plenty of audio buffered
    assert!(!player.show_connection_indicator());

    assert!(player.advance(now).is_empty());
    assert!(player.advance(now).is_empty());
    assert_eq!(player.cached_ahead(), 2);
    assert!(player.show_connection_indicator());
    assert!(player.seek(2, now).is_empty());

    let commands = player.on_connected(now);
    assert_eq!(commands, vec![cursor_moved(2), synthesize(4..8, 2)]);
    assert!(!player.show_connection_indicator());
    assert!(player.on_connected(now).is_empty());
}

#[test]
fn test_indicator_needs_repeated_failures() {
    let now = Instant::now();
    let mut player = controller(100);
    player.play(now);
    player.on_disconnected();
    player.on_reconnect_failed();
    player.on_reconnect_failed();
    assert!(!player.show_connection_indicator());
    player.on_reconnect_failed();
    assert!(player.show_connection_indicator());
}

#[test]
fn test_command_converts_to_control_message() {
    let message = IncomingMessage::from(synthesize(0..2, 0));
    match message {
        IncomingMessage::Synthesize {
            document_id,
            block_indices,
            speed,
            ..
        } => {
            assert_eq!(document_id, DOC);
            assert_eq!(block_indices, vec![0, 1]);
            assert!(speed.is_none());
        }
        other => panic!("unexpected message: {other:?}"),
    }
}

//! Integration tests for timeline navigation.
//!
//! Drives whole timelines end to end: stepping with autoplay chaining,
//! tag and position jumps, skip propagation down to clips, and
//! past-immutability guards.

use cueflow_core::{CueflowError, Direction, TimePoint};
use cueflow_engine::{
    factory, ClipTiming, JumpAutoplay, JumpOptions, Position, SearchRange, Sequence,
    SequenceConfig, Timescale, TimelineConfig,
};
use std::time::Duration;
use tokio::time::Instant;

// ── Helpers ────────────────────────────────────────────────────

fn sequence(active_ms: i64, config: SequenceConfig) -> Sequence {
    let seq = factory::sequence(config);
    seq.add_clip(factory::timer_clip(ClipTiming {
        timescale: Timescale::Duration(TimePoint::from_millis(active_ms)),
        ..Default::default()
    }))
    .unwrap();
    seq
}

fn tagged(tag: &str, active_ms: i64) -> Sequence {
    sequence(
        active_ms,
        SequenceConfig {
            jump_tag: Some(tag.to_string()),
            ..Default::default()
        },
    )
}

// ── Stepping and autoplay ──────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn show_steps_through_with_autoplay_chaining() {
    let tl = factory::timeline(TimelineConfig {
        name: "show".into(),
        ..Default::default()
    });
    let opener = sequence(
        50,
        SequenceConfig {
            autoplays_next_sequence: true,
            ..Default::default()
        },
    );
    let act_one = sequence(100, SequenceConfig::default());
    let act_two = sequence(100, SequenceConfig::default());
    tl.add_sequences(vec![opener.clone(), act_one.clone(), act_two.clone()])
        .unwrap();

    let started = Instant::now();
    tl.step(Direction::Forward).await.unwrap();
    // The opener autoplays the first act, then stepping stops.
    assert_eq!(started.elapsed(), Duration::from_millis(150));
    assert_eq!(tl.cursor(), 2);
    assert!(act_one.status().was_played);
    assert!(!act_two.status().was_played);

    tl.step(Direction::Forward).await.unwrap();
    assert!(tl.status().at_end);
}

#[tokio::test(start_paused = true)]
async fn stepping_back_undoes_exactly_what_played() {
    let tl = factory::timeline(TimelineConfig::default());
    let seqs = vec![tagged("a", 20), tagged("b", 20)];
    tl.add_sequences(seqs.clone()).unwrap();
    tl.step(Direction::Forward).await.unwrap();
    tl.step(Direction::Forward).await.unwrap();
    assert!(tl.status().at_end);

    tl.step(Direction::Backward).await.unwrap();
    assert_eq!(tl.cursor(), 1);
    assert!(seqs[1].status().was_rewound);
    assert!(seqs[0].status().was_played);
}

// ── Skip propagation ───────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn skipping_makes_subsequent_steps_instant() {
    let tl = factory::timeline(TimelineConfig::default());
    tl.add_sequence(sequence(60_000, SequenceConfig::default()))
        .unwrap();
    tl.set_skipping(true);

    let started = Instant::now();
    tl.step(Direction::Forward).await.unwrap();
    // Clips observe the skip state directly, no finish call needed.
    assert_eq!(started.elapsed(), Duration::ZERO);
}

// ── Jumping ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn jump_traverses_and_restores_state() {
    let tl = factory::timeline(TimelineConfig::default());
    let seqs = vec![tagged("intro", 500), tagged("verse", 500), tagged("outro", 500)];
    tl.add_sequences(seqs.clone()).unwrap();
    tl.pause();

    let started = Instant::now();
    tl.jump_to_sequence_tag("outro", JumpOptions::default())
        .await
        .unwrap();
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(tl.cursor(), 2);
    assert!(seqs[0].status().was_played && seqs[1].status().was_played);
    // Pause and skip states restored after the jump.
    let status = tl.status();
    assert!(status.is_paused);
    assert!(!status.skipping_on);
    assert!(!status.is_jumping);
}

#[tokio::test(start_paused = true)]
async fn jump_with_autoplay_continues_past_the_target() {
    let tl = factory::timeline(TimelineConfig::default());
    let target = tagged("drop", 10);
    let follower = sequence(
        10,
        SequenceConfig {
            autoplays: true,
            ..Default::default()
        },
    );
    tl.add_sequences(vec![tagged("build", 10), target, follower.clone()])
        .unwrap();

    tl.jump_to_sequence_tag(
        "drop",
        JumpOptions {
            target_offset: 1,
            autoplay: JumpAutoplay::Forward,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    // Landed past "drop" (index 1 + offset 1 = cursor 2), then chained
    // through the autoplaying follower.
    assert!(tl.status().at_end);
    assert!(follower.status().was_played);
}

#[tokio::test(start_paused = true)]
async fn cursor_relative_search_skips_the_past() {
    let tl = factory::timeline(TimelineConfig::default());
    tl.add_sequences(vec![tagged("x", 10), tagged("y", 10), tagged("x", 10)])
        .unwrap();
    tl.jump_to_position(Position::Index(1), JumpOptions::default())
        .await
        .unwrap();
    tl.jump_to_sequence_tag(
        "x",
        JumpOptions {
            search: SearchRange::ForwardFromCursor,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(tl.cursor(), 2);
}

// ── Guards ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn the_past_is_immutable() {
    let tl = factory::timeline(TimelineConfig::default());
    tl.add_sequences(vec![tagged("a", 10), tagged("b", 10)])
        .unwrap();
    tl.step(Direction::Forward).await.unwrap();

    let err = tl.remove_sequences_at(0).unwrap_err();
    assert!(matches!(err, CueflowError::TimeParadox { .. }));
    assert_eq!(tl.sequence_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn invalid_jump_targets_fail_before_any_motion() {
    let tl = factory::timeline(TimelineConfig::default());
    tl.add_sequences(vec![tagged("a", 10)]).unwrap();
    let err = tl
        .jump_to_position(Position::Index(5), JumpOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CueflowError::OutOfRange { .. }));
    let err = tl
        .jump_to_sequence_tag("missing", JumpOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CueflowError::NotFound { .. }));
    assert_eq!(tl.cursor(), 0);
    assert!(!tl.status().is_jumping);
}

//! Integration tests for sequence playback.
//!
//! Exercises the full clip → grouping → orchestrator stack: wall-time
//! arithmetic across chained groupings, compounded playback rates, and
//! barrier-enforced finish ordering.

use cueflow_core::{Direction, Phase, PhasePoint, TimePoint};
use cueflow_engine::{
    factory, ClipHandle, ClipTiming, SequenceConfig, Timescale, TimerClip, TimelineConfig,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

// ── Helpers ────────────────────────────────────────────────────

fn clip(delay: i64, active: i64, end_delay: i64) -> Arc<TimerClip> {
    factory::timer_clip(ClipTiming {
        timescale: Timescale::Duration(TimePoint::from_millis(active)),
        delay: TimePoint::from_millis(delay),
        end_delay: TimePoint::from_millis(end_delay),
        ..Default::default()
    })
}

fn chained(delay: i64, active: i64, end_delay: i64) -> Arc<TimerClip> {
    factory::timer_clip(ClipTiming {
        timescale: Timescale::Duration(TimePoint::from_millis(active)),
        delay: TimePoint::from_millis(delay),
        end_delay: TimePoint::from_millis(end_delay),
        starts_with_previous: true,
        ..Default::default()
    })
}

// ── Wall-time arithmetic ───────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn staged_show_takes_the_sum_of_its_groupings() {
    let seq = factory::sequence(SequenceConfig::default());
    seq.add_clip(clip(10, 100, 5)).unwrap();
    seq.add_clip(chained(0, 50, 0)).unwrap();
    seq.add_clip(clip(0, 30, 0)).unwrap();

    let started = Instant::now();
    seq.play().await.unwrap();
    // Grouping one settles at 115ms (10+100+5 dominates the 50ms
    // sibling); grouping two adds 30ms.
    assert_eq!(started.elapsed(), Duration::from_millis(145));
}

#[tokio::test(start_paused = true)]
async fn rewind_takes_the_same_wall_time_as_play() {
    let seq = factory::sequence(SequenceConfig::default());
    seq.add_clip(clip(0, 60, 0)).unwrap();
    seq.add_clip(chained(20, 30, 10)).unwrap();
    seq.play().await.unwrap();

    let started = Instant::now();
    seq.rewind().await.unwrap();
    assert_eq!(started.elapsed(), Duration::from_millis(60));
    let status = seq.status();
    assert!(status.was_rewound && !status.was_played && status.is_finished);
}

#[tokio::test(start_paused = true)]
async fn rates_compound_across_all_three_levels() {
    let c = factory::timer_clip(ClipTiming {
        timescale: Timescale::Duration(TimePoint::from_millis(800)),
        playback_rate: 2.0,
        ..Default::default()
    });
    let seq = factory::sequence(SequenceConfig {
        playback_rate: 2.0,
        ..Default::default()
    });
    seq.add_clip(c).unwrap();
    let tl = factory::timeline(TimelineConfig::default());
    tl.add_sequence(seq).unwrap();
    tl.set_playback_rate(2.0);

    let started = Instant::now();
    tl.step(Direction::Forward).await.unwrap();
    // 800ms of material at 2 x 2 x 2.
    assert_eq!(started.elapsed(), Duration::from_millis(100));
}

// ── Finish ordering ────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn finish_events_follow_the_committed_order() {
    // Three overlapping clips whose nominal active finishes are
    // 90 < 120 < 150. Speeding up the longest after commit must not
    // let it finish out of order.
    let a = clip(0, 150, 0);
    let b = chained(0, 90, 0);
    let c = chained(0, 120, 0);
    let seq = factory::sequence(SequenceConfig::default());
    seq.add_clip(a.clone()).unwrap();
    seq.add_clip(b.clone()).unwrap();
    seq.add_clip(c.clone()).unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    for (label, handle) in [
        ("a", a.clone() as ClipHandle),
        ("b", b.clone() as ClipHandle),
        ("c", c.clone() as ClipHandle),
    ] {
        let signal = handle.phase_signal(Direction::Forward, Phase::Active, PhasePoint::End);
        let order = order.clone();
        tokio::spawn(async move {
            signal.await;
            order.lock().unwrap().push(label);
        });
    }

    let driver = tokio::spawn({
        let seq = seq.clone();
        async move { seq.play().await }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;
    a.set_playback_rate(1000.0);
    driver.await.unwrap().unwrap();
    assert_eq!(order.lock().unwrap().as_slice(), &["b", "c", "a"]);
}

#[tokio::test(start_paused = true)]
async fn forced_finish_collapses_remaining_wall_time() {
    let seq = factory::sequence(SequenceConfig::default());
    seq.add_clip(clip(0, 5_000, 0)).unwrap();
    seq.add_clip(clip(0, 5_000, 0)).unwrap();
    let driver = tokio::spawn({
        let seq = seq.clone();
        async move { seq.play().await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    seq.finish().await.unwrap();
    assert_eq!(started.elapsed(), Duration::ZERO);
    driver.await.unwrap().unwrap();
    assert!(seq.status().was_played);
}

#[tokio::test(start_paused = true)]
async fn rate_governed_grouping_resolves_mid_flight() {
    let seq = factory::sequence(SequenceConfig::default());
    seq.add_clip(factory::timer_clip(ClipTiming {
        timescale: Timescale::Rate {
            length: TimePoint::from_millis(400),
            rate: 4.0,
        },
        ..Default::default()
    }))
    .unwrap();
    seq.add_clip(factory::timer_clip(ClipTiming {
        timescale: Timescale::Rate {
            length: TimePoint::from_millis(60),
            rate: 1.0,
        },
        starts_with_previous: true,
        ..Default::default()
    }))
    .unwrap();

    let started = Instant::now();
    seq.play().await.unwrap();
    // 400ms of material at rate 4 anchors the grouping at 100ms; the
    // 60ms sibling fits inside it.
    assert_eq!(started.elapsed(), Duration::from_millis(100));
}

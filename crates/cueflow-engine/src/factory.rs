//! Sanctioned construction point for engine objects.
//!
//! Clip, sequence, and timeline constructors are crate-private; callers
//! build everything through these functions, so an object that exists
//! is always a correctly initialized one.

use crate::clip::{Clip, ClipTiming};
use crate::sequence::{Sequence, SequenceConfig};
use crate::timeline::{Timeline, TimelineConfig};
use crate::timer_clip::TimerClip;
use std::sync::Arc;
use tracing::debug;

/// Create a timer clip with the given timing profile.
pub fn timer_clip(timing: ClipTiming) -> Arc<TimerClip> {
    let clip = Arc::new(TimerClip::new(timing));
    debug!(clip = %clip.id(), "timer clip created");
    clip
}

/// Create an empty sequence.
pub fn sequence(config: SequenceConfig) -> Sequence {
    let seq = Sequence::new(config);
    debug!(sequence = %seq.id(), "sequence created");
    seq
}

/// Create an empty timeline.
pub fn timeline(config: TimelineConfig) -> Timeline {
    let tl = Timeline::new(config);
    debug!(timeline = %tl.id(), name = tl.name(), "timeline created");
    tl
}

//! Cueflow Engine - Scheduling and playback orchestration
//!
//! Implements the playback core:
//! - Clip capability surface and timer-driven reference clip
//! - Commit algorithm partitioning clips into chained groupings
//! - Concurrent play/rewind orchestration with finish-order barriers
//! - Timeline navigation (stepping, jumping, autoplay chaining)

pub mod clip;
pub mod factory;
pub mod grouping;
pub mod sequence;
pub mod timeline;
pub mod timer_clip;

pub use clip::{BoxFuture, Clip, ClipHandle, ClipLineage, ClipSchedule, ClipTiming, Timescale, TimescaleKind};
pub use grouping::{CommitState, Grouping};
pub use sequence::{Hook, HookPair, Sequence, SequenceConfig, SequenceStatus};
pub use timeline::{
    JumpAutoplay, JumpOptions, Position, SearchRange, TagMatcher, Timeline, TimelineConfig,
    TimelineStatus,
};
pub use timer_clip::TimerClip;

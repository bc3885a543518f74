//! The clip capability surface consumed by the orchestrator.
//!
//! A clip is an atomic playable unit with a timing profile and
//! phase-boundary signals. The orchestrator never runs a clip's payload
//! itself; it launches clips, subscribes to their phase boundaries, and
//! installs barriers that gate boundary completion. Anything satisfying
//! [`Clip`] can be driven by a [`crate::Sequence`].

use cueflow_core::{Direction, Phase, PhasePoint, Result, TimePoint, TimeSpan};
use std::future::Future;
use std::pin::Pin;
use tokio::sync::watch;
use uuid::Uuid;

/// Boxed future used across the clip seam (the trait must stay object-safe).
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// A shareable handle to a clip.
pub type ClipHandle = std::sync::Arc<dyn Clip>;

/// Timescale category of a clip's active phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Timescale {
    /// Fixed nominal active length, fully known at commit time.
    Duration(TimePoint),
    /// Speed-driven: the active phase covers `length` of source material
    /// at `rate`, so its true length is only known once the clip has
    /// begun running.
    Rate { length: TimePoint, rate: f64 },
}

/// The two timescale kinds, for adjacency checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimescaleKind {
    Duration,
    Rate,
}

impl Timescale {
    /// Which kind of timescale this is.
    pub fn kind(&self) -> TimescaleKind {
        match self {
            Self::Duration(_) => TimescaleKind::Duration,
            Self::Rate { .. } => TimescaleKind::Rate,
        }
    }

    /// Nominal active length used for provisional predictions.
    pub fn nominal_active(&self) -> TimePoint {
        match *self {
            Self::Duration(d) => d,
            Self::Rate { length, rate } => length.div_f64(rate),
        }
    }
}

/// A clip's timing profile, read by the commit algorithm.
#[derive(Debug, Clone)]
pub struct ClipTiming {
    /// How the active phase's length is governed.
    pub timescale: Timescale,
    /// This clip launches together with its predecessor.
    pub starts_with_previous: bool,
    /// The following clip launches together with this one.
    pub starts_next_clip_too: bool,
    /// Delay phase length (before the active phase).
    pub delay: TimePoint,
    /// End-delay phase length (after the active phase).
    pub end_delay: TimePoint,
    /// The clip's own playback rate, compounded with ancestor rates.
    pub playback_rate: f64,
}

impl Default for ClipTiming {
    fn default() -> Self {
        Self {
            timescale: Timescale::Duration(TimePoint::ZERO),
            starts_with_previous: false,
            starts_next_clip_too: false,
            delay: TimePoint::ZERO,
            end_delay: TimePoint::ZERO,
            playback_rate: 1.0,
        }
    }
}

/// Offsets assigned to a clip by the commit algorithm, relative to the
/// owning sequence's local clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipSchedule {
    pub full_start: TimePoint,
    pub active_start: TimePoint,
    pub active_finish: TimePoint,
    pub full_finish: TimePoint,
}

impl ClipSchedule {
    /// Predict a schedule from a start offset, timing profile, and active
    /// length.
    pub fn predict(full_start: TimePoint, timing: &ClipTiming, active: TimePoint) -> Self {
        let active_start = full_start + timing.delay;
        let active_finish = active_start + active;
        Self {
            full_start,
            active_start,
            active_finish,
            full_finish: active_finish + timing.end_delay,
        }
    }

    /// The full delay-to-end-delay span.
    pub fn full_span(&self) -> TimeSpan {
        TimeSpan::new(self.full_start, self.full_finish)
    }

    /// Locate an absolute sequence offset within this clip's phases.
    ///
    /// Returns the phase containing `at` and the offset from that phase's
    /// forward beginning. Offsets outside the clip clamp to its edges.
    pub fn locate(&self, at: TimePoint) -> (Phase, PhasePoint) {
        if at >= self.active_finish {
            (Phase::EndDelay, PhasePoint::Offset(at.max(self.active_finish) - self.active_finish))
        } else if at >= self.active_start {
            (Phase::Active, PhasePoint::Offset(at - self.active_start))
        } else {
            let from = if at > self.full_start {
                at - self.full_start
            } else {
                TimePoint::ZERO
            };
            (Phase::Delay, PhasePoint::Offset(from))
        }
    }
}

/// Non-owning link from a clip back to its owning sequence.
///
/// Holds the owner's id plus live subscriptions to its compounded
/// playback rate and skip state; dropping the owner invalidates the
/// subscriptions without extending its lifetime.
#[derive(Debug, Clone)]
pub struct ClipLineage {
    pub sequence_id: Uuid,
    pub compounded_rate: watch::Receiver<f64>,
    pub skip: watch::Receiver<bool>,
}

/// The capability surface a clip exposes to the orchestrator.
pub trait Clip: Send + Sync {
    /// Stable identity.
    fn id(&self) -> Uuid;

    /// Current timing profile.
    fn timing(&self) -> ClipTiming;

    /// Schedule assigned by the most recent commit, if any.
    fn schedule(&self) -> Option<ClipSchedule>;

    /// Assign schedule offsets (called by the commit algorithm).
    fn set_schedule(&self, schedule: ClipSchedule);

    /// Play forward; settles when the clip has fully finished.
    fn play(&self) -> BoxFuture<Result<()>>;

    /// Rewind; settles when the clip has fully returned to its start.
    fn rewind(&self) -> BoxFuture<Result<()>>;

    /// Freeze in-flight timers. Effective only while running.
    fn pause(&self);

    /// Resume frozen timers.
    fn unpause(&self);

    /// Force instant completion of the current traversal. Pending
    /// barriers still apply; only real-time delay is removed. The skip
    /// request takes effect before the returned future is first polled.
    fn finish(&self) -> BoxFuture<Result<()>>;

    /// A future that settles when the clip reaches the given phase point
    /// while traversing in `direction`. May be created before the
    /// traversal starts; it settles on the next crossing.
    fn phase_signal(&self, direction: Direction, phase: Phase, point: PhasePoint) -> BoxFuture<()>;

    /// Register a barrier: a prerequisite future awaited before the given
    /// phase boundary completes in `direction`. Barriers are consumed by
    /// the traversal that crosses the boundary.
    fn add_barrier(
        &self,
        direction: Direction,
        phase: Phase,
        point: PhasePoint,
        barrier: BoxFuture<()>,
    );

    /// Recompute the effective rate from the clip's own rate and the
    /// ancestor rate published through its lineage.
    fn use_compounded_playback_rate(&self);

    /// True active length, once the clip has resolved it by running.
    /// `None` for rate-governed clips that have not yet started.
    fn resolved_active_duration(&self) -> Option<TimePoint>;

    /// Attach to an owning sequence. Fails if already owned elsewhere.
    fn set_lineage(&self, lineage: ClipLineage) -> Result<()>;

    /// Detach from the owning sequence.
    fn remove_lineage(&self);
}

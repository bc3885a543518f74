//! Timer-backed clip implementation.
//!
//! `TimerClip` drives the full phase lifecycle (delay, active, end-delay)
//! on independent tokio timers. Each boundary crossing publishes a
//! monotonic counter on a watch channel, so phase signals can be created
//! before a traversal starts and settle on the next crossing. Pause,
//! rate changes, and skip requests interrupt the in-flight sleep and the
//! remaining wall time is recomputed from the elapsed local time.
//!
//! The visual payload a clip would run is out of scope here; this type
//! implements the timing machinery only.

use crate::clip::{BoxFuture, Clip, ClipLineage, ClipSchedule, ClipTiming, Timescale};
use cueflow_core::{Boundary, CueflowError, Direction, Phase, PhasePoint, Result, TimePoint};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::time::{sleep, Instant};
use tracing::trace;
use uuid::Uuid;

/// Number of distinct (direction, phase, boundary) cells.
const BOUNDARY_CELLS: usize = 12;

fn cell_index(direction: Direction, phase: Phase, boundary: Boundary) -> usize {
    let d = match direction {
        Direction::Forward => 0,
        Direction::Backward => 1,
    };
    let p = match phase {
        Phase::Delay => 0,
        Phase::Active => 1,
        Phase::EndDelay => 2,
    };
    let b = match boundary {
        Boundary::Begin => 0,
        Boundary::End => 1,
    };
    d * 6 + p * 2 + b
}

/// Map a phase point to the boundary whose completion it gates.
/// Offsets gate the far edge of the phase in the given direction.
fn barrier_boundary(point: PhasePoint, direction: Direction) -> Boundary {
    match point {
        PhasePoint::Begin => Boundary::Begin,
        PhasePoint::End => Boundary::End,
        PhasePoint::Offset(_) => Boundary::exit(direction),
    }
}

/// A future that settles on the next increment of a counter cell.
fn awaited(tx: &watch::Sender<u64>) -> BoxFuture<()> {
    let mut rx = tx.subscribe();
    let seen = *rx.borrow();
    Box::pin(async move {
        loop {
            if *rx.borrow_and_update() > seen {
                return;
            }
            // A closed channel means the clip is gone; settle rather
            // than wedge whoever is gated on us.
            if rx.changed().await.is_err() {
                return;
            }
        }
    })
}

struct OffsetWaiter {
    direction: Direction,
    phase: Phase,
    /// Offset from the phase's forward beginning.
    at: TimePoint,
    tx: watch::Sender<u64>,
}

struct ClipState {
    timing: ClipTiming,
    schedule: Option<ClipSchedule>,
    lineage: Option<ClipLineage>,
    running: bool,
    resolved_active: Option<TimePoint>,
    barriers: HashMap<usize, Vec<BoxFuture<()>>>,
    waiters: Vec<OffsetWaiter>,
}

struct ClipInner {
    id: Uuid,
    boundaries: Vec<watch::Sender<u64>>,
    /// Fires once per completed traversal (either direction).
    settled: watch::Sender<u64>,
    paused: watch::Sender<bool>,
    /// One-shot per-cycle skip, set by `finish()`.
    skip: watch::Sender<bool>,
    /// Effective compounded playback rate.
    rate: watch::Sender<f64>,
    waiters_changed: Notify,
    state: Mutex<ClipState>,
}

/// A clip whose phases run on tokio timers.
pub struct TimerClip {
    inner: Arc<ClipInner>,
}

impl TimerClip {
    pub(crate) fn new(timing: ClipTiming) -> Self {
        let rate = timing.playback_rate;
        let inner = ClipInner {
            id: Uuid::new_v4(),
            boundaries: (0..BOUNDARY_CELLS).map(|_| watch::channel(0).0).collect(),
            settled: watch::channel(0).0,
            paused: watch::channel(false).0,
            skip: watch::channel(false).0,
            rate: watch::channel(rate).0,
            waiters_changed: Notify::new(),
            state: Mutex::new(ClipState {
                timing,
                schedule: None,
                lineage: None,
                running: false,
                resolved_active: None,
                barriers: HashMap::new(),
                waiters: Vec::new(),
            }),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Change the clip's own playback rate and recompute the effective
    /// compounded rate. Takes effect immediately, even mid-phase.
    pub fn set_playback_rate(&self, rate: f64) {
        self.inner.state.lock().timing.playback_rate = rate;
        self.inner.recompute_rate();
    }
}

impl ClipInner {
    fn fire(&self, direction: Direction, phase: Phase, boundary: Boundary) {
        trace!(clip = %self.id, %direction, ?phase, ?boundary, "boundary crossed");
        self.boundaries[cell_index(direction, phase, boundary)].send_modify(|v| *v += 1);
    }

    fn recompute_rate(&self) {
        let st = self.state.lock();
        let ancestor = st
            .lineage
            .as_ref()
            .map_or(1.0, |l| *l.compounded_rate.borrow());
        let effective = st.timing.playback_rate * ancestor;
        drop(st);
        self.rate.send_replace(effective);
    }

    /// Length of a phase in local time, resolving rate-governed active
    /// lengths the first time the active phase is entered.
    fn phase_duration(&self, phase: Phase) -> TimePoint {
        let mut st = self.state.lock();
        match phase {
            Phase::Delay => st.timing.delay,
            Phase::EndDelay => st.timing.end_delay,
            Phase::Active => match st.timing.timescale {
                Timescale::Duration(d) => d,
                Timescale::Rate { length, rate } => {
                    *st.resolved_active.get_or_insert(length.div_f64(rate))
                }
            },
        }
    }

    /// Fire every registered offset waiter the traversal has passed.
    /// When the phase is complete, all remaining waiters for it fire.
    fn fire_passed_waiters(
        &self,
        direction: Direction,
        phase: Phase,
        elapsed: TimePoint,
        nominal: TimePoint,
    ) {
        let mut st = self.state.lock();
        st.waiters.retain(|w| {
            if w.direction != direction || w.phase != phase {
                return true;
            }
            let passed = elapsed >= nominal
                || match direction {
                    Direction::Forward => elapsed >= w.at,
                    Direction::Backward => elapsed >= nominal - w.at,
                };
            if passed {
                w.tx.send_modify(|v| *v += 1);
            }
            !passed
        });
    }

    /// The next point the timer must stop at: the phase end or the
    /// earliest pending offset waiter ahead of the playhead.
    fn next_stop(
        &self,
        direction: Direction,
        phase: Phase,
        elapsed: TimePoint,
        nominal: TimePoint,
    ) -> TimePoint {
        let st = self.state.lock();
        let mut target = nominal;
        for w in &st.waiters {
            if w.direction != direction || w.phase != phase {
                continue;
            }
            let stop = match direction {
                Direction::Forward => w.at,
                Direction::Backward => nominal - w.at,
            };
            if stop > elapsed && stop < target {
                target = stop;
            }
        }
        target
    }

    async fn await_barriers(&self, direction: Direction, phase: Phase, boundary: Boundary) {
        let pending = {
            let mut st = self.state.lock();
            st.barriers.remove(&cell_index(direction, phase, boundary))
        };
        if let Some(pending) = pending {
            for barrier in pending {
                barrier.await;
            }
        }
    }

    /// Wait out one phase, honoring pause, rate changes, skip requests,
    /// and offset waiters.
    async fn timed_wait(
        &self,
        direction: Direction,
        phase: Phase,
        lineage_skip: &mut Option<watch::Receiver<bool>>,
    ) {
        let nominal = self.phase_duration(phase);
        let mut elapsed = TimePoint::ZERO;
        let mut paused_rx = self.paused.subscribe();
        let mut skip_rx = self.skip.subscribe();
        let mut rate_rx = self.rate.subscribe();
        loop {
            self.fire_passed_waiters(direction, phase, elapsed, nominal);
            if elapsed >= nominal {
                return;
            }
            let skipping = *skip_rx.borrow_and_update()
                || lineage_skip
                    .as_mut()
                    .is_some_and(|rx| *rx.borrow_and_update());
            if skipping {
                elapsed = nominal;
                continue;
            }
            if *paused_rx.borrow_and_update() {
                // Frozen. A skip request unfreezes into acceleration.
                tokio::select! {
                    _ = paused_rx.changed() => {}
                    _ = skip_rx.changed() => {}
                    _ = changed_or_pending(lineage_skip.as_mut()) => {}
                }
                continue;
            }
            let rate = *rate_rx.borrow_and_update();
            let target = self.next_stop(direction, phase, elapsed, nominal);
            let wall = (target - elapsed).to_wall(rate);
            let started = Instant::now();
            tokio::select! {
                _ = sleep(wall) => {
                    elapsed = target;
                }
                _ = paused_rx.changed() => {
                    elapsed += TimePoint::from_wall(started.elapsed(), rate);
                }
                _ = rate_rx.changed() => {
                    elapsed += TimePoint::from_wall(started.elapsed(), rate);
                }
                _ = skip_rx.changed() => {
                    elapsed += TimePoint::from_wall(started.elapsed(), rate);
                }
                _ = changed_or_pending(lineage_skip.as_mut()) => {
                    elapsed += TimePoint::from_wall(started.elapsed(), rate);
                }
                _ = self.waiters_changed.notified() => {
                    elapsed += TimePoint::from_wall(started.elapsed(), rate);
                }
            }
        }
    }

    async fn run_phase(
        &self,
        direction: Direction,
        phase: Phase,
        lineage_skip: &mut Option<watch::Receiver<bool>>,
    ) {
        let entry = Boundary::entry(direction);
        let exit = Boundary::exit(direction);
        self.await_barriers(direction, phase, entry).await;
        self.fire(direction, phase, entry);
        self.timed_wait(direction, phase, lineage_skip).await;
        self.await_barriers(direction, phase, exit).await;
        self.fire(direction, phase, exit);
    }

    async fn run(self: Arc<Self>, direction: Direction) -> Result<()> {
        let mut lineage_skip = {
            let mut st = self.state.lock();
            if st.running {
                return Err(CueflowError::Reentrancy {
                    operation: format!("clip {} is already running", self.id),
                });
            }
            st.running = true;
            if direction == Direction::Forward {
                // A fresh forward run re-resolves rate-governed lengths.
                st.resolved_active = None;
            }
            st.lineage.as_ref().map(|l| l.skip.clone())
        };
        // A skip requested for a previous cycle does not carry over.
        self.skip.send_replace(false);
        for phase in Phase::order(direction) {
            self.run_phase(direction, phase, &mut lineage_skip).await;
        }
        self.state.lock().running = false;
        self.settled.send_modify(|v| *v += 1);
        Ok(())
    }
}

/// Await a change on an optional receiver; pend forever when absent so
/// the other select arms stay live.
async fn changed_or_pending(rx: Option<&mut watch::Receiver<bool>>) {
    match rx {
        Some(rx) => {
            let _ = rx.changed().await;
        }
        None => std::future::pending().await,
    }
}

impl Clip for TimerClip {
    fn id(&self) -> Uuid {
        self.inner.id
    }

    fn timing(&self) -> ClipTiming {
        self.inner.state.lock().timing.clone()
    }

    fn schedule(&self) -> Option<ClipSchedule> {
        self.inner.state.lock().schedule
    }

    fn set_schedule(&self, schedule: ClipSchedule) {
        self.inner.state.lock().schedule = Some(schedule);
    }

    fn play(&self) -> BoxFuture<Result<()>> {
        let inner = self.inner.clone();
        Box::pin(inner.run(Direction::Forward))
    }

    fn rewind(&self) -> BoxFuture<Result<()>> {
        let inner = self.inner.clone();
        Box::pin(inner.run(Direction::Backward))
    }

    fn pause(&self) {
        self.inner.paused.send_replace(true);
    }

    fn unpause(&self) {
        self.inner.paused.send_replace(false);
    }

    fn finish(&self) -> BoxFuture<Result<()>> {
        let running = self.inner.state.lock().running;
        if !running {
            return Box::pin(async { Ok(()) });
        }
        // Set before returning: acceleration must not depend on the
        // caller polling the completion future.
        self.inner.skip.send_replace(true);
        let settled = awaited(&self.inner.settled);
        Box::pin(async move {
            settled.await;
            Ok(())
        })
    }

    fn phase_signal(&self, direction: Direction, phase: Phase, point: PhasePoint) -> BoxFuture<()> {
        match point {
            PhasePoint::Begin => {
                awaited(&self.inner.boundaries[cell_index(direction, phase, Boundary::Begin)])
            }
            PhasePoint::End => {
                awaited(&self.inner.boundaries[cell_index(direction, phase, Boundary::End)])
            }
            PhasePoint::Offset(at) => {
                let (tx, _) = watch::channel(0);
                let fut = awaited(&tx);
                self.inner.state.lock().waiters.push(OffsetWaiter {
                    direction,
                    phase,
                    at,
                    tx,
                });
                self.inner.waiters_changed.notify_one();
                fut
            }
        }
    }

    fn add_barrier(
        &self,
        direction: Direction,
        phase: Phase,
        point: PhasePoint,
        barrier: BoxFuture<()>,
    ) {
        let boundary = barrier_boundary(point, direction);
        self.inner
            .state
            .lock()
            .barriers
            .entry(cell_index(direction, phase, boundary))
            .or_default()
            .push(barrier);
    }

    fn use_compounded_playback_rate(&self) {
        self.inner.recompute_rate();
    }

    fn resolved_active_duration(&self) -> Option<TimePoint> {
        let st = self.inner.state.lock();
        match st.timing.timescale {
            Timescale::Duration(d) => Some(d),
            Timescale::Rate { .. } => st.resolved_active,
        }
    }

    fn set_lineage(&self, lineage: ClipLineage) -> Result<()> {
        {
            let mut st = self.inner.state.lock();
            if let Some(existing) = &st.lineage {
                return Err(CueflowError::InvalidChild {
                    child: self.inner.id,
                    reason: format!("already owned by sequence {}", existing.sequence_id),
                });
            }
            st.lineage = Some(lineage);
        }
        self.inner.recompute_rate();
        Ok(())
    }

    fn remove_lineage(&self) {
        self.inner.state.lock().lineage = None;
        self.inner.recompute_rate();
    }
}

//! Sequence: an ordered clip list played or rewound as one step.
//!
//! The orchestrator recomputes groupings via [`grouping::commit`] at the
//! start of every forward play, launches clips on independent tasks, and
//! enforces the precomputed finish orders with barriers. There is no
//! central timing control: each clip runs its own timers and the
//! orchestrator only installs wait-points between them.

use crate::clip::{BoxFuture, ClipHandle, ClipLineage};
use crate::grouping::{self, CommitState, Grouping};
use cueflow_core::{CueflowError, Direction, Phase, PhasePoint, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// A side-effect callback attached to sequence start/finish.
pub type Hook = Box<dyn Fn() + Send + Sync>;

/// A hook with its undo path, fired on the mirrored rewind boundary.
pub struct HookPair {
    pub run: Hook,
    pub undo: Hook,
}

/// Configuration for a sequence.
pub struct SequenceConfig {
    pub description: String,
    /// Tag used by timeline jump-to-tag navigation.
    pub jump_tag: Option<String>,
    /// This sequence plays automatically after its predecessor.
    pub autoplays: bool,
    /// The following sequence plays automatically after this one.
    pub autoplays_next_sequence: bool,
    pub playback_rate: f64,
    /// Fired when playback begins; its undo path fires when a rewind
    /// fully completes.
    pub start_hook: Option<HookPair>,
    /// Fired when playback fully completes; its undo path fires when a
    /// rewind begins.
    pub finish_hook: Option<HookPair>,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            description: String::new(),
            jump_tag: None,
            autoplays: false,
            autoplays_next_sequence: false,
            playback_rate: 1.0,
            start_hook: None,
            finish_hook: None,
        }
    }
}

/// Point-in-time view of a sequence's status flags.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SequenceStatus {
    pub is_paused: bool,
    pub is_running: bool,
    pub in_progress: bool,
    pub is_finished: bool,
    pub was_played: bool,
    pub was_rewound: bool,
    pub using_finish: bool,
    pub locked_structure: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct SeqFlags {
    is_paused: bool,
    in_progress: bool,
    is_finished: bool,
    was_played: bool,
    was_rewound: bool,
    using_finish: bool,
}

struct SeqState {
    clips: Vec<ClipHandle>,
    groupings: Vec<Grouping>,
    /// Currently-playing clips only; pause/unpause/finish broadcasts
    /// target exactly this set, never the full clip list.
    playing: HashMap<Uuid, ClipHandle>,
    flags: SeqFlags,
    playback_rate: f64,
    ancestor_rate: f64,
    timeline_skipping: bool,
    /// Non-owning back-reference to the parent timeline.
    timeline: Option<Uuid>,
    cycle: u64,
}

struct SequenceInner {
    id: Uuid,
    config: SequenceConfig,
    /// Last fully finished cycle number; the fully-finished signal.
    finished: watch::Sender<u64>,
    /// Compounded playback rate published to owned clips.
    rate: watch::Sender<f64>,
    /// Skip state published to owned clips (timeline skipping or an
    /// outstanding finish request).
    skip: watch::Sender<bool>,
    state: Mutex<SeqState>,
}

/// A cheaply clonable handle to a sequence.
#[derive(Clone)]
pub struct Sequence {
    inner: Arc<SequenceInner>,
}

impl Sequence {
    pub(crate) fn new(config: SequenceConfig) -> Self {
        let playback_rate = config.playback_rate;
        Self {
            inner: Arc::new(SequenceInner {
                id: Uuid::new_v4(),
                config,
                finished: watch::channel(0).0,
                rate: watch::channel(playback_rate).0,
                skip: watch::channel(false).0,
                state: Mutex::new(SeqState {
                    clips: Vec::new(),
                    groupings: Vec::new(),
                    playing: HashMap::new(),
                    flags: SeqFlags::default(),
                    playback_rate,
                    ancestor_rate: 1.0,
                    timeline_skipping: false,
                    timeline: None,
                    cycle: 0,
                }),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn description(&self) -> &str {
        &self.inner.config.description
    }

    pub fn jump_tag(&self) -> Option<&str> {
        self.inner.config.jump_tag.as_deref()
    }

    pub fn autoplays(&self) -> bool {
        self.inner.config.autoplays
    }

    pub fn autoplays_next_sequence(&self) -> bool {
        self.inner.config.autoplays_next_sequence
    }

    pub fn clip_count(&self) -> usize {
        self.inner.state.lock().clips.len()
    }

    /// Snapshot of the status flags.
    pub fn status(&self) -> SequenceStatus {
        let st = self.inner.state.lock();
        SequenceStatus {
            is_paused: st.flags.is_paused,
            is_running: st.flags.in_progress && !st.flags.is_paused,
            in_progress: st.flags.in_progress,
            is_finished: st.flags.is_finished,
            was_played: st.flags.was_played,
            was_rewound: st.flags.was_rewound,
            using_finish: st.flags.using_finish,
            locked_structure: st.flags.in_progress || st.flags.was_played,
        }
    }

    /// The grouping records from the most recent commit.
    pub fn groupings(&self) -> Vec<Grouping> {
        self.inner.state.lock().groupings.clone()
    }

    // ── Structural mutation ─────────────────────────────────────

    /// Append a clip. Fails without mutating on a timescale-adjacency
    /// violation, a locked structure, or a clip owned elsewhere.
    pub fn add_clip(&self, clip: ClipHandle) -> Result<()> {
        self.insert_clip(None, clip)
    }

    /// Insert a clip at `index`.
    pub fn add_clip_at(&self, index: usize, clip: ClipHandle) -> Result<()> {
        self.insert_clip(Some(index), clip)
    }

    fn insert_clip(&self, index: Option<usize>, clip: ClipHandle) -> Result<()> {
        let mut st = self.inner.state.lock();
        self.check_unlocked(&st.flags, "add clip")?;
        let index = index.unwrap_or(st.clips.len());
        if index > st.clips.len() {
            return Err(CueflowError::OutOfRange {
                value: index,
                max: st.clips.len(),
            });
        }
        grouping::check_insertion(&st.clips, &clip, index)?;
        clip.set_lineage(ClipLineage {
            sequence_id: self.inner.id,
            compounded_rate: self.inner.rate.subscribe(),
            skip: self.inner.skip.subscribe(),
        })?;
        clip.use_compounded_playback_rate();
        st.clips.insert(index, clip);
        Ok(())
    }

    /// Remove a clip by id. Fails without mutating if the clip is
    /// missing, the structure is locked, or its neighbors would form an
    /// illegal chain.
    pub fn remove_clip(&self, id: Uuid) -> Result<ClipHandle> {
        let mut st = self.inner.state.lock();
        self.check_unlocked(&st.flags, "remove clip")?;
        let index = st
            .clips
            .iter()
            .position(|c| c.id() == id)
            .ok_or_else(|| CueflowError::NotFound {
                what: format!("clip {id}"),
            })?;
        grouping::check_removal(&st.clips, index)?;
        let clip = st.clips.remove(index);
        clip.remove_lineage();
        Ok(clip)
    }

    /// Remove several clips by id, all-or-nothing: every reference is
    /// validated before the list is touched, so a missing id aborts the
    /// whole batch with nothing removed.
    pub fn remove_clips(&self, ids: &[Uuid]) -> Result<Vec<ClipHandle>> {
        let mut st = self.inner.state.lock();
        self.check_unlocked(&st.flags, "remove clips")?;
        let mut indices = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(index) = st.clips.iter().position(|c| c.id() == *id) else {
                warn!(sequence = %self.inner.id, clip = %id,
                      "batch removal aborted before mutation: clip not found");
                return Err(CueflowError::NotFound {
                    what: format!("clip {id}"),
                });
            };
            if indices.contains(&index) {
                warn!(sequence = %self.inner.id, clip = %id,
                      "batch removal aborted before mutation: duplicate clip reference");
                return Err(CueflowError::InvalidChild {
                    child: *id,
                    reason: "referenced more than once in the removal batch".into(),
                });
            }
            indices.push(index);
        }
        let retained: Vec<ClipHandle> = st
            .clips
            .iter()
            .enumerate()
            .filter(|(i, _)| !indices.contains(i))
            .map(|(_, c)| c.clone())
            .collect();
        grouping::check_chain(&retained)?;

        let mut sorted = indices.clone();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        let mut removed_by_index = HashMap::new();
        for i in sorted {
            removed_by_index.insert(i, st.clips.remove(i));
        }
        let removed: Vec<ClipHandle> = indices
            .into_iter()
            .map(|i| removed_by_index.remove(&i).expect("index collected above"))
            .collect();
        for clip in &removed {
            clip.remove_lineage();
        }
        Ok(removed)
    }

    fn check_unlocked(&self, flags: &SeqFlags, operation: &str) -> Result<()> {
        if flags.in_progress || flags.was_played {
            let reason = if flags.in_progress {
                format!("{operation} while playback is in progress")
            } else {
                format!("{operation} after the sequence has been played (rewind it first)")
            };
            return Err(CueflowError::LockedStructure {
                owner: self.inner.id,
                reason,
            });
        }
        Ok(())
    }

    // ── Lineage and rate/skip propagation ───────────────────────

    pub(crate) fn set_lineage(&self, timeline_id: Uuid) -> Result<()> {
        let mut st = self.inner.state.lock();
        if let Some(existing) = st.timeline {
            return Err(CueflowError::InvalidChild {
                child: self.inner.id,
                reason: format!("already owned by timeline {existing}"),
            });
        }
        st.timeline = Some(timeline_id);
        Ok(())
    }

    pub(crate) fn remove_lineage(&self) {
        {
            let mut st = self.inner.state.lock();
            st.timeline = None;
            st.ancestor_rate = 1.0;
            st.timeline_skipping = false;
        }
        self.publish_rate();
        self.publish_skip();
    }

    /// Change the sequence's own playback rate; compounds down to clips.
    pub fn set_playback_rate(&self, rate: f64) {
        self.inner.state.lock().playback_rate = rate;
        self.publish_rate();
    }

    pub(crate) fn set_ancestor_rate(&self, rate: f64) {
        self.inner.state.lock().ancestor_rate = rate;
        self.publish_rate();
    }

    pub(crate) fn set_timeline_skipping(&self, on: bool) {
        self.inner.state.lock().timeline_skipping = on;
        self.publish_skip();
    }

    fn publish_rate(&self) {
        let (compounded, clips) = {
            let st = self.inner.state.lock();
            (st.playback_rate * st.ancestor_rate, st.clips.clone())
        };
        self.inner.rate.send_replace(compounded);
        for clip in &clips {
            clip.use_compounded_playback_rate();
        }
    }

    fn publish_skip(&self) {
        let on = {
            let st = self.inner.state.lock();
            st.timeline_skipping || st.flags.using_finish
        };
        self.inner.skip.send_replace(on);
    }

    // ── Playback ────────────────────────────────────────────────

    /// Play the sequence forward. Idempotent while already in progress:
    /// a reentrant call awaits the existing cycle without re-running
    /// commit or the start hook.
    pub async fn play(&self) -> Result<()> {
        let (cycle, driver) = self.begin_cycle(Direction::Forward);
        if !driver {
            return self.await_finished(cycle).await;
        }
        self.drive(cycle, Direction::Forward).await
    }

    /// Rewind the sequence to its start. No-op if it was never played;
    /// idempotent while a cycle is already in progress.
    pub async fn rewind(&self) -> Result<()> {
        {
            let st = self.inner.state.lock();
            if !st.flags.in_progress && !st.flags.was_played {
                return Ok(());
            }
        }
        let (cycle, driver) = self.begin_cycle(Direction::Backward);
        if !driver {
            return self.await_finished(cycle).await;
        }
        self.drive(cycle, Direction::Backward).await
    }

    fn begin_cycle(&self, direction: Direction) -> (u64, bool) {
        let mut st = self.inner.state.lock();
        if st.flags.in_progress {
            return (st.cycle, false);
        }
        st.cycle += 1;
        st.flags.in_progress = true;
        st.flags.is_finished = false;
        st.playing.clear();
        debug!(sequence = %self.inner.id, cycle = st.cycle, %direction, "cycle started");
        (st.cycle, true)
    }

    async fn drive(&self, cycle: u64, direction: Direction) -> Result<()> {
        let result = match direction {
            Direction::Forward => self.drive_forward().await,
            Direction::Backward => self.drive_backward().await,
        };
        {
            let mut st = self.inner.state.lock();
            st.flags.in_progress = false;
            st.playing.clear();
            st.flags.using_finish = false;
            if result.is_ok() {
                st.flags.is_finished = true;
                match direction {
                    Direction::Forward => {
                        st.flags.was_played = true;
                        st.flags.was_rewound = false;
                    }
                    Direction::Backward => {
                        st.flags.was_played = false;
                        st.flags.was_rewound = true;
                    }
                }
            }
        }
        self.publish_skip();
        self.inner.finished.send_replace(cycle);
        if result.is_ok() {
            match direction {
                Direction::Forward => {
                    if let Some(hook) = &self.inner.config.finish_hook {
                        (hook.run)();
                    }
                }
                Direction::Backward => {
                    if let Some(hook) = &self.inner.config.start_hook {
                        (hook.undo)();
                    }
                }
            }
            debug!(sequence = %self.inner.id, cycle, %direction, "cycle finished");
        }
        result
    }

    async fn drive_forward(&self) -> Result<()> {
        let (clips, groupings) = {
            let mut st = self.inner.state.lock();
            let groupings = grouping::commit(&st.clips);
            st.groupings = groupings.clone();
            (st.clips.clone(), groupings)
        };
        if let Some(hook) = &self.inner.config.start_hook {
            (hook.run)();
        }
        for (index, g) in groupings.iter().enumerate() {
            self.run_grouping_forward(index, g, &clips).await?;
        }
        Ok(())
    }

    async fn run_grouping_forward(
        &self,
        index: usize,
        g: &Grouping,
        clips: &[ClipHandle],
    ) -> Result<()> {
        let mut tasks = Vec::with_capacity(g.members.len());
        match g.commit {
            CommitState::Final => {
                install_forward_barriers(g, clips);
                let mut gate: Option<BoxFuture<()>> = None;
                for &i in &g.members {
                    if let Some(gate) = gate.take() {
                        gate.await;
                    }
                    gate = Some(clips[i].phase_signal(
                        Direction::Forward,
                        Phase::Active,
                        PhasePoint::Begin,
                    ));
                    tasks.push(self.launch(clips[i].clone(), Direction::Forward));
                }
            }
            CommitState::Provisional => {
                // Rate-governed: launch the anchor, finalize the orders
                // once its real timing is resolvable, then proceed.
                let anchor = &clips[g.members[0]];
                let anchor_started =
                    anchor.phase_signal(Direction::Forward, Phase::Active, PhasePoint::Begin);
                tasks.push(self.launch(anchor.clone(), Direction::Forward));
                anchor_started.await;
                let finalized = grouping::commit_for_rate(g, clips);
                self.inner.state.lock().groupings[index] = finalized.clone();
                install_forward_barriers(&finalized, clips);
                let mut gate: Option<BoxFuture<()>> = None;
                for &i in finalized.members.iter().skip(1) {
                    if let Some(gate) = gate.take() {
                        gate.await;
                    }
                    gate = Some(clips[i].phase_signal(
                        Direction::Forward,
                        Phase::Active,
                        PhasePoint::Begin,
                    ));
                    tasks.push(self.launch(clips[i].clone(), Direction::Forward));
                }
            }
        }
        settle(tasks).await
    }

    async fn drive_backward(&self) -> Result<()> {
        let (clips, groupings) = {
            let st = self.inner.state.lock();
            (st.clips.clone(), st.groupings.clone())
        };
        if let Some(hook) = &self.inner.config.finish_hook {
            (hook.undo)();
        }
        for g in groupings.iter().rev() {
            self.run_grouping_backward(g, &clips).await?;
        }
        Ok(())
    }

    async fn run_grouping_backward(&self, g: &Grouping, clips: &[ClipHandle]) -> Result<()> {
        install_backward_barriers(g, clips);
        let mut tasks = Vec::with_capacity(g.members.len());
        let mut later: Option<usize> = None;
        for &i in g.members.iter().rev() {
            if let Some(later) = later {
                rewind_gate(&clips[later], &clips[i]).await;
            }
            tasks.push(self.launch(clips[i].clone(), Direction::Backward));
            later = Some(i);
        }
        settle(tasks).await
    }

    fn launch(&self, clip: ClipHandle, direction: Direction) -> JoinHandle<Result<()>> {
        {
            let mut st = self.inner.state.lock();
            st.playing.insert(clip.id(), clip.clone());
            if st.flags.is_paused {
                // Launched into a paused sequence: freeze immediately.
                clip.pause();
            }
        }
        let seq = self.clone();
        tokio::spawn(async move {
            let result = match direction {
                Direction::Forward => clip.play().await,
                Direction::Backward => clip.rewind().await,
            };
            seq.inner.state.lock().playing.remove(&clip.id());
            result
        })
    }

    // ── Pause / finish ──────────────────────────────────────────

    /// Freeze the currently-playing clips. Effective only while running.
    pub fn pause(&self) {
        let clips = {
            let mut st = self.inner.state.lock();
            if !st.flags.in_progress || st.flags.is_paused {
                return;
            }
            st.flags.is_paused = true;
            st.playing.values().cloned().collect::<Vec<_>>()
        };
        debug!(sequence = %self.inner.id, clips = clips.len(), "paused");
        for clip in clips {
            clip.pause();
        }
    }

    /// Pause regardless of progress. Unlike [`Sequence::pause`] this also
    /// takes effect on a cycle that has not begun yet, so a timeline can
    /// launch a sequence into its own pause and have the clips freeze the
    /// moment they start.
    pub(crate) fn hold_paused(&self) {
        let clips = {
            let mut st = self.inner.state.lock();
            if st.flags.is_paused {
                return;
            }
            st.flags.is_paused = true;
            st.playing.values().cloned().collect::<Vec<_>>()
        };
        debug!(sequence = %self.inner.id, clips = clips.len(), "held paused");
        for clip in clips {
            clip.pause();
        }
    }

    /// Resume from pause. Effective only while paused.
    pub fn unpause(&self) {
        let clips = {
            let mut st = self.inner.state.lock();
            if !st.flags.is_paused {
                return;
            }
            st.flags.is_paused = false;
            st.playing.values().cloned().collect::<Vec<_>>()
        };
        debug!(sequence = %self.inner.id, clips = clips.len(), "unpaused");
        for clip in clips {
            clip.unpause();
        }
    }

    /// Force the sequence to its forward-finished end without further
    /// real-time delay. Single-flight: a reentrant call awaits the same
    /// outstanding completion. No-op when already finished forward or
    /// currently paused.
    pub async fn finish(&self) -> Result<()> {
        enum Mode {
            Noop,
            Accelerate { cycle: u64, playing: Vec<ClipHandle> },
            PlaySkipped,
        }
        let mode = {
            let mut st = self.inner.state.lock();
            if st.flags.is_paused {
                Mode::Noop
            } else if st.flags.using_finish {
                let cycle = if st.flags.in_progress {
                    st.cycle
                } else {
                    st.cycle + 1
                };
                Mode::Accelerate {
                    cycle,
                    playing: Vec::new(),
                }
            } else if st.flags.in_progress {
                st.flags.using_finish = true;
                Mode::Accelerate {
                    cycle: st.cycle,
                    playing: st.playing.values().cloned().collect(),
                }
            } else if st.flags.was_played && st.flags.is_finished {
                Mode::Noop
            } else {
                st.flags.using_finish = true;
                Mode::PlaySkipped
            }
        };
        match mode {
            Mode::Noop => Ok(()),
            Mode::Accelerate { cycle, playing } => {
                self.publish_skip();
                // Only the currently-playing grouping is forced; later
                // groupings observe the skip state once launched.
                for clip in playing {
                    drop(clip.finish());
                }
                self.await_finished(cycle).await
            }
            Mode::PlaySkipped => {
                self.publish_skip();
                self.play().await
            }
        }
    }

    async fn await_finished(&self, cycle: u64) -> Result<()> {
        let mut rx = self.inner.finished.subscribe();
        while *rx.borrow_and_update() < cycle {
            if rx.changed().await.is_err() {
                return Err(CueflowError::Internal(
                    "sequence dropped mid-cycle".into(),
                ));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequence")
            .field("id", &self.inner.id)
            .field("description", &self.inner.config.description)
            .finish()
    }
}

async fn settle(tasks: Vec<JoinHandle<Result<()>>>) -> Result<()> {
    for task in tasks {
        task.await
            .map_err(|e| CueflowError::Internal(format!("clip task failed: {e}")))??;
    }
    Ok(())
}

/// Install the forward finish-order barriers: each non-first member (per
/// order) may not complete the boundary before its predecessor signals.
fn install_forward_barriers(g: &Grouping, clips: &[ClipHandle]) {
    for pair in g.active_finish.windows(2) {
        let signal = clips[pair[0]].phase_signal(Direction::Forward, Phase::Active, PhasePoint::End);
        clips[pair[1]].add_barrier(Direction::Forward, Phase::Active, PhasePoint::End, signal);
    }
    for pair in g.end_delay_finish.windows(2) {
        let signal =
            clips[pair[0]].phase_signal(Direction::Forward, Phase::EndDelay, PhasePoint::End);
        clips[pair[1]].add_barrier(Direction::Forward, Phase::EndDelay, PhasePoint::End, signal);
    }
}

/// Install the rewind finish-order barriers per backward-active-finish
/// order: a member may not finish rewinding its active phase before its
/// predecessor in that order signals.
fn install_backward_barriers(g: &Grouping, clips: &[ClipHandle]) {
    for pair in g.backward_active_finish.windows(2) {
        let signal =
            clips[pair[0]].phase_signal(Direction::Backward, Phase::Active, PhasePoint::Begin);
        clips[pair[1]].add_barrier(Direction::Backward, Phase::Active, PhasePoint::Begin, signal);
    }
}

/// Launch gate between two temporally adjacent members during rewind.
///
/// If the earlier clip's span overlaps the later clip's start, the
/// earlier rewind starts at the partial offset where the later clip's
/// rewind crosses the earlier clip's full finish; otherwise it waits for
/// the later clip to fully reach the beginning of its delay phase.
fn rewind_gate(later: &ClipHandle, earlier: &ClipHandle) -> BoxFuture<()> {
    match (later.schedule(), earlier.schedule()) {
        (Some(ls), Some(es)) if es.full_finish > ls.full_start => {
            let (phase, point) = ls.locate(es.full_finish);
            later.phase_signal(Direction::Backward, phase, point)
        }
        _ => later.phase_signal(Direction::Backward, Phase::Delay, PhasePoint::Begin),
    }
}

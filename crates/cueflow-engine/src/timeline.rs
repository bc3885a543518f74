//! Timeline: an ordered sequence list driven by a navigation cursor.
//!
//! The cursor sits between sequences: `loaded` sequences are in the past
//! (played, immutable), the sequence at the cursor is the next to play.
//! All cursor movement goes through step or jump; a jump is accelerated
//! stepping, never a teleport, so every traversed sequence fully plays
//! or rewinds.

use crate::sequence::Sequence;
use cueflow_core::{CueflowError, Direction, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Configuration for a timeline.
pub struct TimelineConfig {
    pub name: String,
    /// Raise per-step diagnostics from `debug!` to `info!`.
    pub debug_mode: bool,
    pub playback_rate: f64,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            debug_mode: false,
            playback_rate: 1.0,
        }
    }
}

/// How a jump selects a sequence by tag.
pub enum TagMatcher {
    /// Exact string equality against each sequence's jump tag.
    Exact(String),
    /// Arbitrary predicate over each sequence's jump tag.
    Predicate(Box<dyn Fn(&str) -> bool + Send + Sync>),
}

impl TagMatcher {
    fn matches(&self, tag: &str) -> bool {
        match self {
            Self::Exact(s) => s == tag,
            Self::Predicate(f) => f(tag),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Exact(s) => format!("sequence tag {s:?}"),
            Self::Predicate(_) => "sequence tag matching predicate".to_string(),
        }
    }
}

impl From<&str> for TagMatcher {
    fn from(tag: &str) -> Self {
        Self::Exact(tag.to_string())
    }
}

/// Where a tag search scans, relative to the list or the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchRange {
    #[default]
    ForwardFromBeginning,
    BackwardFromEnd,
    ForwardFromCursor,
    BackwardFromCursor,
}

/// Whether a jump keeps stepping past its target while the autoplay
/// chain holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JumpAutoplay {
    #[default]
    None,
    Forward,
    Backward,
}

/// Options shared by the jump entry points.
#[derive(Default)]
pub struct JumpOptions {
    pub search: SearchRange,
    /// Entries skipped at the start of the search scan.
    pub search_offset: usize,
    /// Added to the resolved index before validation.
    pub target_offset: isize,
    pub autoplay: JumpAutoplay,
}

/// Absolute jump destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Beginning,
    End,
    Index(usize),
}

/// Point-in-time view of a timeline's navigation state.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TimelineStatus {
    pub is_animating: bool,
    pub is_paused: bool,
    pub skipping_on: bool,
    pub current_direction: Direction,
    pub is_jumping: bool,
    /// 1-based position shown to callers; equals cursor + 1.
    pub step_number: usize,
    pub at_beginning: bool,
    pub at_end: bool,
}

struct TlState {
    sequences: Vec<Sequence>,
    /// Cursor in [0, sequences.len()]: count of sequences in the past.
    loaded: usize,
    is_animating: bool,
    is_jumping: bool,
    is_paused: bool,
    skipping: bool,
    direction: Direction,
    playback_rate: f64,
    /// Currently-playing sequences only; pause broadcasts target this.
    playing: HashMap<Uuid, Sequence>,
}

struct TimelineInner {
    id: Uuid,
    name: String,
    debug_mode: bool,
    state: Mutex<TlState>,
}

/// A cheaply clonable handle to a timeline.
#[derive(Clone)]
pub struct Timeline {
    inner: Arc<TimelineInner>,
}

impl Timeline {
    pub(crate) fn new(config: TimelineConfig) -> Self {
        Self {
            inner: Arc::new(TimelineInner {
                id: Uuid::new_v4(),
                name: config.name,
                debug_mode: config.debug_mode,
                state: Mutex::new(TlState {
                    sequences: Vec::new(),
                    loaded: 0,
                    is_animating: false,
                    is_jumping: false,
                    is_paused: false,
                    skipping: false,
                    direction: Direction::Forward,
                    playback_rate: config.playback_rate,
                    playing: HashMap::new(),
                }),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn sequence_count(&self) -> usize {
        self.inner.state.lock().sequences.len()
    }

    /// Current cursor position in [0, sequence_count].
    pub fn cursor(&self) -> usize {
        self.inner.state.lock().loaded
    }

    /// Snapshot of the navigation state.
    pub fn status(&self) -> TimelineStatus {
        let st = self.inner.state.lock();
        TimelineStatus {
            is_animating: st.is_animating,
            is_paused: st.is_paused,
            skipping_on: st.skipping,
            current_direction: st.direction,
            is_jumping: st.is_jumping,
            step_number: st.loaded + 1,
            at_beginning: st.loaded == 0,
            at_end: st.loaded == st.sequences.len(),
        }
    }

    // ── Structural mutation ─────────────────────────────────────

    /// Append a sequence to the end of the list.
    pub fn add_sequence(&self, sequence: Sequence) -> Result<()> {
        self.add_sequences(vec![sequence])
    }

    /// Append several sequences, atomically: if any is already owned
    /// elsewhere, none are attached.
    pub fn add_sequences(&self, sequences: Vec<Sequence>) -> Result<()> {
        let mut st = self.inner.state.lock();
        self.check_idle_structure(&st)?;
        let mut attached: Vec<Sequence> = Vec::with_capacity(sequences.len());
        for seq in &sequences {
            if let Err(e) = seq.set_lineage(self.inner.id) {
                for done in &attached {
                    done.remove_lineage();
                }
                return Err(e);
            }
            attached.push(seq.clone());
        }
        for seq in &sequences {
            seq.set_ancestor_rate(st.playback_rate);
            seq.set_timeline_skipping(st.skipping);
        }
        st.sequences.extend(sequences);
        Ok(())
    }

    /// Remove every sequence from `start_index` to the end. Sequences at
    /// or before the cursor are in the past and cannot be removed.
    pub fn remove_sequences_at(&self, start_index: usize) -> Result<Vec<Sequence>> {
        let mut st = self.inner.state.lock();
        self.check_idle_structure(&st)?;
        if start_index >= st.sequences.len() {
            return Err(CueflowError::OutOfRange {
                value: start_index,
                max: st.sequences.len().saturating_sub(1),
            });
        }
        if st.loaded > 0 && start_index <= st.loaded - 1 {
            return Err(CueflowError::TimeParadox {
                index: start_index,
                loaded: st.loaded,
            });
        }
        let removed = st.sequences.split_off(start_index);
        for seq in &removed {
            seq.remove_lineage();
        }
        Ok(removed)
    }

    fn check_idle_structure(&self, st: &TlState) -> Result<()> {
        if st.is_animating || st.is_jumping {
            return Err(CueflowError::LockedStructure {
                owner: self.inner.id,
                reason: "structural mutation while navigation is in progress".into(),
            });
        }
        Ok(())
    }

    // ── Rate / pause / skip ─────────────────────────────────────

    /// Change the timeline's playback rate; compounds down through every
    /// sequence to its clips.
    pub fn set_playback_rate(&self, rate: f64) {
        let sequences = {
            let mut st = self.inner.state.lock();
            st.playback_rate = rate;
            st.sequences.clone()
        };
        for seq in &sequences {
            seq.set_ancestor_rate(rate);
        }
    }

    /// Freeze the currently-playing sequences.
    pub fn pause(&self) {
        let playing = {
            let mut st = self.inner.state.lock();
            if st.is_paused {
                return;
            }
            st.is_paused = true;
            st.playing.values().cloned().collect::<Vec<_>>()
        };
        debug!(timeline = %self.inner.id, "paused");
        for seq in playing {
            // hold_paused rather than pause: a sequence a step has
            // launched may not have begun its cycle yet, and it must
            // still come up frozen.
            seq.hold_paused();
        }
    }

    /// Resume from pause.
    pub fn unpause(&self) {
        let playing = {
            let mut st = self.inner.state.lock();
            if !st.is_paused {
                return;
            }
            st.is_paused = false;
            st.playing.values().cloned().collect::<Vec<_>>()
        };
        debug!(timeline = %self.inner.id, "unpaused");
        for seq in playing {
            seq.unpause();
        }
    }

    /// Toggle skip state; returns the new state. Enabling mid-animation
    /// while unpaused immediately forces the in-progress sequences to
    /// finish; clips also observe the state to self-accelerate.
    pub fn toggle_skipping(&self) -> bool {
        let on = !self.inner.state.lock().skipping;
        self.set_skipping(on);
        on
    }

    /// Set skip state explicitly.
    pub fn set_skipping(&self, on: bool) {
        let (sequences, accelerate) = {
            let mut st = self.inner.state.lock();
            st.skipping = on;
            let accelerate = on && st.is_animating && !st.is_paused;
            let targets = if accelerate {
                st.playing.values().cloned().collect::<Vec<_>>()
            } else {
                Vec::new()
            };
            (st.sequences.clone(), targets)
        };
        for seq in &sequences {
            seq.set_timeline_skipping(on);
        }
        for seq in accelerate {
            tokio::spawn(async move {
                let _ = seq.finish().await;
            });
        }
    }

    // ── Stepping ────────────────────────────────────────────────

    /// Advance the cursor by playing (forward) or rewinding (backward)
    /// sequences, repeating while the autoplay chain holds. Rejects when
    /// paused, already navigating, or at the relevant edge.
    pub async fn step(&self, direction: Direction) -> Result<()> {
        self.begin_animation(direction)?;
        let result = self.run_steps(direction).await;
        self.inner.state.lock().is_animating = false;
        result
    }

    fn begin_animation(&self, direction: Direction) -> Result<()> {
        let mut st = self.inner.state.lock();
        if st.is_paused {
            return Err(CueflowError::Reentrancy {
                operation: "step while paused".into(),
            });
        }
        if st.is_animating || st.is_jumping {
            return Err(CueflowError::Reentrancy {
                operation: "step while navigation is in progress".into(),
            });
        }
        match direction {
            Direction::Forward if st.loaded == st.sequences.len() => {
                return Err(CueflowError::OutOfRange {
                    value: st.loaded,
                    max: st.sequences.len(),
                });
            }
            Direction::Backward if st.loaded == 0 => {
                return Err(CueflowError::OutOfRange {
                    value: 0,
                    max: st.sequences.len(),
                });
            }
            _ => {}
        }
        st.is_animating = true;
        st.direction = direction;
        if self.inner.debug_mode {
            info!(timeline = %self.inner.id, %direction, cursor = st.loaded, "step started");
        } else {
            debug!(timeline = %self.inner.id, %direction, cursor = st.loaded, "step started");
        }
        Ok(())
    }

    async fn run_steps(&self, direction: Direction) -> Result<()> {
        match direction {
            Direction::Forward => {
                self.advance().await?;
                while self.chain_holds() {
                    self.advance().await?;
                }
            }
            Direction::Backward => {
                self.retreat().await?;
                while self.chain_holds() {
                    self.retreat().await?;
                }
            }
        }
        Ok(())
    }

    /// Play the sequence at the cursor, then move the cursor past it.
    async fn advance(&self) -> Result<()> {
        let seq = {
            let mut st = self.inner.state.lock();
            let seq = st.sequences[st.loaded].clone();
            st.playing.insert(seq.id(), seq.clone());
            if st.is_paused {
                // A pause can land between steps of an autoplay chain:
                // the next sequence still launches, but frozen.
                seq.hold_paused();
            }
            seq
        };
        let result = seq.play().await;
        let mut st = self.inner.state.lock();
        st.playing.remove(&seq.id());
        if result.is_ok() {
            st.loaded += 1;
        }
        result
    }

    /// Move the cursor back over the previous sequence, then rewind it.
    async fn retreat(&self) -> Result<()> {
        let seq = {
            let mut st = self.inner.state.lock();
            st.loaded -= 1;
            let seq = st.sequences[st.loaded].clone();
            st.playing.insert(seq.id(), seq.clone());
            if st.is_paused {
                seq.hold_paused();
            }
            seq
        };
        let result = seq.rewind().await;
        self.inner.state.lock().playing.remove(&seq.id());
        result
    }

    /// Autoplay continuation at the current cursor: the pair straddling
    /// the cursor chains if the one before declares it autoplays the
    /// next, or the one after declares it autoplays.
    fn chain_holds(&self) -> bool {
        let st = self.inner.state.lock();
        let i = st.loaded;
        i > 0
            && i < st.sequences.len()
            && (st.sequences[i - 1].autoplays_next_sequence() || st.sequences[i].autoplays())
    }

    // ── Jumping ─────────────────────────────────────────────────

    /// Jump to the first sequence whose jump tag matches, per the search
    /// range in `options`. The cursor lands just before the match, so the
    /// matched sequence is the next to play.
    pub async fn jump_to_sequence_tag(
        &self,
        matcher: impl Into<TagMatcher>,
        options: JumpOptions,
    ) -> Result<()> {
        let matcher = matcher.into();
        let target = self.resolve_tag(&matcher, &options)?;
        info!(timeline = %self.inner.id, target, "jumping to tag");
        self.jump(target, options.autoplay).await
    }

    /// Jump to an absolute position.
    pub async fn jump_to_position(&self, position: Position, options: JumpOptions) -> Result<()> {
        let target = self.resolve_position(position, &options)?;
        info!(timeline = %self.inner.id, target, "jumping to position");
        self.jump(target, options.autoplay).await
    }

    fn resolve_tag(&self, matcher: &TagMatcher, options: &JumpOptions) -> Result<usize> {
        let st = self.inner.state.lock();
        let len = st.sequences.len();
        if len == 0 {
            return Err(CueflowError::NotFound {
                what: matcher.describe(),
            });
        }
        let cursor = st.loaded.min(len - 1);
        let order: Vec<usize> = match options.search {
            SearchRange::ForwardFromBeginning => (0..len).collect(),
            SearchRange::BackwardFromEnd => (0..len).rev().collect(),
            SearchRange::ForwardFromCursor => (cursor..len).collect(),
            SearchRange::BackwardFromCursor => (0..=cursor).rev().collect(),
        };
        if options.search_offset > order.len() {
            return Err(CueflowError::OutOfRange {
                value: options.search_offset,
                max: order.len(),
            });
        }
        let found = order
            .into_iter()
            .skip(options.search_offset)
            .find(|&i| {
                st.sequences[i]
                    .jump_tag()
                    .is_some_and(|tag| matcher.matches(tag))
            })
            .ok_or_else(|| CueflowError::NotFound {
                what: matcher.describe(),
            })?;
        Self::offset_target(found, options.target_offset, len)
    }

    fn resolve_position(&self, position: Position, options: &JumpOptions) -> Result<usize> {
        let st = self.inner.state.lock();
        let len = st.sequences.len();
        let base = match position {
            Position::Beginning => 0,
            Position::End => len,
            Position::Index(i) => i,
        };
        Self::offset_target(base, options.target_offset, len)
    }

    fn offset_target(base: usize, offset: isize, len: usize) -> Result<usize> {
        let target = base as isize + offset;
        if target < 0 || target > len as isize {
            return Err(CueflowError::OutOfRange {
                value: target.max(0) as usize,
                max: len,
            });
        }
        Ok(target as usize)
    }

    /// Drive the cursor to `target` by repeated stepping, with skip
    /// styling forced on and pause lifted for the duration.
    async fn jump(&self, target: usize, autoplay: JumpAutoplay) -> Result<()> {
        let (restore_paused, already_skipping) = {
            let mut st = self.inner.state.lock();
            if st.is_animating || st.is_jumping {
                return Err(CueflowError::Reentrancy {
                    operation: "jump while navigation is in progress".into(),
                });
            }
            st.is_jumping = true;
            let restore = (st.is_paused, st.skipping);
            st.is_paused = false;
            restore
        };
        if !already_skipping {
            self.set_skipping(true);
        }
        let result = self.drive_to(target, autoplay).await;
        if !already_skipping {
            self.set_skipping(false);
        }
        {
            let mut st = self.inner.state.lock();
            st.is_paused = restore_paused;
            st.is_jumping = false;
        }
        result
    }

    async fn drive_to(&self, target: usize, autoplay: JumpAutoplay) -> Result<()> {
        loop {
            let cursor = self.inner.state.lock().loaded;
            if cursor < target {
                self.inner.state.lock().direction = Direction::Forward;
                self.advance().await?;
            } else if cursor > target {
                self.inner.state.lock().direction = Direction::Backward;
                self.retreat().await?;
            } else {
                break;
            }
        }
        match autoplay {
            JumpAutoplay::None => {}
            JumpAutoplay::Forward => {
                while self.chain_holds() {
                    self.advance().await?;
                }
            }
            JumpAutoplay::Backward => {
                while self.chain_holds() {
                    self.retreat().await?;
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Timeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timeline")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::{ClipTiming, Timescale};
    use crate::sequence::SequenceConfig;
    use crate::timer_clip::TimerClip;
    use cueflow_core::TimePoint;
    use std::time::Duration as StdDuration;
    use tokio::time::Instant;

    fn sequence(active_ms: i64, config: SequenceConfig) -> Sequence {
        let seq = Sequence::new(config);
        seq.add_clip(Arc::new(TimerClip::new(ClipTiming {
            timescale: Timescale::Duration(TimePoint::from_millis(active_ms)),
            ..Default::default()
        })))
        .unwrap();
        seq
    }

    fn tagged(tag: &str) -> Sequence {
        sequence(
            10,
            SequenceConfig {
                jump_tag: Some(tag.to_string()),
                ..Default::default()
            },
        )
    }

    fn abc_timeline() -> (Timeline, Vec<Sequence>) {
        // B autoplays after A; C requires an explicit step.
        let a = sequence(10, SequenceConfig::default());
        let b = sequence(
            10,
            SequenceConfig {
                autoplays: true,
                ..Default::default()
            },
        );
        let c = sequence(10, SequenceConfig::default());
        let tl = Timeline::new(TimelineConfig::default());
        tl.add_sequences(vec![a.clone(), b.clone(), c.clone()])
            .unwrap();
        (tl, vec![a, b, c])
    }

    #[tokio::test(start_paused = true)]
    async fn step_forward_chains_through_autoplay() {
        let (tl, seqs) = abc_timeline();
        tl.step(Direction::Forward).await.unwrap();
        let status = tl.status();
        assert_eq!(tl.cursor(), 2);
        assert_eq!(status.step_number, 3);
        assert!(!status.at_end);
        assert!(seqs[0].status().was_played);
        assert!(seqs[1].status().was_played);
        assert!(!seqs[2].status().was_played);

        tl.step(Direction::Forward).await.unwrap();
        assert!(tl.status().at_end);
        assert!(seqs[2].status().was_played);
    }

    #[tokio::test(start_paused = true)]
    async fn step_backward_mirrors_the_chain() {
        let (tl, seqs) = abc_timeline();
        tl.step(Direction::Forward).await.unwrap();
        assert_eq!(tl.cursor(), 2);
        tl.step(Direction::Backward).await.unwrap();
        // Rewinding B chains back over A via B's autoplay flag.
        assert_eq!(tl.cursor(), 0);
        assert!(tl.status().at_beginning);
        assert!(seqs[0].status().was_rewound);
        assert!(seqs[1].status().was_rewound);
    }

    #[tokio::test(start_paused = true)]
    async fn step_rejects_at_edges_and_while_busy() {
        let (tl, _) = abc_timeline();
        let err = tl.step(Direction::Backward).await.unwrap_err();
        assert!(matches!(err, CueflowError::OutOfRange { .. }));

        let stepping = tokio::spawn({
            let tl = tl.clone();
            async move { tl.step(Direction::Forward).await }
        });
        tokio::time::sleep(StdDuration::from_millis(1)).await;
        let err = tl.step(Direction::Forward).await.unwrap_err();
        assert!(matches!(err, CueflowError::Reentrancy { .. }));
        stepping.await.unwrap().unwrap();

        tl.pause();
        let err = tl.step(Direction::Forward).await.unwrap_err();
        assert!(matches!(err, CueflowError::Reentrancy { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_freezes_the_playing_sequence() {
        let (tl, _) = abc_timeline();
        let stepping = tokio::spawn({
            let tl = tl.clone();
            async move { tl.step(Direction::Forward).await }
        });
        let started = Instant::now();
        tokio::time::sleep(StdDuration::from_millis(5)).await;
        tl.pause();
        tokio::time::sleep(StdDuration::from_millis(100)).await;
        tl.unpause();
        stepping.await.unwrap().unwrap();
        // A and B nominally take 20ms; the pause adds 100ms.
        assert_eq!(started.elapsed(), StdDuration::from_millis(120));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_at_a_chain_boundary_holds_the_next_sequence() {
        let (tl, seqs) = abc_timeline();
        let stepping = tokio::spawn({
            let tl = tl.clone();
            async move { tl.step(Direction::Forward).await }
        });
        let started = Instant::now();
        // Land the pause exactly when A finishes, before B's cycle has
        // made any progress.
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        tl.pause();
        tokio::time::sleep(StdDuration::from_millis(100)).await;
        // B launched into the pause and must not have run.
        assert!(!seqs[1].status().was_played);
        tl.unpause();
        stepping.await.unwrap().unwrap();
        assert!(seqs[1].status().was_played);
        assert_eq!(tl.cursor(), 2);
        assert_eq!(started.elapsed(), StdDuration::from_millis(120));
    }

    #[tokio::test(start_paused = true)]
    async fn enabling_skip_mid_animation_accelerates() {
        let tl = Timeline::new(TimelineConfig::default());
        let slow = sequence(10_000, SequenceConfig::default());
        tl.add_sequence(slow).unwrap();
        let stepping = tokio::spawn({
            let tl = tl.clone();
            async move { tl.step(Direction::Forward).await }
        });
        tokio::time::sleep(StdDuration::from_millis(5)).await;
        let started = Instant::now();
        assert!(tl.toggle_skipping());
        stepping.await.unwrap().unwrap();
        assert_eq!(started.elapsed(), StdDuration::ZERO);
        assert!(tl.status().skipping_on);
    }

    #[tokio::test(start_paused = true)]
    async fn jump_to_tag_plays_every_traversed_sequence() {
        let tl = Timeline::new(TimelineConfig::default());
        let seqs = vec![tagged("intro"), tagged("verse"), tagged("chorus")];
        tl.add_sequences(seqs.clone()).unwrap();
        let started = Instant::now();
        tl.jump_to_sequence_tag("chorus", JumpOptions::default())
            .await
            .unwrap();
        // Skip styling was forced: traversal consumed no wall time.
        assert_eq!(started.elapsed(), StdDuration::ZERO);
        assert_eq!(tl.cursor(), 2);
        assert!(seqs[0].status().was_played);
        assert!(seqs[1].status().was_played);
        assert!(!seqs[2].status().was_played);
        // Skip state restored afterward.
        assert!(!tl.status().skipping_on);
        assert!(!tl.status().is_jumping);
    }

    #[tokio::test(start_paused = true)]
    async fn jump_to_missing_tag_fails_before_moving() {
        let tl = Timeline::new(TimelineConfig::default());
        tl.add_sequences(vec![tagged("intro"), tagged("verse")])
            .unwrap();
        let err = tl
            .jump_to_sequence_tag("bridge", JumpOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CueflowError::NotFound { .. }));
        assert_eq!(tl.cursor(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn jump_backward_rewinds_traversed_sequences() {
        let tl = Timeline::new(TimelineConfig::default());
        let seqs = vec![tagged("intro"), tagged("verse"), tagged("chorus")];
        tl.add_sequences(seqs.clone()).unwrap();
        tl.jump_to_position(Position::End, JumpOptions::default())
            .await
            .unwrap();
        assert!(tl.status().at_end);
        tl.jump_to_position(Position::Beginning, JumpOptions::default())
            .await
            .unwrap();
        assert!(tl.status().at_beginning);
        assert!(seqs.iter().all(|s| s.status().was_rewound));
    }

    #[tokio::test(start_paused = true)]
    async fn jump_search_ranges_resolve_distinctly() {
        let tl = Timeline::new(TimelineConfig::default());
        tl.add_sequences(vec![tagged("x"), tagged("y"), tagged("x")])
            .unwrap();
        tl.jump_to_sequence_tag(
            "x",
            JumpOptions {
                search: SearchRange::BackwardFromEnd,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(tl.cursor(), 2);
        tl.jump_to_sequence_tag(
            "x",
            JumpOptions {
                search: SearchRange::ForwardFromBeginning,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(tl.cursor(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn target_offset_is_validated_before_moving() {
        let tl = Timeline::new(TimelineConfig::default());
        tl.add_sequences(vec![tagged("x"), tagged("y")]).unwrap();
        let err = tl
            .jump_to_position(
                Position::End,
                JumpOptions {
                    target_offset: 1,
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CueflowError::OutOfRange { .. }));
        assert_eq!(tl.cursor(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn removing_played_sequences_is_a_paradox() {
        let (tl, _) = abc_timeline();
        tl.step(Direction::Forward).await.unwrap();
        assert_eq!(tl.cursor(), 2);
        let err = tl.remove_sequences_at(0).unwrap_err();
        assert!(matches!(err, CueflowError::TimeParadox { .. }));
        assert_eq!(tl.sequence_count(), 3);
        // The unplayed tail is removable.
        let removed = tl.remove_sequences_at(2).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(tl.sequence_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn structural_mutation_rejected_mid_animation() {
        let (tl, _) = abc_timeline();
        let stepping = tokio::spawn({
            let tl = tl.clone();
            async move { tl.step(Direction::Forward).await }
        });
        tokio::time::sleep(StdDuration::from_millis(1)).await;
        let err = tl
            .add_sequence(sequence(10, SequenceConfig::default()))
            .unwrap_err();
        assert!(matches!(err, CueflowError::LockedStructure { .. }));
        stepping.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn add_sequences_is_all_or_nothing() {
        let (tl, _) = abc_timeline();
        let other = Timeline::new(TimelineConfig::default());
        let fresh = sequence(10, SequenceConfig::default());
        let owned = sequence(10, SequenceConfig::default());
        tl.add_sequence(owned.clone()).unwrap();
        let err = other.add_sequences(vec![fresh.clone(), owned]).unwrap_err();
        assert!(matches!(err, CueflowError::InvalidChild { .. }));
        assert_eq!(other.sequence_count(), 0);
        // The rolled-back sequence is attachable again.
        assert!(other.add_sequence(fresh).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn timeline_rate_compounds_to_clips() {
        let tl = Timeline::new(TimelineConfig::default());
        tl.add_sequence(sequence(100, SequenceConfig::default()))
            .unwrap();
        tl.set_playback_rate(2.0);
        let started = Instant::now();
        tl.step(Direction::Forward).await.unwrap();
        assert_eq!(started.elapsed(), StdDuration::from_millis(50));
    }
}

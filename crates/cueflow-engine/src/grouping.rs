//! The commit algorithm: partitioning a sequence's clips into parallel
//! groupings and computing per-clip offsets and cross-clip finish orders.
//!
//! A grouping is a maximal run of clips chained to start together: a clip
//! continues the current run iff it is first overall, declares
//! `starts_with_previous`, or follows a predecessor declaring
//! `starts_next_clip_too`. Each grouping record carries the four orders
//! the orchestrator needs; all comparisons are exact rational time, so
//! ties break deterministically on insertion order (the sorts are stable).

use crate::clip::{ClipHandle, ClipSchedule, TimescaleKind};
use cueflow_core::{CueflowError, Result, TimePoint};
use smallvec::SmallVec;

/// Clip indices (into the owning sequence's clip list) in some order.
pub type OrderList = SmallVec<[usize; 4]>;

/// Commit state of a grouping's finish orders.
///
/// Duration-governed groupings are final as soon as they are committed.
/// Rate-governed groupings carry provisional orders until the run has
/// begun executing and real timing is known, at which point
/// [`commit_for_rate`] finalizes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    Provisional,
    Final,
}

/// One grouping record: its members plus the derived orders.
#[derive(Debug, Clone)]
pub struct Grouping {
    /// Members in insertion order; this is also the launch order.
    pub members: OrderList,
    /// Ascending by predicted active-finish time.
    pub active_finish: OrderList,
    /// Reversed end-delay-finish order, re-sorted by descending
    /// active-start time. Governs rewind finish ordering for
    /// overlapping unequal-length clips.
    pub backward_active_finish: OrderList,
    /// Ascending by predicted full (end-delay-inclusive) finish time.
    pub end_delay_finish: OrderList,
    /// Timescale kind shared by every member (adjacency invariant).
    pub kind: TimescaleKind,
    /// Whether the finish orders are provisional or final.
    pub commit: CommitState,
}

/// Whether two adjacent clips are chained into the same run.
fn chained(prev: &ClipHandle, next: &ClipHandle) -> bool {
    prev.timing().starts_next_clip_too || next.timing().starts_with_previous
}

fn kind_of(clip: &ClipHandle) -> TimescaleKind {
    clip.timing().timescale.kind()
}

/// Validate one adjacent pair: chained clips must share a timescale kind.
fn check_pair(prev: &ClipHandle, next: &ClipHandle) -> Result<()> {
    if chained(prev, next) && kind_of(prev) != kind_of(next) {
        return Err(CueflowError::TimescaleAdjacency {
            first: prev.id(),
            second: next.id(),
        });
    }
    Ok(())
}

/// Timescale-adjacency check for inserting `candidate` at `index`.
/// Runs before mutation; a violation rejects the insertion atomically.
pub fn check_insertion(clips: &[ClipHandle], candidate: &ClipHandle, index: usize) -> Result<()> {
    if index > 0 {
        check_pair(&clips[index - 1], candidate)?;
    }
    if index < clips.len() {
        check_pair(candidate, &clips[index])?;
    }
    Ok(())
}

/// Timescale-adjacency check for removing the clip at `index`: the two
/// clips that would become neighbors must remain compatible.
pub fn check_removal(clips: &[ClipHandle], index: usize) -> Result<()> {
    if index > 0 && index + 1 < clips.len() {
        check_pair(&clips[index - 1], &clips[index + 1])?;
    }
    Ok(())
}

/// Validate every adjacent pair of a prospective clip list.
pub fn check_chain(clips: &[ClipHandle]) -> Result<()> {
    for pair in clips.windows(2) {
        check_pair(&pair[0], &pair[1])?;
    }
    Ok(())
}

/// Derive the three finish orders from predicted schedules.
fn derive_orders(predicted: &[(usize, ClipSchedule)]) -> (OrderList, OrderList, OrderList) {
    let mut by_active_finish = predicted.to_vec();
    by_active_finish.sort_by(|a, b| a.1.active_finish.cmp(&b.1.active_finish));

    let mut by_full_finish = predicted.to_vec();
    by_full_finish.sort_by(|a, b| a.1.full_finish.cmp(&b.1.full_finish));

    let mut backward: Vec<_> = by_full_finish.iter().rev().copied().collect();
    backward.sort_by(|a, b| b.1.active_start.cmp(&a.1.active_start));

    (
        by_active_finish.iter().map(|e| e.0).collect(),
        backward.iter().map(|e| e.0).collect(),
        by_full_finish.iter().map(|e| e.0).collect(),
    )
}

fn close_run(clips: &[ClipHandle], members: OrderList, watermark: TimePoint) -> (Grouping, TimePoint) {
    let kind = kind_of(&clips[members[0]]);
    let predicted: Vec<(usize, ClipSchedule)> = members
        .iter()
        .map(|&i| {
            let timing = clips[i].timing();
            // Members continuing a run inherit the run anchor's start.
            let schedule =
                ClipSchedule::predict(watermark, &timing, timing.timescale.nominal_active());
            clips[i].set_schedule(schedule);
            (i, schedule)
        })
        .collect();

    let (active_finish, backward_active_finish, end_delay_finish) = derive_orders(&predicted);

    // Rate-governed runs have no true finish time until actually played,
    // so they leave the watermark where it was.
    let watermark = if kind == TimescaleKind::Duration {
        predicted
            .iter()
            .fold(watermark, |acc, e| acc.max(e.1.full_finish))
    } else {
        watermark
    };

    let commit = if kind == TimescaleKind::Duration {
        CommitState::Final
    } else {
        CommitState::Provisional
    };

    (
        Grouping {
            members,
            active_finish,
            backward_active_finish,
            end_delay_finish,
            kind,
            commit,
        },
        watermark,
    )
}

/// Partition `clips` into groupings, assign per-clip schedules, and
/// derive the finish orders. Runs at the start of every forward play.
pub fn commit(clips: &[ClipHandle]) -> Vec<Grouping> {
    let mut groupings = Vec::new();
    let mut watermark = TimePoint::ZERO;
    let mut run: OrderList = OrderList::new();
    for i in 0..clips.len() {
        let continues = i == 0 || chained(&clips[i - 1], &clips[i]);
        if !continues {
            let (grouping, next) = close_run(clips, std::mem::take(&mut run), watermark);
            watermark = next;
            groupings.push(grouping);
        }
        run.push(i);
    }
    if !run.is_empty() {
        let (grouping, _) = close_run(clips, run, watermark);
        groupings.push(grouping);
    }
    groupings
}

/// Second commit pass for a rate-governed grouping, once the run has
/// begun executing and real active lengths are resolvable. Re-derives
/// the finish orders from resolved durations and marks the record final.
pub fn commit_for_rate(grouping: &Grouping, clips: &[ClipHandle]) -> Grouping {
    let predicted: Vec<(usize, ClipSchedule)> = grouping
        .members
        .iter()
        .map(|&i| {
            let clip = &clips[i];
            let timing = clip.timing();
            let full_start = clip.schedule().map_or(TimePoint::ZERO, |s| s.full_start);
            let active = clip
                .resolved_active_duration()
                .unwrap_or_else(|| timing.timescale.nominal_active());
            let schedule = ClipSchedule::predict(full_start, &timing, active);
            clip.set_schedule(schedule);
            (i, schedule)
        })
        .collect();

    let (active_finish, backward_active_finish, end_delay_finish) = derive_orders(&predicted);
    Grouping {
        members: grouping.members.clone(),
        active_finish,
        backward_active_finish,
        end_delay_finish,
        kind: grouping.kind,
        commit: CommitState::Final,
    }
}

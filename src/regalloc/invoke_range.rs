//! Consecutive-register block planner for `invoke-range` call sites (§4.F).
//!
//! A call that needs more than five argument words (or whose arguments
//! aren't already a linked chain sitting in pinned argument registers)
//! must read them from a contiguous, ascending register block. This pass
//! runs *before* the main loop and only prepares the ground: it splits
//! each argument's interval tightly around the call site and marks the
//! resulting pieces `is_invoke_range`; the main driver loop (§4.D) treats
//! those marked splits specially when it pops them off `unhandled`.

use crate::ir::{InvokeRangeCall, ProgPoint};
use crate::ranges::{IntervalId, Intervals};
use crate::regalloc::register_set::FreeRegisters;

/// One invoke-range call site, reduced to what the planner and the main
/// loop need: the call's position and the interval-chain members that
/// must land in a consecutive block.
pub struct PlannedCall {
    pub call_pos: ProgPoint,
    pub has_out_value: bool,
    /// Split ids, one per argument, in calling order. Populated by
    /// `split_around_call`.
    pub members: Vec<IntervalId>,
}

/// Splits every argument's interval tightly around `call.call_pos`: a
/// split at the gap just before the call, and — if the argument's
/// interval extends further — a second split just after it. Both new
/// pieces are marked `is_invoke_range` so the main loop's ordinary
/// advance-active/advance-inactive bookkeeping skips them.
pub fn split_around_call(intervals: &mut Intervals, call: &InvokeRangeCall, call_pos: ProgPoint) -> PlannedCall {
    let mut members = Vec::with_capacity(call.args.len());

    for &arg in &call.args {
        let parent = intervals
            .get_split_covering(arg, call_pos)
            .or_else(|| intervals.get_split_covering_or_before(arg, call_pos))
            .expect("invoke-range argument has no live interval at the call");

        let before_call = intervals.split_before(parent, call_pos.gap_before());
        intervals.get_mut(before_call).is_invoke_range = true;

        if intervals.get(before_call).end() > call_pos.next_instruction() {
            let after_call = intervals.split_before(before_call, call_pos.next_instruction());
            intervals.get_mut(after_call).is_invoke_range = true;
        }

        members.push(before_call);
    }

    PlannedCall {
        call_pos,
        has_out_value: call.has_out_value,
        members,
    }
}

/// Assigns a consecutive register block to `call`'s members, probing and
/// committing against whatever is free in `free` at the time it runs. Does
/// not evict any active interval that happens to overlap a candidate run —
/// only an already-free block is ever considered, so a call that cannot
/// find `width` free registers simply fails rather than displacing another
/// live value to make room.
///
/// Returns the lowest register of the block, or `None` if no run of the
/// required width is currently free (the caller then treats this as an
/// ordinary mode failure and lets the retry ladder escalate).
pub fn allocate_consecutive_block(
    free: &mut FreeRegisters,
    intervals: &Intervals,
    call: &PlannedCall,
) -> Option<u32> {
    let mut width = 0u32;
    for &m in &call.members {
        width += intervals.get(m).width();
    }
    if call.has_out_value {
        width += 1;
    }

    let run_start = free.first_consecutive_run(width)?;

    let mut next = run_start + if call.has_out_value { 1 } else { 0 };
    for &m in &call.members {
        let w = intervals.get(m).width();
        if w == 2 {
            free.take_wide(next);
        } else {
            free.take(next);
        }
        next += w;
    }
    if call.has_out_value {
        free.take(run_start);
    }

    Some(run_start)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::LiveRange;

    #[test]
    fn splits_land_exactly_around_the_call() {
        let mut intervals = Intervals::new(2);
        let value = crate::ir::ValueId(0);
        intervals.add_range(value, false, LiveRange::new(ProgPoint::instruction(0), ProgPoint::instruction(20)));

        let call = InvokeRangeCall { args: vec![value], has_out_value: false };
        let planned = split_around_call(&mut intervals, &call, ProgPoint::instruction(10));

        assert_eq!(planned.members.len(), 1);
        let before = intervals.get(planned.members[0]);
        assert!(before.is_invoke_range);
        assert_eq!(before.end(), ProgPoint::instruction(10).gap_before());
    }

    #[test]
    fn allocates_a_consecutive_run() {
        let mut free = FreeRegisters::new();
        free.increase_capacity(8);
        free.take(0);

        let mut intervals = Intervals::new(1);
        let value = crate::ir::ValueId(0);
        let id = intervals.add_range(value, false, LiveRange::new(ProgPoint::instruction(0), ProgPoint::instruction(4)));

        let call = PlannedCall {
            call_pos: ProgPoint::instruction(2),
            has_out_value: false,
            members: vec![id],
        };
        let start = allocate_consecutive_block(&mut free, &intervals, &call);
        assert_eq!(start, Some(1));
        assert!(!free.is_free(1));
    }
}

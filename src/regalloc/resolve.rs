//! Spill-move insertion and CFG-edge resolution (§4.H).
//!
//! Two sources of copies feed the same `SpillMoveSet`: split boundaries
//! within a single value's chain, and CFG edges where the predecessor's
//! and successor's splits for a live value disagree. Both are collected
//! before scheduling so that a register-cycle swap spanning several
//! values (two live-in values trading registers across a loop back-edge)
//! is visible to the scheduler as a whole, not resolved value-by-value.

use std::collections::HashMap;

use crate::ir::{BlockId, IRCode, PhiOperand, ProgPoint, ValueId};
use crate::ranges::Intervals;

/// Where a scheduled copy is addressed from/to. Both locations are "the
/// register a split was assigned, or a spill slot" — `Spill` carries the
/// slot's own index space, kept separate from register numbers so the
/// scheduler never confuses the two.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Location {
    Register(u32),
    Spill(u32),
}

/// One copy the resolver decided is needed.
#[derive(Clone, Debug)]
pub struct Move {
    pub value: ValueId,
    pub at: ProgPoint,
    pub from: Location,
    pub to: Location,
}

/// The collected, not-yet-scheduled set of copies (§4.H "SpillMoveSet").
#[derive(Default)]
pub struct SpillMoveSet {
    moves: Vec<Move>,
}

impl SpillMoveSet {
    pub fn push(&mut self, m: Move) {
        self.moves.push(m);
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Move> {
        self.moves.iter()
    }
}

fn location_of(intervals: &Intervals, value: ValueId, pos: ProgPoint) -> Option<Location> {
    let id = intervals
        .get_split_covering(value, pos)
        .or_else(|| intervals.get_split_covering_or_before(value, pos))?;
    let interval = intervals.get(id);
    if let Some(r) = interval.register {
        Some(Location::Register(r))
    } else {
        interval.spill_slot.map(Location::Spill)
    }
}

/// Inserts a copy at every split boundary of every value, skipping
/// boundaries where both sides resolve to the same location (an argument
/// that keeps its pinned register across the split, per §4.H's
/// exception).
pub fn insert_split_boundary_moves(intervals: &Intervals, num_values: u32, moves: &mut SpillMoveSet) {
    for v in 0..num_values {
        let value = ValueId(v);
        let chain = intervals.splits_of(value);
        for window in chain.windows(2) {
            let (prev, next) = (window[0], window[1]);
            let prev_interval = intervals.get(prev);
            let next_interval = intervals.get(next);
            let from = prev_interval
                .register
                .map(Location::Register)
                .or_else(|| prev_interval.spill_slot.map(Location::Spill));
            let to = next_interval
                .register
                .map(Location::Register)
                .or_else(|| next_interval.spill_slot.map(Location::Spill));
            if let (Some(from), Some(to)) = (from, to) {
                if from != to {
                    moves.push(Move {
                        value,
                        at: next_interval.start().gap_before(),
                        from,
                        to,
                    });
                }
            }
        }
    }
}

/// Resolves every CFG edge: for each value live at a successor's entry,
/// compares the split covering the predecessor's exit (or its last
/// throwing instruction, for an exceptional edge) against the split
/// covering the successor's entry, and records a copy if they differ.
///
/// Placement follows §4.H: a `goto`-terminated predecessor gets the copy
/// at its own end (out-resolution); otherwise it lands at the start of
/// the successor (in-resolution).
pub fn resolve_control_flow_edges(
    code: &IRCode,
    intervals: &Intervals,
    live_at_entry: &HashMap<BlockId, Vec<ValueId>>,
    moves: &mut SpillMoveSet,
) {
    for (&succ_id, live) in live_at_entry {
        let succ = code.block(succ_id);
        let succ_entry = succ
            .instructions
            .first()
            .map(|i| i.pos)
            .unwrap_or(ProgPoint::ZERO);

        for &pred_id in &succ.predecessors {
            let pred = code.block(pred_id);
            let exceptional = pred.exceptional_successors.contains(&succ_id);
            let pred_exit = if exceptional {
                pred.instructions
                    .iter()
                    .rev()
                    .find(|i| i.can_throw)
                    .map(|i| i.pos)
                    .unwrap_or(succ_entry)
            } else {
                pred.instructions
                    .last()
                    .map(|i| i.pos)
                    .unwrap_or(succ_entry)
            };

            for &value in live {
                let from = match location_of(intervals, value, pred_exit) {
                    Some(l) => l,
                    None => continue,
                };
                let to = match location_of(intervals, value, succ_entry) {
                    Some(l) => l,
                    None => continue,
                };
                if from == to {
                    continue;
                }

                let at = if pred.exits_by_goto {
                    pred_exit.gap_after()
                } else {
                    succ_entry.gap_before()
                };
                moves.push(Move { value, at, from, to });
            }
        }
    }
}

/// Materializes phi inputs as copies on each predecessor's side (§4.H):
/// for every predecessor index, the operand feeding the phi on that edge
/// is copied into the phi destination's entry location.
pub fn materialize_phi_inputs(code: &IRCode, intervals: &Intervals, moves: &mut SpillMoveSet) {
    for (block_id, block) in code.blocks_in_topo_order() {
        for phi in &block.phis {
            let dst_entry = block
                .instructions
                .first()
                .map(|i| i.pos)
                .unwrap_or(ProgPoint::ZERO);
            let to = match location_of(intervals, phi.dst, dst_entry) {
                Some(l) => l,
                None => continue,
            };

            for (pred_index, &pred_id) in block.predecessors.iter().enumerate() {
                let operand = match phi.srcs.get(pred_index) {
                    Some(PhiOperand::Value(v)) => *v,
                    Some(PhiOperand::Const(_)) | None => continue,
                };
                let pred = code.block(pred_id);
                let pred_exit = pred
                    .instructions
                    .last()
                    .map(|i| i.pos)
                    .unwrap_or(dst_entry);
                let from = match location_of(intervals, operand, pred_exit) {
                    Some(l) => l,
                    None => continue,
                };
                if from == to {
                    continue;
                }
                let at = if pred.exits_by_goto {
                    pred_exit.gap_after()
                } else {
                    dst_entry.gap_before()
                };
                moves.push(Move { value: phi.dst, at, from, to });
            }
        }
        let _ = block_id;
    }
}

/// One scheduled step: either a plain copy, or a swap via `temp` when a
/// cycle among registers was detected (`a -> b`, `b -> a`).
#[derive(Debug)]
pub enum ScheduledStep {
    Copy { value: ValueId, from: Location, to: Location },
    Swap { a: (ValueId, Location), b: (ValueId, Location), temp: u32 },
}

/// Schedules every move recorded at a single position into parallel-move
/// groups, resolving register cycles with a temporary register allocated
/// just above `first_free_temp`. Returns the scheduled steps and the
/// lowest temporary register index actually used (the emitter's
/// `firstParallelMoveTemporary`), or `first_free_temp` unchanged if no
/// swap was needed.
pub fn schedule_at(
    moves_at_pos: &[Move],
    first_free_temp: u32,
) -> (Vec<ScheduledStep>, u32) {
    let mut by_dest: HashMap<Location, usize> = HashMap::new();
    for (i, m) in moves_at_pos.iter().enumerate() {
        by_dest.insert(m.to, i);
    }

    let mut scheduled = Vec::new();
    let mut done = vec![false; moves_at_pos.len()];
    let mut next_temp = first_free_temp;

    for i in 0..moves_at_pos.len() {
        if done[i] {
            continue;
        }
        let m = &moves_at_pos[i];
        // A cycle exists iff some other still-pending move writes to the
        // location this one reads from, and that move in turn reads from
        // this one's destination.
        if let Some(&j) = by_dest.get(&m.from) {
            if j != i && !done[j] && moves_at_pos[j].from == m.to {
                scheduled.push(ScheduledStep::Swap {
                    a: (m.value, m.to),
                    b: (moves_at_pos[j].value, moves_at_pos[j].to),
                    temp: next_temp,
                });
                next_temp += 1;
                done[i] = true;
                done[j] = true;
                continue;
            }
        }
        scheduled.push(ScheduledStep::Copy { value: m.value, from: m.from, to: m.to });
        done[i] = true;
    }

    (scheduled, next_temp)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn schedule_resolves_a_register_swap() {
        let moves = vec![
            Move { value: ValueId(0), at: ProgPoint::instruction(0), from: Location::Register(1), to: Location::Register(2) },
            Move { value: ValueId(1), at: ProgPoint::instruction(0), from: Location::Register(2), to: Location::Register(1) },
        ];
        let (steps, next_temp) = schedule_at(&moves, 8);
        assert_eq!(steps.len(), 1);
        assert!(matches!(steps[0], ScheduledStep::Swap { temp: 8, .. }));
        assert_eq!(next_temp, 9);
    }

    #[test]
    fn schedule_passes_through_non_cyclic_copies() {
        let moves = vec![
            Move { value: ValueId(0), at: ProgPoint::instruction(0), from: Location::Register(1), to: Location::Register(3) },
        ];
        let (steps, next_temp) = schedule_at(&moves, 8);
        assert_eq!(steps.len(), 1);
        assert!(matches!(steps[0], ScheduledStep::Copy { .. }));
        assert_eq!(next_temp, 8);
    }
}

//! Backward liveness analysis (§4.B).
//!
//! Grounded on `back::regalloc::lifetime_intervals::build_intervals`'s
//! per-block backward walk (successors' live-in union, phi sources added,
//! then instructions visited output-before-input in reverse), but driven
//! to a fixpoint over the whole CFG instead of a single block-order pass,
//! since a loop back-edge can make a value live-in at a block that is
//! also one of its own successors' predecessors. A single backward walk
//! is correct for the acyclic case; looping until the live-in sets stop
//! changing is the straightforward generalization, and collapses back to
//! exactly one pass for straight-line or reducible, non-looping code.

use std::collections::HashSet;

use log::{debug, trace};

use crate::ir::{BlockId, IRCode, LiveRange, Options, PhiOperand, ProgPoint, ValueId};
use crate::ranges::{Intervals, LiveIntervalsUse};

/// A deterministically-ordered set of live values.
///
/// Plain `HashSet<ValueId>` iteration order is unspecified, which would
/// make range-merge order (and therefore tie-breaking in later passes)
/// depend on hashing; §5 requires determinism, so membership is tracked in
/// a `HashSet` for O(1) lookup but insertion order is preserved in a `Vec`
/// for iteration.
#[derive(Clone, Default)]
struct LiveSet {
    order: Vec<ValueId>,
    members: HashSet<ValueId>,
}

impl LiveSet {
    fn insert(&mut self, value: ValueId) -> bool {
        if self.members.insert(value) {
            self.order.push(value);
            true
        } else {
            false
        }
    }

    fn remove(&mut self, value: ValueId) -> bool {
        if self.members.remove(&value) {
            self.order.retain(|&v| v != value);
            true
        } else {
            false
        }
    }

    fn contains(&self, value: ValueId) -> bool {
        self.members.contains(&value)
    }

    fn iter(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.order.iter().copied()
    }
}

/// Runs backward liveness over `code`, recording every discovered range and
/// use into `intervals`. Blocks are visited in reverse topological order;
/// the whole traversal repeats until no block's live-in set changes, which
/// handles loop-carried liveness that a single backward pass would miss.
pub fn build_intervals(code: &IRCode, options: &Options, intervals: &mut Intervals) {
    let mut live_in: Vec<LiveSet> = vec![LiveSet::default(); code.num_blocks()];
    let order: Vec<BlockId> = code.topo_order.iter().copied().collect();

    loop {
        let mut changed = false;
        for &block_id in order.iter().rev() {
            let block = code.block(block_id);
            trace!("block: {:?}", block_id);

            let mut live = LiveSet::default();
            for &succ in &block.successors {
                for value in live_in[succ.0 as usize].iter() {
                    live.insert(value);
                }
                for phi in &code.block(succ).phis {
                    if let Some(pred_index) = code.block(succ).predecessors.iter().position(|&p| p == block_id) {
                        live.insert(phi.srcs[pred_index].value());
                    }
                }
            }

            if options.debug {
                for &value in &block.debug_values {
                    live.insert(value);
                }
            }

            trace!("live-out: {:?}", live.order);

            let block_start = block
                .instructions
                .first()
                .map(|i| i.pos)
                .unwrap_or_else(|| ProgPoint::instruction(0));
            let block_end = block
                .instructions
                .last()
                .map(|i| i.pos.next_instruction())
                .unwrap_or(block_start);

            // Every value live across the whole block gets a provisional
            // range spanning it; instructions below shorten or extend this
            // as their def/use positions are discovered, mirroring the
            // "addRange(b.from, b.to)" step of Wimmer-style interval building.
            let exceptional_end = exceptional_extension(block, block_end);
            for value in live.iter() {
                let wide = code.value(value).wide;
                intervals.add_range(value, wide, LiveRange::new(block_start, exceptional_end));
            }

            for instr in block.instructions.iter().rev() {
                trace!("instruction at {:?}", instr.pos);

                for &def in &instr.defs {
                    let wide = code.value(def).wide;
                    intervals.add_range(def, wide, LiveRange::new(instr.pos, instr.pos.next_instruction()));
                    live.remove(def);
                }

                let use_end = if instr.is_check_cast && instr.can_throw {
                    // A value consumed by a check-cast that can still throw
                    // must stay live one position past the cast: the move
                    // into the destination register happens before the
                    // verifier has confirmed the cast succeeds, so on the
                    // exceptional edge the source is still the only
                    // trustworthy copy.
                    instr.pos.gap_after().round_up_to_instruction()
                } else {
                    instr.pos
                };

                for u in &instr.uses {
                    let wide = code.value(u.value).wide;
                    intervals.add_range(u.value, wide, LiveRange::new(block_start, use_end));
                    intervals.add_use(
                        u.value,
                        LiveIntervalsUse {
                            pos: instr.pos,
                            limit: u.limit,
                        },
                    );
                    live.insert(u.value);
                }
            }

            for phi in &block.phis {
                live.remove(phi.dst);
            }
            for phi in &block.phis {
                for src in &phi.srcs {
                    if let PhiOperand::Value(v) = *src {
                        if !code.value(v).rematerializable {
                            live.insert(v);
                        }
                    }
                }
            }

            if live.order != live_in[block_id.0 as usize].order {
                live_in[block_id.0 as usize] = live;
                changed = true;
            }
        }

        if !changed {
            break;
        }
        debug!("liveness fixpoint not yet reached, iterating again");
    }
}

/// A block with an exceptional successor keeps every live-out value alive
/// through its last instruction that can actually throw, not just to its
/// literal end: anything after the last throwing instruction is unreachable
/// from the catch handler and shouldn't force the value to stay resident.
fn exceptional_extension(block: &crate::ir::BlockData, block_end: ProgPoint) -> ProgPoint {
    if block.exceptional_successors.is_empty() {
        return block_end;
    }
    block
        .instructions
        .iter()
        .rev()
        .find(|i| i.can_throw)
        .map(|i| i.pos.next_instruction())
        .unwrap_or(block_end)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::interner::Interner;
    use crate::ir::builder::IRCodeBuilder;
    use crate::ir::RegWidthLimit;

    #[test]
    fn value_live_across_a_branch_gets_one_merged_range() {
        let interner = Interner::new();
        let mut b = IRCodeBuilder::new("m", &interner);
        let arg = b.add_argument(false);
        let entry = b.add_block();
        let left = b.add_block();
        let right = b.add_block();
        let exit = b.add_block();
        b.connect(entry, left);
        b.connect(entry, right);
        b.connect(left, exit);
        b.connect(right, exit);

        // `arg` is used only in `exit`, so it must be live through both
        // `left` and `right`.
        b.add_instruction(exit, vec![(arg, RegWidthLimit::Sixteen)], vec![], false);
        let code = b.finish();

        let mut intervals = Intervals::new(code.num_values());
        build_intervals(&code, &Options::default(), &mut intervals);

        let interval = intervals.get(intervals.splits_of(arg)[0]);
        assert!(interval.covers(ProgPoint::instruction(0)));
        assert!(interval.start() <= ProgPoint::instruction(0));
    }

    #[test]
    fn loop_carried_liveness_reaches_a_fixpoint() {
        let interner = Interner::new();
        let mut b = IRCodeBuilder::new("m", &interner);
        let arg = b.add_argument(false);
        let header = b.add_block();
        let body = b.add_block();
        let exit = b.add_block();
        b.connect(header, body);
        b.connect(header, exit);
        b.connect(body, header);

        b.add_instruction(exit, vec![(arg, RegWidthLimit::Sixteen)], vec![], false);
        let code = b.finish();

        let mut intervals = Intervals::new(code.num_values());
        build_intervals(&code, &Options::default(), &mut intervals);

        let interval = intervals.get(intervals.splits_of(arg)[0]);
        // Must be live across the loop body block too, not just header/exit.
        assert!(interval.end() >= ProgPoint::instruction(0));
    }
}

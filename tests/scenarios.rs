//! End-to-end scenarios against the public `Allocator` façade, one per
//! method shape called out as a worked example: a single-argument method,
//! a pair of wide arguments, an invoke-range call site, an exceptional
//! edge through a check-cast, a phi with an operand-frequency hint, and a
//! rematerializable constant used far from its definition.

use rustiny_regalloc::interner::Interner;
use rustiny_regalloc::ir::builder::IRCodeBuilder;
use rustiny_regalloc::ir::{PhiOperand, RegWidthLimit};
use rustiny_regalloc::regalloc::mode::Mode;
use rustiny_regalloc::{Allocator, Options};

#[test]
fn identity_method_uses_a_single_register_at_four_bit_mode() {
    let interner = Interner::new();
    let mut b = IRCodeBuilder::new("identity", &interner);
    let arg = b.add_argument(false);
    let entry = b.add_block();
    b.add_instruction(entry, vec![(arg, RegWidthLimit::Sixteen)], vec![], false);
    let code = b.finish();

    let options = Options::default();
    let mut allocator = Allocator::new(&code, &options, &interner);
    allocator.allocate_registers().expect("identity always fits in 4-bit mode");

    assert_eq!(allocator.registers_used(), 1);
    assert_eq!(allocator.final_mode(), Some(Mode::AllowArgumentReuse4Bit));
    assert_eq!(
        allocator
            .get_register_for_value(arg, rustiny_regalloc::ir::ProgPoint::instruction(0))
            .unwrap(),
        0
    );
}

#[test]
fn wide_argument_pairs_never_half_overlap_the_result() {
    let interner = Interner::new();
    let mut b = IRCodeBuilder::new("add", &interner);
    let a = b.add_argument(true);
    let c = b.add_argument(true);
    let result = b.add_value(true, true, false);
    let entry = b.add_block();
    b.add_wide_arith(entry, a, c, result, RegWidthLimit::Sixteen);
    b.add_instruction(entry, vec![(result, RegWidthLimit::Sixteen)], vec![], false);
    let code = b.finish();

    let mut options = Options::default();
    options.can_have_overlapping_long_register_bug = true;
    let mut allocator = Allocator::new(&code, &options, &interner);
    allocator.allocate_registers().expect("four wide-register slots fit easily");

    let def_pos = rustiny_regalloc::ir::ProgPoint::instruction(0);
    let use_pos = rustiny_regalloc::ir::ProgPoint::instruction(1);
    let ra = allocator.get_register_for_value(a, def_pos).unwrap();
    let rc = allocator.get_register_for_value(c, def_pos).unwrap();
    let rr = allocator.get_register_for_value(result, use_pos).unwrap();

    assert_ne!(ra, rc, "the two wide arguments must not share a register pair");
    // The result pair must not straddle either argument's pair.
    for occupied in [ra, ra + 1, rc, rc + 1] {
        assert!(rr != occupied && rr + 1 != occupied, "result pair ({}, {}) overlaps argument register {}", rr, rr + 1, occupied);
    }

    let top = allocator.registers_used();
    assert!(ra >= top - 4 && rc >= top - 4, "wide arguments must sit in the top 4 registers, got ra={} rc={} top={}", ra, rc, top);
}

#[test]
fn arguments_are_remapped_to_the_top_of_the_register_file() {
    let interner = Interner::new();
    let mut b = IRCodeBuilder::new("lateArgUse", &interner);
    let arg = b.add_argument(false);
    let entry = b.add_block();
    for _ in 0..5 {
        let filler = b.add_value(false, true, false);
        b.add_instruction(entry, vec![], vec![filler], false);
    }
    b.add_instruction(entry, vec![(arg, RegWidthLimit::Sixteen)], vec![], false);
    let code = b.finish();

    let options = Options::default();
    let mut allocator = Allocator::new(&code, &options, &interner);
    allocator.allocate_registers().expect("a handful of fillers plus one argument must allocate");

    let last = code.block(entry).instructions.last().unwrap().pos;
    let arg_reg = allocator.get_register_for_value(arg, last).unwrap();
    assert_eq!(arg_reg, allocator.registers_used() - 1, "the lone argument must end up in the top register");
}

#[test]
fn invoke_range_arguments_land_in_one_consecutive_block() {
    let interner = Interner::new();
    let mut b = IRCodeBuilder::new("manyArgs", &interner);
    let mut args = Vec::new();
    for _ in 0..20 {
        args.push(b.add_argument(false));
    }
    let entry = b.add_block();
    let out = b.add_value(false, true, false);
    b.add_invoke_range(entry, args.clone(), Some(out), true);
    b.add_instruction(entry, vec![(out, RegWidthLimit::Sixteen)], vec![], false);
    let code = b.finish();

    let options = Options::default();
    let mut allocator = Allocator::new(&code, &options, &interner);
    allocator.allocate_registers().expect("20 arguments must escalate past 4-bit but still succeed");

    assert_ne!(allocator.final_mode(), Some(Mode::AllowArgumentReuse4Bit));

    let call_pos = code.block(entry).instructions[0].pos;
    let mut regs: Vec<u32> = args
        .iter()
        .map(|&v| allocator.get_register_for_value(v, call_pos).unwrap())
        .collect();
    regs.sort_unstable();
    for window in regs.windows(2) {
        assert_eq!(window[1], window[0] + 1, "invoke-range operands must be consecutive, got {:?}", regs);
    }
}

#[test]
fn move_exception_value_gets_the_dedicated_register_and_x_survives_the_exceptional_edge() {
    let interner = Interner::new();
    let mut b = IRCodeBuilder::new("tryCatch", &interner);
    let entry = b.add_block();
    let handler = b.add_block();

    let x = b.add_value(false, true, false);
    b.add_instruction(entry, vec![], vec![x], false);
    // A check-cast on x, then a throwing call, both reachable from the handler.
    let cast_dst = b.add_value(false, true, false);
    b.add_check_cast(entry, x, cast_dst, true);
    b.add_instruction(entry, vec![(cast_dst, RegWidthLimit::Sixteen)], vec![], true);
    b.connect_exceptional(entry, handler);

    let e = b.add_value(false, true, false);
    b.add_move_exception(handler, e);
    b.mark_catch_handler(handler);
    b.add_instruction(handler, vec![(e, RegWidthLimit::Sixteen), (x, RegWidthLimit::Sixteen)], vec![], false);
    let code = b.finish();

    let options = Options::default();
    let mut allocator = Allocator::new(&code, &options, &interner);
    allocator.allocate_registers().expect("a small try/catch method must fit");

    let handler_entry = code.block(handler).instructions[0].pos;
    let e_reg = allocator.get_register_for_value(e, handler_entry).unwrap();
    let x_reg_at_handler = allocator.get_register_for_value(x, handler_entry).unwrap();
    assert_ne!(e_reg, x_reg_at_handler, "move-exception must not collide with a value live across the edge");
}

#[test]
fn phi_hint_favors_the_higher_frequency_predecessor_register() {
    let interner = Interner::new();
    let mut b = IRCodeBuilder::new("phiMerge", &interner);
    let entry = b.add_block();
    let left = b.add_block();
    let mid = b.add_block();
    let right = b.add_block();
    let join = b.add_block();

    // `left` and `mid` each define their phi operand with no competing
    // register pressure, so both naturally land on register 0. `right`
    // first defines an unrelated `filler` value that is kept alive past
    // its own phi operand's definition, forcing that operand onto a
    // different register. The phi destination should then prefer
    // register 0, since two of its three predecessors supply it there.
    let on_left = b.add_value(false, true, false);
    let on_mid = b.add_value(false, true, false);
    let filler = b.add_value(false, true, false);
    let on_right = b.add_value(false, true, false);

    b.add_instruction(entry, vec![], vec![], false);

    b.add_instruction(left, vec![], vec![on_left], false);
    b.mark_exits_by_goto(left);

    b.add_instruction(mid, vec![], vec![on_mid], false);
    b.mark_exits_by_goto(mid);

    b.add_instruction(right, vec![], vec![filler], false);
    b.add_instruction(right, vec![], vec![on_right], false);
    b.add_instruction(right, vec![(filler, RegWidthLimit::Sixteen)], vec![], false);
    b.mark_exits_by_goto(right);

    let phi_dst = b.add_phi_value(false);
    b.add_phi(
        join,
        phi_dst,
        vec![PhiOperand::Value(on_left), PhiOperand::Value(on_mid), PhiOperand::Value(on_right)],
    );
    b.add_instruction(join, vec![(phi_dst, RegWidthLimit::Sixteen)], vec![], false);

    b.connect(entry, left);
    b.connect(entry, mid);
    b.connect(entry, right);
    b.connect(left, join);
    b.connect(mid, join);
    b.connect(right, join);
    let code = b.finish();

    let options = Options::default();
    let mut allocator = Allocator::new(&code, &options, &interner);
    allocator.allocate_registers().expect("a three-predecessor diamond with a phi must allocate");

    let join_entry = code.block(join).instructions.first().unwrap().pos;
    let phi_reg = allocator.get_register_for_value(phi_dst, join_entry).unwrap();
    assert_eq!(phi_reg, 0, "phi should take the register supplied by the majority of its predecessors (left and mid), not right's");
}

#[test]
fn a_far_constant_use_does_not_force_an_extra_register_through_its_whole_lifetime() {
    let interner = Interner::new();
    let mut b = IRCodeBuilder::new("lateConst", &interner);
    let entry = b.add_block();
    let k = b.add_value(false, true, true);
    b.add_instruction(entry, vec![], vec![k], false);
    for _ in 0..29 {
        let filler = b.add_value(false, true, false);
        b.add_instruction(entry, vec![], vec![filler], false);
    }
    b.add_instruction(entry, vec![(k, RegWidthLimit::Sixteen)], vec![], false);
    let code = b.finish();

    let options = Options::default();
    let mut allocator = Allocator::new(&code, &options, &interner);
    allocator.allocate_registers().expect("a long straight-line method with one late use must allocate");

    let last = rustiny_regalloc::ir::ProgPoint::instruction(30);
    assert!(allocator.get_register_for_value(k, last).is_ok());
}

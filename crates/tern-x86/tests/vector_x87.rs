//! Structural checks for the vector and x87 groups: write-lane rules,
//! helper-call annotations, the 256-bit splitting pattern, and the FP-stack
//! bookkeeping. These inspect emitted IR rather than evaluating it.

mod common;

use common::lift;
use tern_ir::{BinOp, EffHelper, Expr, Stmt, UnOp};
use tern_x86::decode::{IsaExt, LiftParams, Verdict};
use tern_x86::{decode_one, guest};

fn puts_to(block: &tern_ir::Block, off: u16) -> usize {
    block
        .stmts
        .iter()
        .filter(|s| matches!(s, Stmt::Put { off: o, .. } if *o == off))
        .count()
}

#[test]
fn legacy_sse_write_preserves_the_upper_lane() {
    // 66 0F EF C1 = pxor xmm0, xmm1
    let (block, outcome) = lift(&[0x66, 0x0f, 0xef, 0xc1], 0x100);
    assert_eq!(outcome.len, 4);
    assert_eq!(puts_to(&block, guest::ymm_off(0)), 1);
    assert_eq!(puts_to(&block, guest::ymm_hi_off(0)), 0, "legacy write keeps YMM0[255:128]");
}

#[test]
fn vex_128_write_zeroes_the_upper_lane() {
    // C5 F1 EF C2 = vpxor xmm0, xmm1, xmm2
    let (block, outcome) = lift(&[0xc5, 0xf1, 0xef, 0xc2], 0x100);
    assert_eq!(outcome.len, 4);
    assert_eq!(puts_to(&block, guest::ymm_off(0)), 1);
    assert_eq!(puts_to(&block, guest::ymm_hi_off(0)), 1, "VEX-128 zeroes YMM0[255:128]");
}

#[test]
fn vex_256_ops_split_into_both_halves() {
    // C5 F5 FE C2 = vpaddd ymm0, ymm1, ymm2
    let (block, outcome) = lift(&[0xc5, 0xf5, 0xfe, 0xc2], 0x100);
    assert_eq!(outcome.len, 4);

    fn count_op(e: &Expr, total: &mut (usize, usize)) {
        match e {
            Expr::Unop { op, src } => {
                if matches!(op, UnOp::V256ToV128Lo | UnOp::V256ToV128Hi) {
                    total.0 += 1;
                }
                count_op(src, total);
            }
            Expr::Binop { op, lhs, rhs } => {
                if matches!(op, BinOp::Add32x4) {
                    total.1 += 1;
                }
                count_op(lhs, total);
                count_op(rhs, total);
            }
            Expr::Mux {
                cond,
                if_true,
                if_false,
            } => {
                count_op(cond, total);
                count_op(if_true, total);
                count_op(if_false, total);
            }
            _ => {}
        }
    }
    let mut totals = (0usize, 0usize);
    for s in &block.stmts {
        if let Stmt::WrTemp { val, .. } = s {
            count_op(val, &mut totals);
        }
    }
    assert_eq!(totals.0, 4, "two half-extractions per source");
    assert_eq!(totals.1, 2, "the 128-bit op is applied to each half");
}

#[test]
fn gated_extensions_reject_when_absent() {
    let params = LiftParams {
        isa: IsaExt::empty(),
        ..LiftParams::default()
    };
    let mut block = tern_ir::Block::new();
    // 66 0F 38 00 C1 = pshufb xmm0, xmm1 (SSSE3).
    let outcome = decode_one(&[0x66, 0x0f, 0x38, 0x00, 0xc1], 0x100, &params, &mut block);
    assert_eq!(outcome.len, 0);

    // Same bytes decode once the extension is present.
    let params = LiftParams::default();
    let mut block = tern_ir::Block::new();
    let outcome = decode_one(&[0x66, 0x0f, 0x38, 0x00, 0xc1], 0x100, &params, &mut block);
    assert_eq!(outcome.len, 5);
}

#[test]
fn helper_calls_carry_guest_effect_annotations() {
    // 66 0F 38 00 C1 = pshufb xmm0, xmm1.
    let (block, _) = lift(&[0x66, 0x0f, 0x38, 0x00, 0xc1], 0x100);
    let call = block
        .stmts
        .iter()
        .find_map(|s| match s {
            Stmt::DirtyCall { func, effects, .. } => Some((func, effects)),
            _ => None,
        })
        .expect("pshufb routes through a helper");
    assert_eq!(*call.0, EffHelper::Pshufb);
    let reads: Vec<u16> = call.1.reads.iter().map(|r| r.off).collect();
    assert!(reads.contains(&guest::ymm_off(0)));
    assert!(reads.contains(&guest::ymm_off(1)));
    assert_eq!(call.1.writes[0].off, guest::ymm_off(0));
}

#[test]
fn helper_with_memory_source_stages_through_the_scratch_slot() {
    // 66 0F 38 00 00 = pshufb xmm0, [rax]
    let (block, _) = lift(&[0x66, 0x0f, 0x38, 0x00, 0x00], 0x100);
    assert!(block
        .stmts
        .iter()
        .any(|s| matches!(s, Stmt::Put { off, .. } if *off == guest::OFF_VSCRATCH)));
    let Some(Stmt::DirtyCall { effects, .. }) = block
        .stmts
        .iter()
        .find(|s| matches!(s, Stmt::DirtyCall { .. }))
    else {
        panic!("missing helper call");
    };
    assert!(effects.reads.iter().any(|r| r.off == guest::OFF_VSCRATCH));
}

#[test]
fn cpuid_annotates_its_register_effects() {
    let (block, _) = lift(&[0x0f, 0xa2], 0x100);
    let Some(Stmt::DirtyCall { func, effects, .. }) = block
        .stmts
        .iter()
        .find(|s| matches!(s, Stmt::DirtyCall { .. }))
    else {
        panic!("missing cpuid call");
    };
    assert_eq!(*func, EffHelper::Cpuid);
    let writes: Vec<u16> = effects.writes.iter().map(|r| r.off).collect();
    for idx in [0u8, 1, 2, 3] {
        assert!(writes.contains(&guest::gpr_off(idx)));
    }
}

#[test]
fn fld_pushes_and_tags_the_slot() {
    // D9 00 = fld dword [rax]
    let (block, outcome) = lift(&[0xd9, 0x00], 0x100);
    assert_eq!(outcome.len, 2);
    // TOP moves and both the register and tag arrays get indexed writes.
    assert_eq!(puts_to(&block, guest::OFF_FTOP), 1);
    let arr_puts = block
        .stmts
        .iter()
        .filter(|s| matches!(s, Stmt::PutArr { .. }))
        .count();
    assert_eq!(arr_puts, 2, "value slot and tag slot");
}

#[test]
fn fstp_pops_after_storing() {
    // DD 18 = fstp qword [rax]
    let (block, outcome) = lift(&[0xdd, 0x18], 0x100);
    assert_eq!(outcome.len, 2);
    assert!(block.stmts.iter().any(|s| matches!(s, Stmt::Store { .. })));
    // Pop = tag cleared + TOP put.
    assert_eq!(puts_to(&block, guest::OFF_FTOP), 1);
    assert!(block
        .stmts
        .iter()
        .any(|s| matches!(s, Stmt::PutArr { val, .. } if *val == Expr::c8(0))));
}

#[test]
fn fninit_resets_control_but_not_data() {
    // DB E3 = fninit
    let (block, outcome) = lift(&[0xdb, 0xe3], 0x100);
    assert_eq!(outcome.len, 2);
    assert_eq!(puts_to(&block, guest::OFF_FTOP), 1);
    assert_eq!(puts_to(&block, guest::OFF_FPROUND), 1);
    // Eight tag writes, no data-register writes (shipped behavior).
    let tag_puts = block
        .stmts
        .iter()
        .filter(|s| {
            matches!(s, Stmt::PutArr { desc, .. } if desc.base == guest::OFF_FPTAG0)
        })
        .count();
    assert_eq!(tag_puts, 8);
    let data_puts = block
        .stmts
        .iter()
        .filter(|s| {
            matches!(s, Stmt::PutArr { desc, .. } if desc.base == guest::OFF_FPREG0)
        })
        .count();
    assert_eq!(data_puts, 0);
}

#[test]
fn fnstenv_is_an_annotated_memory_writing_helper() {
    // D9 30 = fnstenv [rax]
    let (block, outcome) = lift(&[0xd9, 0x30], 0x100);
    assert_eq!(outcome.len, 2);
    let Some(Stmt::DirtyCall { func, effects, .. }) = block
        .stmts
        .iter()
        .find(|s| matches!(s, Stmt::DirtyCall { .. }))
    else {
        panic!("missing helper");
    };
    assert_eq!(*func, EffHelper::FpStoreEnv);
    assert!(matches!(
        effects.mem,
        tern_ir::MemEffect::Write { len: 28, .. }
    ));
    assert!(effects.reads.iter().any(|r| r.off == guest::OFF_FTOP));
}

#[test]
fn clflush_stops_with_the_flush_kind_and_range() {
    // 0F AE 38 = clflush [rax]
    let (block, outcome) = lift(&[0x0f, 0xae, 0x38], 0x100);
    assert_eq!(outcome.len, 3);
    assert_eq!(outcome.verdict, Verdict::Stop);
    assert_eq!(outcome.kind, Some(tern_ir::ExitKind::FlushICache));
    assert!(puts_to(&block, guest::OFF_CMSTART) == 1);
    assert!(puts_to(&block, guest::OFF_CMLEN) == 1);
}

#[test]
fn gather_uses_the_vector_index_form() {
    // C4 E2 69 90 0C 18 = vpgatherdd xmm1, [rax + xmm3*1], xmm2
    let bytes = [0xc4, 0xe2, 0x69, 0x90, 0x0c, 0x18];
    let (block, outcome) = lift(&bytes, 0x100);
    assert_eq!(outcome.len, 6, "VSIB addressing consumes ModRM + SIB");
    // Four guarded lane loads.
    fn count_loads(e: &Expr, n: &mut usize) {
        match e {
            Expr::Load { addr, .. } => {
                *n += 1;
                count_loads(addr, n);
            }
            Expr::Unop { src, .. } => count_loads(src, n),
            Expr::Binop { lhs, rhs, .. } => {
                count_loads(lhs, n);
                count_loads(rhs, n);
            }
            Expr::Mux {
                cond,
                if_true,
                if_false,
            } => {
                count_loads(cond, n);
                count_loads(if_true, n);
                count_loads(if_false, n);
            }
            _ => {}
        }
    }
    let mut loads = 0usize;
    for s in &block.stmts {
        if let Stmt::WrTemp { val, .. } = s {
            count_loads(val, &mut loads);
        }
    }
    assert_eq!(loads, 4);
    // The mask register is cleared afterwards.
    assert!(puts_to(&block, guest::ymm_off(2)) >= 1);

    // Register-direct gather encodings are undecodable.
    let (_, outcome) = lift(&[0xc4, 0xe2, 0x69, 0x90, 0xcb], 0x100);
    assert_eq!(outcome.len, 0);
}

#[test]
fn movss_load_zeroes_high_lanes_but_register_form_merges() {
    // F3 0F 10 00 = movss xmm0, [rax]: lanes 1..3 zeroed.
    let (block, _) = lift(&[0xf3, 0x0f, 0x10, 0x00], 0x100);
    let has_to_v128 = block.stmts.iter().any(|s| {
        matches!(s, Stmt::WrTemp { val, .. }
            if expr_contains(val, &|e| matches!(e, Expr::Unop { op: UnOp::I32ToV128, .. })))
    });
    assert!(has_to_v128);

    // F3 0F 10 C1 = movss xmm0, xmm1: low lane merge.
    let (block, _) = lift(&[0xf3, 0x0f, 0x10, 0xc1], 0x100);
    let has_set_lane = block.stmts.iter().any(|s| {
        matches!(s, Stmt::WrTemp { val, .. }
            if expr_contains(val, &|e| matches!(e, Expr::Binop { op: BinOp::SetLane32 { idx: 0 }, .. })))
    });
    assert!(has_set_lane);
}

fn expr_contains(e: &Expr, pred: &dyn Fn(&Expr) -> bool) -> bool {
    if pred(e) {
        return true;
    }
    match e {
        Expr::Unop { src, .. } => expr_contains(src, pred),
        Expr::Binop { lhs, rhs, .. } => expr_contains(lhs, pred) || expr_contains(rhs, pred),
        Expr::Triop { a, b, c, .. } => {
            expr_contains(a, pred) || expr_contains(b, pred) || expr_contains(c, pred)
        }
        Expr::Mux {
            cond,
            if_true,
            if_false,
        } => {
            expr_contains(cond, pred)
                || expr_contains(if_true, pred)
                || expr_contains(if_false, pred)
        }
        Expr::Load { addr, .. } => expr_contains(addr, pred),
        Expr::GetArr { ix, .. } => expr_contains(ix, pred),
        Expr::CallPure { args, .. } => args.iter().any(|a| expr_contains(a, pred)),
        _ => false,
    }
}

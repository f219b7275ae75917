//! End-to-end decode scenarios: one instruction in, checked IR + outcome out.

mod common;

use common::{lift, step, Machine};
use tern_ir::{ExitKind, Stmt};
use tern_x86::decode::Verdict;
use tern_x86::{decode_one, guest, hooks, LiftParams};

#[test]
fn add_r64_r64_lifts_to_one_add_and_a_thunk() {
    // 48 01 D8 = add rax, rbx
    let (block, outcome) = lift(&[0x48, 0x01, 0xd8], 0x40_0000);
    assert_eq!(outcome.len, 3);
    assert_eq!(outcome.verdict, Verdict::Continue);
    assert!(!outcome.expect_cas);

    // IMark leads, and the thunk slots are all written exactly once.
    assert!(matches!(block.stmts[0], Stmt::IMark { addr: 0x40_0000, len: 3 }));
    let puts: Vec<u16> = block
        .stmts
        .iter()
        .filter_map(|s| match s {
            Stmt::Put { off, .. } => Some(*off),
            _ => None,
        })
        .collect();
    for slot in [
        guest::OFF_CC_OP,
        guest::OFF_CC_DEP1,
        guest::OFF_CC_DEP2,
        guest::OFF_CC_NDEP,
    ] {
        assert_eq!(puts.iter().filter(|o| **o == slot).count(), 1);
    }
    assert!(puts.contains(&guest::gpr_off(0)));

    // And the semantics hold under evaluation.
    let mut m = Machine::new();
    m.set_gpr(0, 5);
    m.set_gpr(3, 7);
    let (_, exit) = step(&mut m, &[0x48, 0x01, 0xd8], 0x40_0000);
    assert_eq!(exit, None);
    assert_eq!(m.gpr(0), 12);
    assert!(!m.cond(tern_types::Cond::E));
    assert!(!m.cond(tern_types::Cond::S));
}

#[test]
fn conditional_jump_stops_with_fall_through_target() {
    // 74 05 = je +5, at A: taken target A+7, fall-through A+2.
    let a = 0x1000u64;
    let (block, outcome) = lift(&[0x74, 0x05], a);
    assert_eq!(outcome.len, 2);
    assert_eq!(outcome.verdict, Verdict::Stop);
    assert_eq!(outcome.kind, Some(ExitKind::Jump));
    assert_eq!(outcome.target, Some(a + 2));

    let exits: Vec<&Stmt> = block
        .stmts
        .iter()
        .filter(|s| matches!(s, Stmt::Exit { .. }))
        .collect();
    assert_eq!(exits.len(), 1);
    let Stmt::Exit { target, kind, .. } = exits[0] else {
        unreachable!();
    };
    assert_eq!(*target, a + 7);
    assert_eq!(*kind, ExitKind::Jump);

    // Taken when ZF holds, falls through otherwise.
    let mut m = Machine::new();
    m.set_guest_u64(guest::OFF_CC_OP, 0x16); // Logic, W32
    m.set_guest_u64(guest::OFF_CC_DEP1, 0); // result 0 -> ZF
    let exit = m.run(&block).unwrap();
    assert_eq!(exit.target, a + 7);

    let mut m = Machine::new();
    m.set_guest_u64(guest::OFF_CC_OP, 0x16);
    m.set_guest_u64(guest::OFF_CC_DEP1, 1);
    let exit = m.run(&block).unwrap();
    assert_eq!(exit.target, a + 2);
}

#[test]
fn direct_branches_resteer_when_the_policy_approves() {
    let chase = |_t: u64| true;
    let params = LiftParams {
        chasing_allowed: true,
        chase_ok: Some(&chase),
        ..LiftParams::default()
    };
    let mut block = tern_ir::Block::new();
    // EB 10 = jmp +0x10
    let outcome = decode_one(&[0xeb, 0x10], 0x2000, &params, &mut block);
    assert_eq!(outcome.len, 2);
    assert_eq!(outcome.verdict, Verdict::ResteerU { to: 0x2012 });

    // A backward conditional branch is assumed taken: the fall-through arm
    // gets the side exit and decoding resteers to the target.
    let mut block = tern_ir::Block::new();
    // 74 F0 = je -0x10
    let outcome = decode_one(&[0x74, 0xf0], 0x2000, &params, &mut block);
    assert_eq!(outcome.len, 2);
    assert_eq!(outcome.verdict, Verdict::ResteerC { to: 0x2000 + 2 - 0x10 });
    let Some(Stmt::Exit { target, .. }) = block
        .stmts
        .iter()
        .find(|s| matches!(s, Stmt::Exit { .. }))
    else {
        panic!("missing guard exit");
    };
    assert_eq!(*target, 0x2002);
}

#[test]
fn host_hook_sequence_is_recognized_before_prefix_scanning() {
    let mut bytes = hooks::PREAMBLE.to_vec();
    bytes.extend_from_slice(&hooks::SEL_HOST_CALL);
    let (block, outcome) = lift(&bytes, 0x5000);
    assert_eq!(outcome.len, 19);
    assert_eq!(outcome.verdict, Verdict::Stop);
    assert_eq!(outcome.kind, Some(ExitKind::HostHook));
    assert_eq!(outcome.target, Some(0x5000 + 19));
    assert!(block.next.is_some());
}

#[test]
fn hook_preamble_without_selector_decodes_as_plain_rotates() {
    // The preamble alone is real code (rol $3, %rdi).
    let (_, outcome) = lift(&hooks::PREAMBLE, 0x5000);
    assert_eq!(outcome.len, 4);
    assert_eq!(outcome.verdict, Verdict::Continue);
}

#[test]
fn load_nraddr_hook_writes_rax_and_continues() {
    let mut bytes = hooks::PREAMBLE.to_vec();
    bytes.extend_from_slice(&hooks::SEL_LOAD_NRADDR);
    let (block, outcome) = lift(&bytes, 0x5000);
    assert_eq!(outcome.len, 19);
    assert_eq!(outcome.verdict, Verdict::Continue);

    let mut m = Machine::new();
    m.set_guest_u64(guest::OFF_NRADDR, 0xdead_beef);
    assert_eq!(m.run(&block), None);
    assert_eq!(m.gpr(0), 0xdead_beef);
}

#[test]
fn undecodable_byte_reports_failure_with_rip_written() {
    // 0x06 (push es) has no 64-bit interpretation.
    let pc = 0x7777u64;
    let (block, outcome) = lift(&[0x06], pc);
    assert_eq!(outcome.len, 0);
    assert_eq!(outcome.verdict, Verdict::Stop);
    assert_eq!(outcome.kind, Some(ExitKind::NoDecode));
    assert_eq!(outcome.target, Some(pc));

    // The faulting address must be in the rip slot for the trap path.
    let mut m = Machine::new();
    let exit = m.run(&block).unwrap();
    assert_eq!(exit.kind, ExitKind::NoDecode);
    assert_eq!(m.guest_u64(guest::OFF_RIP), pc);
}

#[test]
fn ud2_is_a_successful_decode_with_the_illegal_kind() {
    let pc = 0x3000u64;
    let (_, outcome) = lift(&[0x0f, 0x0b], pc);
    assert_eq!(outcome.len, 2);
    assert_eq!(outcome.verdict, Verdict::Stop);
    assert_eq!(outcome.kind, Some(ExitKind::NoDecode));
    assert_eq!(outcome.target, Some(pc));
}

#[test]
fn locked_xadd_emits_cas_and_flags_the_outcome() {
    // F0 0F C1 18 = lock xadd [rax], ebx
    let (block, outcome) = lift(&[0xf0, 0x0f, 0xc1, 0x18], 0x9000);
    assert_eq!(outcome.len, 4);
    assert!(outcome.expect_cas);
    assert!(block.stmts.iter().any(|s| matches!(s, Stmt::Cas { .. })));
    // No plain store may accompany the CAS for the destination.
    assert!(!block.stmts.iter().any(|s| matches!(s, Stmt::Store { .. })));

    // Retry path: the CAS failure exit re-enters this instruction.
    let has_retry_exit = block.stmts.iter().any(
        |s| matches!(s, Stmt::Exit { target, kind: ExitKind::Jump, .. } if *target == 0x9000),
    );
    assert!(has_retry_exit);

    // Uncontended execution adds into memory and returns the old value.
    let mut m = Machine::new();
    m.set_gpr(0, 0x100);
    m.set_gpr(3, 5);
    m.write_mem(0x100, &[7, 0, 0, 0]);
    let exit = m.run(&block);
    assert_eq!(exit, None);
    assert_eq!(m.read_mem_u64(0x100, 4), 12);
    assert_eq!(m.gpr(3), 7);
}

#[test]
fn call_pushes_return_address_and_hints_the_red_zone() {
    // E8 0B 00 00 00 = call +0xb
    let pc = 0x8000u64;
    let (block, outcome) = lift(&[0xe8, 0x0b, 0x00, 0x00, 0x00], pc);
    assert_eq!(outcome.len, 5);
    assert_eq!(outcome.verdict, Verdict::Stop);
    assert_eq!(outcome.kind, Some(ExitKind::Call));
    assert_eq!(outcome.target, Some(pc + 5 + 0xb));
    assert!(block.stmts.iter().any(|s| matches!(s, Stmt::AbiHint { .. })));

    let mut m = Machine::new();
    m.set_gpr(4, 0x7fff_0000);
    let exit = m.run(&block).unwrap();
    assert_eq!(exit.target, pc + 5 + 0xb);
    assert_eq!(m.gpr(4), 0x7fff_0000 - 8);
    assert_eq!(m.read_mem_u64(0x7fff_0000 - 8, 8), pc + 5);
}

#[test]
fn ret_pops_and_releases_immediate_extra_bytes() {
    // C2 10 00 = ret 0x10
    let mut m = Machine::new();
    m.set_gpr(4, 0x7fff_0000);
    m.write_mem(0x7fff_0000, &0x1234_5678u64.to_le_bytes());
    let (outcome, exit) = step(&mut m, &[0xc2, 0x10, 0x00], 0x8000);
    assert_eq!(outcome.kind, Some(ExitKind::Ret));
    assert_eq!(exit.unwrap().target, 0x1234_5678);
    assert_eq!(m.gpr(4), 0x7fff_0000 + 8 + 0x10);
}

#[test]
fn syscall_records_the_resume_address_first() {
    let pc = 0xa000u64;
    let (block, outcome) = lift(&[0x0f, 0x05], pc);
    assert_eq!(outcome.len, 2);
    assert_eq!(outcome.kind, Some(ExitKind::Syscall));

    let mut m = Machine::new();
    let exit = m.run(&block).unwrap();
    assert_eq!(exit.kind, ExitKind::Syscall);
    assert_eq!(m.guest_u64(guest::OFF_RIP), pc + 2);
    // SYSCALL also latches the return address in RCX.
    assert_eq!(m.gpr(1), pc + 2);
}

#[test]
fn pause_reports_the_yield_hint() {
    let (_, outcome) = lift(&[0xf3, 0x90], 0x100);
    assert_eq!(outcome.len, 2);
    assert_eq!(outcome.verdict, Verdict::Stop);
    assert_eq!(outcome.kind, Some(ExitKind::Yield));
}

#[test]
fn int3_and_int_n_trap_with_their_vectors() {
    let (_, outcome) = lift(&[0xcc], 0x100);
    assert_eq!(outcome.kind, Some(ExitKind::Trap { vector: 3 }));
    assert_eq!(outcome.len, 1);

    let (block, outcome) = lift(&[0xcd, 0x80], 0x100);
    assert_eq!(outcome.kind, Some(ExitKind::Trap { vector: 0x80 }));
    assert_eq!(outcome.len, 2);
    let mut m = Machine::new();
    m.run(&block);
    assert_eq!(m.guest_u64(guest::OFF_RIP), 0x102);
}

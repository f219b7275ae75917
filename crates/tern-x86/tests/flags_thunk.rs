//! Lazy-flags thunk semantics, evaluated against the reference evaluator.

mod common;

use common::{lift, step, Machine};
use tern_types::Cond;
use tern_x86::guest;

#[test]
fn decode_is_deterministic() {
    // Same bytes, same IR: the lifter keeps no hidden state between calls.
    let bytes = [0x48, 0x11, 0xd8]; // adc rax, rbx
    let (a, oa) = lift(&bytes, 0x100);
    let (b, ob) = lift(&bytes, 0x100);
    assert_eq!(a, b);
    assert_eq!(oa, ob);
}

#[test]
fn sub_sets_borrow_and_sign() {
    let mut m = Machine::new();
    m.set_gpr(0, 3);
    m.set_gpr(3, 5);
    // 48 29 D8 = sub rax, rbx
    step(&mut m, &[0x48, 0x29, 0xd8], 0x100);
    assert_eq!(m.gpr(0), 3u64.wrapping_sub(5));
    assert!(m.cond(Cond::B), "3 - 5 borrows");
    assert!(m.cond(Cond::S));
    assert!(!m.cond(Cond::E));
    assert!(m.cond(Cond::L));
}

#[test]
fn cmp_compares_without_writeback() {
    let mut m = Machine::new();
    m.set_gpr(0, 7);
    m.set_gpr(3, 7);
    // 48 39 D8 = cmp rax, rbx
    step(&mut m, &[0x48, 0x39, 0xd8], 0x100);
    assert_eq!(m.gpr(0), 7);
    assert!(m.cond(Cond::E));
    assert!(m.cond(Cond::Ae));
}

#[test]
fn adc_threads_the_carry_through() {
    let mut m = Machine::new();
    // Set carry via 0xFF + 1.
    m.set_gpr(0, u64::MAX);
    m.set_gpr(3, 1);
    step(&mut m, &[0x48, 0x01, 0xd8], 0x100); // add rax, rbx -> CF
    assert!(m.cond(Cond::B));
    // adc rcx, rdx with rcx=rdx=0 must produce 1.
    m.set_gpr(1, 0);
    m.set_gpr(2, 0);
    step(&mut m, &[0x48, 0x11, 0xd1], 0x103); // adc rcx, rdx
    assert_eq!(m.gpr(1), 1);
    assert!(!m.cond(Cond::B));
}

#[test]
fn inc_preserves_carry() {
    let mut m = Machine::new();
    m.set_gpr(0, u64::MAX);
    m.set_gpr(3, 1);
    step(&mut m, &[0x48, 0x01, 0xd8], 0x100); // add -> CF set
    assert!(m.cond(Cond::B));
    // FF C1 = inc ecx: carry must survive, ZF/SF update.
    m.set_gpr(1, 41);
    step(&mut m, &[0xff, 0xc1], 0x103);
    assert_eq!(m.gpr(1), 42);
    assert!(m.cond(Cond::B), "INC must not clobber CF");
    assert!(!m.cond(Cond::E));
}

#[test]
fn zero_count_shift_preserves_flags_and_value() {
    let mut m = Machine::new();
    // Establish a distinctive thunk: 5 - 5 -> ZF.
    m.set_gpr(0, 5);
    m.set_gpr(3, 5);
    step(&mut m, &[0x48, 0x29, 0xd8], 0x100); // sub rax, rbx
    assert!(m.cond(Cond::E));
    let flags_before = m.rflags();

    // 48 D3 E1 = shl rcx, cl with CL = 0.
    m.set_gpr(1, 0x1234_0000_0000_0000);
    m.set_gpr(1, m.gpr(1) & !0xff); // CL = 0
    let rcx_before = m.gpr(1);
    step(&mut m, &[0x48, 0xd3, 0xe1], 0x103);
    assert_eq!(m.gpr(1), rcx_before, "zero-count shift must not change the value");
    assert_eq!(m.rflags(), flags_before, "zero-count shift must keep the thunk");
    assert!(m.cond(Cond::E));
}

#[test]
fn nonzero_shift_updates_the_thunk() {
    let mut m = Machine::new();
    m.set_gpr(1, 0x8000_0001);
    // C1 E1 01 = shl ecx, 1
    step(&mut m, &[0xc1, 0xe1, 0x01], 0x100);
    assert_eq!(m.gpr(1), 2);
    assert!(m.cond(Cond::B), "the shifted-out bit becomes CF");
    assert!(!m.cond(Cond::E));
}

#[test]
fn rotate_keeps_other_flags() {
    let mut m = Machine::new();
    m.set_gpr(0, 5);
    m.set_gpr(3, 5);
    step(&mut m, &[0x48, 0x29, 0xd8], 0x100); // ZF live
    // C1 C1 04 = rol ecx, 4
    m.set_gpr(1, 0xf000_000f);
    step(&mut m, &[0xc1, 0xc1, 0x04], 0x103);
    assert_eq!(m.gpr(1), 0x0000_00ff);
    assert!(m.cond(Cond::E), "rotates leave ZF alone");
    assert!(m.cond(Cond::B), "bit rotated into CF");
}

#[test]
fn partial_register_writes_follow_the_rules() {
    let mut m = Machine::new();
    m.set_gpr(3, 0xffff_ffff_ffff_ffff);
    // 89 C3 = mov ebx, eax: 32-bit write zero-extends.
    m.set_gpr(0, 0x1234_5678);
    step(&mut m, &[0x89, 0xc3], 0x100);
    assert_eq!(m.gpr(3), 0x1234_5678);

    // 66 89 C3 = mov bx, ax: 16-bit write merges.
    m.set_gpr(3, 0xffff_ffff_ffff_ffff);
    m.set_gpr(0, 0xaaaa);
    step(&mut m, &[0x66, 0x89, 0xc3], 0x102);
    assert_eq!(m.gpr(3), 0xffff_ffff_ffff_aaaa);

    // 88 C3 = mov bl, al: 8-bit write merges.
    m.set_gpr(3, 0xffff_ffff_ffff_ffff);
    m.set_gpr(0, 0x55);
    step(&mut m, &[0x88, 0xc3], 0x104);
    assert_eq!(m.gpr(3), 0xffff_ffff_ffff_ff55);
}

#[test]
fn high_byte_aliases_hit_the_second_byte() {
    let mut m = Machine::new();
    m.set_gpr(0, 0);
    // B4 7F = mov ah, 0x7f
    step(&mut m, &[0xb4, 0x7f], 0x100);
    assert_eq!(m.gpr(0), 0x7f00);

    // With a REX prefix the same encoding names SPL instead.
    m.set_gpr(0, 0);
    m.set_gpr(4, 0);
    step(&mut m, &[0x40, 0xb4, 0x7f], 0x102);
    assert_eq!(m.gpr(0), 0, "REX re-routes the encoding away from AH");
    assert_eq!(m.gpr(4), 0x7f);
}

#[test]
fn xor_self_zeroes_with_a_logic_thunk() {
    let mut m = Machine::new();
    m.set_gpr(0, 0xdead_beef);
    // 31 C0 = xor eax, eax
    step(&mut m, &[0x31, 0xc0], 0x100);
    assert_eq!(m.gpr(0), 0);
    assert!(m.cond(Cond::E));
    assert!(!m.cond(Cond::B));
    assert!(!m.cond(Cond::S));
}

#[test]
fn neg_is_subtraction_from_zero() {
    let mut m = Machine::new();
    m.set_gpr(3, 5);
    // 48 F7 DB = neg rbx
    step(&mut m, &[0x48, 0xf7, 0xdb], 0x100);
    assert_eq!(m.gpr(3), 5u64.wrapping_neg());
    assert!(m.cond(Cond::B), "NEG of nonzero sets CF");
}

#[test]
fn mul_widens_into_rdx_rax() {
    let mut m = Machine::new();
    m.set_gpr(0, 0x1_0000_0000);
    m.set_gpr(3, 0x10);
    // 48 F7 E3 = mul rbx
    step(&mut m, &[0x48, 0xf7, 0xe3], 0x100);
    assert_eq!(m.gpr(0), 0x10_0000_0000);
    assert_eq!(m.gpr(2), 0);
    // 32-bit form: EAX * EBX with the high half into EDX.
    m.set_gpr(0, 0x8000_0000);
    m.set_gpr(3, 4);
    step(&mut m, &[0xf7, 0xe3], 0x103);
    assert_eq!(m.gpr(0), 0);
    assert_eq!(m.gpr(2), 2);
    assert!(m.cond(Cond::B), "high half nonzero sets CF/OF");
}

#[test]
fn div_splits_quotient_and_remainder() {
    let mut m = Machine::new();
    m.set_gpr(2, 0);
    m.set_gpr(0, 43);
    m.set_gpr(3, 5);
    // 48 F7 F3 = div rbx
    step(&mut m, &[0x48, 0xf7, 0xf3], 0x100);
    assert_eq!(m.gpr(0), 8);
    assert_eq!(m.gpr(2), 3);
}

#[test]
fn division_by_zero_exits_to_the_trap_path() {
    let mut m = Machine::new();
    m.set_gpr(3, 0);
    let (block, _) = lift(&[0x48, 0xf7, 0xf3], 0x100);
    let exit = m.run(&block).expect("divide-by-zero must leave the block");
    assert_eq!(exit.kind, tern_ir::ExitKind::Trap { vector: 0 });
    assert_eq!(exit.target, 0x100);
}

#[test]
fn cmov_and_setcc_read_the_live_thunk() {
    let mut m = Machine::new();
    m.set_gpr(0, 1);
    m.set_gpr(3, 2);
    step(&mut m, &[0x48, 0x39, 0xd8], 0x100); // cmp rax, rbx -> below
    // 0F 42 CB = cmovb ecx, ebx
    m.set_gpr(1, 0xffff_ffff_ffff_ffff);
    step(&mut m, &[0x0f, 0x42, 0xcb], 0x103);
    assert_eq!(m.gpr(1), 2, "taken CMOV moves and zero-extends");

    // 0F 93 C1 = setae cl: condition is false here.
    step(&mut m, &[0x0f, 0x93, 0xc1], 0x106);
    assert_eq!(m.gpr(1) & 0xff, 0);
}

#[test]
fn bt_sets_carry_from_the_selected_bit() {
    let mut m = Machine::new();
    m.set_gpr(0, 0b100);
    m.set_gpr(1, 2);
    // 48 0F A3 C8 = bt rax, rcx
    step(&mut m, &[0x48, 0x0f, 0xa3, 0xc8], 0x100);
    assert!(m.cond(Cond::B));
    m.set_gpr(1, 3);
    step(&mut m, &[0x48, 0x0f, 0xa3, 0xc8], 0x104);
    assert!(!m.cond(Cond::B));
}

#[test]
fn lahf_and_sahf_round_trip_the_status_byte() {
    let mut m = Machine::new();
    m.set_gpr(0, 1);
    m.set_gpr(3, 1);
    step(&mut m, &[0x48, 0x29, 0xd8], 0x100); // sub -> ZF
    step(&mut m, &[0x9f], 0x103); // lahf
    let ah = (m.gpr(0) >> 8) & 0xff;
    assert!(ah & (1 << 6) != 0, "ZF visible in AH");
    assert!(ah & 2 != 0, "bit 1 always set");

    // Clear flags via add, then restore through SAHF.
    m.set_gpr(1, 1);
    m.set_gpr(2, 1);
    step(&mut m, &[0x48, 0x01, 0xd1], 0x104); // add rcx, rdx -> no ZF
    assert!(!m.cond(Cond::E));
    step(&mut m, &[0x9e], 0x107); // sahf
    assert!(m.cond(Cond::E));
}

#[test]
fn movzx_movsx_and_movsxd_extend() {
    let mut m = Machine::new();
    m.set_gpr(3, 0x80);
    // 0F B6 C3 = movzx eax, bl
    step(&mut m, &[0x0f, 0xb6, 0xc3], 0x100);
    assert_eq!(m.gpr(0), 0x80);
    // 0F BE C3 = movsx eax, bl
    step(&mut m, &[0x0f, 0xbe, 0xc3], 0x103);
    assert_eq!(m.gpr(0), 0xffff_ff80);
    // 48 63 C3 = movsxd rax, ebx
    m.set_gpr(3, 0x8000_0000);
    step(&mut m, &[0x48, 0x63, 0xc3], 0x106);
    assert_eq!(m.gpr(0), 0xffff_ffff_8000_0000);
}

#[test]
fn cmpxchg_success_and_failure_paths() {
    // Register form, equal: destination takes the new value, ZF set.
    let mut m = Machine::new();
    m.set_gpr(0, 7); // rax (expected)
    m.set_gpr(3, 7); // rbx (dest)
    m.set_gpr(1, 9); // rcx (new)
    // 48 0F B1 CB = cmpxchg rbx, rcx
    step(&mut m, &[0x48, 0x0f, 0xb1, 0xcb], 0x100);
    assert_eq!(m.gpr(3), 9);
    assert!(m.cond(Cond::E));

    // Not equal: accumulator learns the destination value.
    let mut m = Machine::new();
    m.set_gpr(0, 1);
    m.set_gpr(3, 7);
    m.set_gpr(1, 9);
    step(&mut m, &[0x48, 0x0f, 0xb1, 0xcb], 0x100);
    assert_eq!(m.gpr(3), 7);
    assert_eq!(m.gpr(0), 7);
    assert!(!m.cond(Cond::E));
}

#[test]
fn string_store_advances_by_direction() {
    let mut m = Machine::new();
    m.set_guest_u64(guest::OFF_DFLAG, 1);
    m.set_gpr(0, 0xab); // al
    m.set_gpr(7, 0x2000); // rdi
    // AA = stosb
    step(&mut m, &[0xaa], 0x100);
    assert_eq!(m.read_mem_u64(0x2000, 1), 0xab);
    assert_eq!(m.gpr(7), 0x2001);

    // Backwards under DF.
    m.set_guest_u64(guest::OFF_DFLAG, u64::MAX);
    step(&mut m, &[0xaa], 0x101);
    assert_eq!(m.read_mem_u64(0x2001, 1), 0xab);
    assert_eq!(m.gpr(7), 0x2000);
}

#[test]
fn rep_stos_loops_through_the_block_exit() {
    let mut m = Machine::new();
    m.set_guest_u64(guest::OFF_DFLAG, 1);
    m.set_gpr(0, 0x11);
    m.set_gpr(1, 2); // rcx
    m.set_gpr(7, 0x3000);
    // F3 AA = rep stosb: one iteration per block pass, looping to itself.
    let (block, outcome) = lift(&[0xf3, 0xaa], 0x100);
    assert_eq!(outcome.verdict, tern_x86::decode::Verdict::Stop);

    let exit = m.run(&block).unwrap();
    assert_eq!(exit.target, 0x100, "loop back to the instruction");
    assert_eq!(m.gpr(1), 1);
    let exit = m.run(&block).unwrap();
    assert_eq!(exit.target, 0x100);
    assert_eq!(m.gpr(1), 0);
    let exit = m.run(&block).unwrap();
    assert_eq!(exit.target, 0x102, "exhausted count leaves the loop");
    assert_eq!(m.read_mem_u64(0x3000, 2), 0x1111);
}

#[test]
fn loop_decrements_and_exits_sideways() {
    let mut m = Machine::new();
    m.set_gpr(1, 2);
    // E2 F0 = loop -0x10
    let (block, outcome) = lift(&[0xe2, 0xf0], 0x200);
    assert_eq!(outcome.verdict, tern_x86::decode::Verdict::Continue);
    let exit = m.run(&block);
    assert_eq!(exit.unwrap().target, 0x202u64.wrapping_sub(0x10));
    assert_eq!(m.gpr(1), 1);

    // Counter exhausts: fall through (no exit at all).
    let exit = m.run(&block);
    assert_eq!(exit, None);
    assert_eq!(m.gpr(1), 0);
}

#[test]
fn pushf_popf_round_trip_df() {
    let mut m = Machine::new();
    m.set_gpr(4, 0x7000);
    m.set_guest_u64(guest::OFF_DFLAG, u64::MAX); // DF set
    step(&mut m, &[0x9c], 0x100); // pushf
    let pushed = m.read_mem_u64(0x7000 - 8, 8);
    assert!(pushed & (1 << 10) != 0, "DF travels in bit 10");
    assert!(pushed & 2 != 0);

    m.set_guest_u64(guest::OFF_DFLAG, 1);
    step(&mut m, &[0x9d], 0x101); // popf
    assert_eq!(m.guest_u64(guest::OFF_DFLAG), u64::MAX);
}

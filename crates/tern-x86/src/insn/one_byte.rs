//! Primary-map dispatcher (one-byte opcodes, legacy prefixes).

use crate::flags::{self, RF_AF, RF_CF, RF_PF, RF_SF, RF_ZF};
use crate::insn::arith::{self, AluClass, CountSrc};
use crate::insn::string::{self, StrOp};
use crate::insn::{ctrl, imm_v, imm_z, x87};
use crate::lift::Lifter;
use crate::modrm::{self, disamode, disamode_lea, RmOp};
use crate::prefix::Prefixes;
use crate::{bytes, guest, DecodeError};
use tern_ir::{BinOp, ExitKind, Expr, Ty, UnOp};
use tern_types::{Cond, Width};

/// Dispatch one primary-map instruction. `delta` points at the opcode byte;
/// the return value is the total instruction length.
pub fn dispatch(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
) -> Result<usize, DecodeError> {
    let opcode = bytes::u8_at(l.bytes, delta)?;
    let delta = delta + 1;
    let w = pfx.operand_width();

    // The regular ALU block: 0x00-0x3D in eight groups of six encodings.
    if opcode < 0x40 {
        let low = opcode & 7;
        if low < 6 {
            let class = AluClass::from_block(opcode >> 3);
            return match low {
                0 => arith::alu_rm_reg(l, delta, pfx, class, Width::W8, false),
                1 => arith::alu_rm_reg(l, delta, pfx, class, w, false),
                2 => arith::alu_rm_reg(l, delta, pfx, class, Width::W8, true),
                3 => arith::alu_rm_reg(l, delta, pfx, class, w, true),
                4 => arith::alu_ax_imm(l, delta, pfx, class, Width::W8),
                _ => arith::alu_ax_imm(l, delta, pfx, class, w),
            };
        }
        // 0x06/0x07-style segment pushes and the decimal-adjust row died
        // with 64-bit mode.
        return Err(DecodeError::Invalid);
    }

    match opcode {
        // 0x40-0x4F are REX prefixes and never reach the dispatcher.
        0x50..=0x57 => {
            pfx.reject_lock_rep()?;
            let reg = (opcode - 0x50) | if pfx.rex_b() { 8 } else { 0 };
            let sw = pfx.stack_width();
            let val = l.read_reg(pfx, reg, sw);
            ctrl::push_w(l, sw, val);
            Ok(delta)
        }
        0x58..=0x5f => {
            pfx.reject_lock_rep()?;
            let reg = (opcode - 0x58) | if pfx.rex_b() { 8 } else { 0 };
            let sw = pfx.stack_width();
            let val = ctrl::pop_w(l, sw);
            l.write_reg(pfx, reg, sw, val);
            Ok(delta)
        }
        // MOVSXD Gv, Ed.
        0x63 => {
            pfx.reject_lock_rep()?;
            let am = disamode(l, delta, pfx, 0)?;
            let src = l.read_rm(pfx, &am.op, Width::W32);
            let val = match w {
                Width::W64 => Expr::unop(
                    UnOp::WidenS {
                        from: Width::W32,
                        to: Width::W64,
                    },
                    src,
                ),
                Width::W32 => src,
                Width::W16 => Expr::unop(
                    UnOp::Narrow {
                        from: Width::W32,
                        to: Width::W16,
                    },
                    src,
                ),
                Width::W8 => return Err(DecodeError::Invalid),
            };
            l.write_reg(pfx, am.reg, w, val);
            Ok(delta + am.op.len())
        }
        0x68 => {
            pfx.reject_lock_rep()?;
            // The immediate follows the operand size: 2 bytes under 0x66,
            // else 4 bytes sign-extended.
            let (imm, imm_len) = imm_z(l.bytes, delta, pfx.stack_width())?;
            let sw = pfx.stack_width();
            ctrl::push_w(l, sw, Expr::cw(sw, imm));
            Ok(delta + imm_len)
        }
        0x69 => arith::imul_reg_rm(l, delta, pfx, w, Some(false)),
        0x6a => {
            pfx.reject_lock_rep()?;
            let imm = bytes::i8_at(l.bytes, delta)?;
            let sw = pfx.stack_width();
            ctrl::push_w(l, sw, Expr::cw(sw, sw.truncate(imm as u64)));
            Ok(delta + 1)
        }
        0x6b => arith::imul_reg_rm(l, delta, pfx, w, Some(true)),
        // INS/OUTS are port I/O and stay with the privileged set.
        0x6c..=0x6f => Err(DecodeError::Unimplemented("port I/O string op")),
        0x70..=0x7f => {
            let cc = Cond::from_cc(opcode & 0xf).unwrap();
            ctrl::jcc_rel(l, delta, pfx, cc, true)
        }
        0x80 => arith::alu_grp1(l, delta, pfx, Width::W8, false),
        0x81 => arith::alu_grp1(l, delta, pfx, w, false),
        // 0x82 is the dead 16/32-bit alias of 0x80.
        0x82 => Err(DecodeError::Invalid),
        0x83 => arith::alu_grp1(l, delta, pfx, w, true),
        0x84 => arith::test_rm_reg(l, delta, pfx, Width::W8),
        0x85 => arith::test_rm_reg(l, delta, pfx, w),
        0x86 => arith::xchg_rm_reg(l, delta, pfx, Width::W8),
        0x87 => arith::xchg_rm_reg(l, delta, pfx, w),
        0x88 | 0x8a => {
            pfx.reject_lock_rep()?;
            let am = disamode(l, delta, pfx, 0)?;
            if opcode == 0x88 {
                let v = l.read_reg(pfx, am.reg, Width::W8);
                l.write_rm(pfx, &am.op, Width::W8, v);
            } else {
                let v = l.read_rm(pfx, &am.op, Width::W8);
                l.write_reg(pfx, am.reg, Width::W8, v);
            }
            Ok(delta + am.op.len())
        }
        0x89 | 0x8b => {
            pfx.reject_lock_rep()?;
            let am = disamode(l, delta, pfx, 0)?;
            if opcode == 0x89 {
                let v = l.read_reg(pfx, am.reg, w);
                l.write_rm(pfx, &am.op, w, v);
            } else {
                let v = l.read_rm(pfx, &am.op, w);
                l.write_reg(pfx, am.reg, w, v);
            }
            Ok(delta + am.op.len())
        }
        // Segment-register moves need a selector model this core does not
        // carry.
        0x8c | 0x8e => Err(DecodeError::Unimplemented("segment register move")),
        0x8d => {
            pfx.reject_lock_rep()?;
            let am = disamode_lea(l, delta, pfx, 0)?;
            let RmOp::Mem { addr, .. } = am.op else {
                return Err(DecodeError::Invalid);
            };
            let val = l.narrow(w, Expr::Temp(addr));
            l.write_reg(pfx, am.reg, w, val);
            Ok(delta + am.op.len())
        }
        0x8f => {
            pfx.reject_lock_rep()?;
            let modrm = bytes::u8_at(l.bytes, delta)?;
            if (modrm >> 3) & 7 != 0 {
                return Err(DecodeError::Invalid);
            }
            // The pop happens before the destination address is computed, so
            // an RSP-relative destination sees the incremented RSP.
            let sw = pfx.stack_width();
            let val = ctrl::pop_w(l, sw);
            let am = disamode(l, delta, pfx, 0)?;
            l.write_rm(pfx, &am.op, sw, val);
            Ok(delta + am.op.len())
        }
        0x90 => {
            // Plain NOP, unless F3 makes it PAUSE (a scheduling-yield hint)
            // or REX.B turns it back into a real XCHG with R8.
            if pfx.rex_b() {
                return xchg_rax_reg(l, delta, pfx, 8, w);
            }
            if pfx.rep() {
                let next = l.next_addr(delta);
                l.stop(Expr::c64(next), ExitKind::Yield);
            }
            Ok(delta)
        }
        0x91..=0x97 => {
            let reg = (opcode - 0x90) | if pfx.rex_b() { 8 } else { 0 };
            xchg_rax_reg(l, delta, pfx, reg, w)
        }
        // CBW/CWDE/CDQE.
        0x98 => {
            pfx.reject_lock_rep()?;
            let half = match w {
                Width::W16 => Width::W8,
                Width::W32 => Width::W16,
                Width::W64 => Width::W32,
                Width::W8 => unreachable!(),
            };
            let src = l.read_reg(pfx, 0, half);
            let val = Expr::unop(UnOp::WidenS { from: half, to: w }, src);
            l.write_reg(pfx, 0, w, val);
            Ok(delta)
        }
        // CWD/CDQ/CQO: rDX := sign of rAX.
        0x99 => {
            pfx.reject_lock_rep()?;
            let acc = l.read_reg(pfx, 0, w);
            let fill = Expr::binop(BinOp::Sar(w), acc, Expr::c8((w.bits() - 1) as u8));
            l.write_reg(pfx, 2, w, fill);
            Ok(delta)
        }
        // FWAIT: no exception model to poke, so a no-op.
        0x9b => Ok(delta),
        0x9c => ctrl::pushf(l, delta, pfx),
        0x9d => ctrl::popf(l, delta, pfx),
        // SAHF: AH replaces the low status bits.
        0x9e => {
            pfx.reject_lock_rep()?;
            let mask = RF_CF | RF_PF | RF_AF | RF_ZF | RF_SF;
            let ah = guest::read_reg8(0, true);
            let ah64 = l.zx64(Width::W8, ah);
            let old = flags::rflags_all(l);
            let merged = Expr::binop(
                BinOp::Or(Width::W64),
                Expr::binop(BinOp::And(Width::W64), old, Expr::c64(!mask)),
                Expr::binop(BinOp::And(Width::W64), ah64, Expr::c64(mask)),
            );
            let merged = l.t(merged);
            flags::set_rflags_copy(l, merged);
            Ok(delta)
        }
        // LAHF.
        0x9f => {
            pfx.reject_lock_rep()?;
            let mask = RF_CF | RF_PF | RF_AF | RF_ZF | RF_SF;
            let rf = flags::rflags_all(l);
            let val = Expr::binop(
                BinOp::Or(Width::W64),
                Expr::binop(BinOp::And(Width::W64), rf, Expr::c64(mask)),
                Expr::c64(2),
            );
            let byte = l.narrow(Width::W8, val);
            let byte = l.t(byte);
            guest::write_reg8(l.block, 0, true, byte);
            Ok(delta)
        }
        // MOV moffs forms: 64-bit absolute address (32-bit under 0x67).
        0xa0..=0xa3 => {
            pfx.reject_lock_rep()?;
            let (addr_raw, imm_len) = if pfx.addr_size_override() {
                (bytes::u32_at(l.bytes, delta)? as u64, 4)
            } else {
                (bytes::u64_at(l.bytes, delta)?, 8)
            };
            let ww = if opcode & 1 == 0 { Width::W8 } else { w };
            let adjusted = modrm::adjust_addr(l, pfx, Expr::c64(addr_raw))?;
            let addr = l.t(adjusted);
            if opcode < 0xa2 {
                let v = l.load(Ty::from_width(ww), addr);
                l.write_reg(pfx, 0, ww, v);
            } else {
                let v = l.read_reg(pfx, 0, ww);
                l.store(addr, v);
            }
            Ok(delta + imm_len)
        }
        0xa4 => string::string_op(l, delta, pfx, StrOp::Movs, Width::W8),
        0xa5 => string::string_op(l, delta, pfx, StrOp::Movs, w),
        0xa6 => string::string_op(l, delta, pfx, StrOp::Cmps, Width::W8),
        0xa7 => string::string_op(l, delta, pfx, StrOp::Cmps, w),
        0xa8 => {
            let imm = bytes::u8_at(l.bytes, delta)? as u64;
            arith::test_rm_imm(l, pfx, &RmOp::Reg(0), Width::W8, imm)?;
            Ok(delta + 1)
        }
        0xa9 => {
            let (imm, imm_len) = imm_z(l.bytes, delta, w)?;
            arith::test_rm_imm(l, pfx, &RmOp::Reg(0), w, imm)?;
            Ok(delta + imm_len)
        }
        0xaa => string::string_op(l, delta, pfx, StrOp::Stos, Width::W8),
        0xab => string::string_op(l, delta, pfx, StrOp::Stos, w),
        0xac => string::string_op(l, delta, pfx, StrOp::Lods, Width::W8),
        0xad => string::string_op(l, delta, pfx, StrOp::Lods, w),
        0xae => string::string_op(l, delta, pfx, StrOp::Scas, Width::W8),
        0xaf => string::string_op(l, delta, pfx, StrOp::Scas, w),
        // MOV r8, imm8.
        0xb0..=0xb7 => {
            pfx.reject_lock_rep()?;
            let reg = (opcode - 0xb0) | if pfx.rex_b() { 8 } else { 0 };
            let imm = bytes::u8_at(l.bytes, delta)?;
            l.write_reg(pfx, reg, Width::W8, Expr::c8(imm));
            Ok(delta + 1)
        }
        // MOV rv, immv (the only 64-bit-immediate instruction).
        0xb8..=0xbf => {
            pfx.reject_lock_rep()?;
            let reg = (opcode - 0xb8) | if pfx.rex_b() { 8 } else { 0 };
            let (imm, imm_len) = imm_v(l.bytes, delta, w)?;
            l.write_reg(pfx, reg, w, Expr::cw(w, imm));
            Ok(delta + imm_len)
        }
        0xc0 => arith::grp2_shift(l, delta, pfx, Width::W8, CountSrc::Imm8),
        0xc1 => arith::grp2_shift(l, delta, pfx, w, CountSrc::Imm8),
        0xc2 => ctrl::ret_near(l, delta, pfx, true),
        0xc3 => ctrl::ret_near(l, delta, pfx, false),
        // LES/LDS became the VEX prefixes.
        0xc4 | 0xc5 => Err(DecodeError::Invalid),
        0xc6 => ctrl::mov_rm_imm(l, delta, pfx, Width::W8),
        0xc7 => ctrl::mov_rm_imm(l, delta, pfx, w),
        0xc8 => Err(DecodeError::Unimplemented("enter")),
        0xc9 => ctrl::leave(l, delta, pfx),
        // Far returns need a segment model.
        0xca | 0xcb => Err(DecodeError::Unimplemented("far return")),
        0xcc => ctrl::int_trap(l, delta, 3),
        0xcd => {
            let vector = bytes::u8_at(l.bytes, delta)?;
            ctrl::int_trap(l, delta + 1, vector)
        }
        0xce => Err(DecodeError::Invalid),
        0xcf => Err(DecodeError::Unimplemented("iret")),
        0xd0 => arith::grp2_shift(l, delta, pfx, Width::W8, CountSrc::One),
        0xd1 => arith::grp2_shift(l, delta, pfx, w, CountSrc::One),
        0xd2 => arith::grp2_shift(l, delta, pfx, Width::W8, CountSrc::Cl),
        0xd3 => arith::grp2_shift(l, delta, pfx, w, CountSrc::Cl),
        // XLAT: AL := [rBX + zero-extended AL].
        0xd7 => {
            pfx.reject_lock()?;
            let al = guest::read_reg8(0, false);
            let al64 = l.zx64(Width::W8, al);
            let raw = Expr::binop(BinOp::Add(Width::W64), guest::read_gpr(3), al64);
            let adjusted = modrm::adjust_addr(l, pfx, raw)?;
            let addr = l.t(adjusted);
            let v = l.load(Ty::I8, addr);
            guest::write_reg8(l.block, 0, false, v);
            Ok(delta)
        }
        0xd8..=0xdf => x87::dispatch(l, delta, pfx, opcode),
        0xe0..=0xe3 => ctrl::loop_family(l, delta, pfx, opcode),
        0xe4..=0xe7 | 0xec..=0xef => Err(DecodeError::Unimplemented("port I/O")),
        0xe8 => ctrl::call_rel(l, delta, pfx),
        0xe9 => ctrl::jmp_rel(l, delta, pfx, false),
        0xea => Err(DecodeError::Invalid),
        0xeb => ctrl::jmp_rel(l, delta, pfx, true),
        0xf1 => ctrl::int_trap(l, delta, 1),
        0xf4 => Err(DecodeError::Unimplemented("hlt")),
        0xf5 => {
            pfx.reject_lock_rep()?;
            arith::carry_toggle(l, 2);
            Ok(delta)
        }
        0xf6 => arith::grp3(l, delta, pfx, Width::W8),
        0xf7 => arith::grp3(l, delta, pfx, w),
        0xf8 => {
            pfx.reject_lock_rep()?;
            arith::carry_toggle(l, 0);
            Ok(delta)
        }
        0xf9 => {
            pfx.reject_lock_rep()?;
            arith::carry_toggle(l, 1);
            Ok(delta)
        }
        0xfa | 0xfb => Err(DecodeError::Unimplemented("interrupt-flag toggle")),
        0xfc => {
            pfx.reject_lock_rep()?;
            l.put(guest::OFF_DFLAG, Expr::c64(1));
            Ok(delta)
        }
        0xfd => {
            pfx.reject_lock_rep()?;
            l.put(guest::OFF_DFLAG, Expr::c64(u64::MAX));
            Ok(delta)
        }
        // Group 4: INC/DEC rm8.
        0xfe => {
            let am = disamode(l, delta, pfx, 0)?;
            match am.reg & 7 {
                0 => arith::inc_dec_rm(l, pfx, &am.op, Width::W8, false)?,
                1 => arith::inc_dec_rm(l, pfx, &am.op, Width::W8, true)?,
                _ => return Err(DecodeError::Invalid),
            }
            Ok(delta + am.op.len())
        }
        // Group 5: INC/DEC/CALL/JMP/PUSH.
        0xff => {
            let modrm = bytes::u8_at(l.bytes, delta)?;
            match (modrm >> 3) & 7 {
                0 | 1 => {
                    let am = disamode(l, delta, pfx, 0)?;
                    let dec = am.reg & 7 == 1;
                    arith::inc_dec_rm(l, pfx, &am.op, w, dec)?;
                    Ok(delta + am.op.len())
                }
                2 => ctrl::call_jmp_indirect(l, delta, pfx, true),
                4 => ctrl::call_jmp_indirect(l, delta, pfx, false),
                3 | 5 => Err(DecodeError::Unimplemented("far transfer")),
                6 => {
                    pfx.reject_lock_rep()?;
                    let am = disamode(l, delta, pfx, 0)?;
                    let sw = pfx.stack_width();
                    let val = l.read_rm(pfx, &am.op, sw);
                    let val = l.t(val);
                    ctrl::push_w(l, sw, val);
                    Ok(delta + am.op.len())
                }
                _ => Err(DecodeError::Invalid),
            }
        }
        _ => Err(DecodeError::Invalid),
    }
}

fn xchg_rax_reg(
    l: &mut Lifter<'_, '_>,
    delta: usize,
    pfx: &Prefixes,
    reg: u8,
    w: Width,
) -> Result<usize, DecodeError> {
    pfx.reject_lock_rep()?;
    let a = l.read_reg(pfx, 0, w);
    let a = l.t(a);
    let b = l.read_reg(pfx, reg, w);
    let b = l.t(b);
    l.write_reg(pfx, 0, w, b);
    l.write_reg(pfx, reg, w, a);
    Ok(delta)
}

